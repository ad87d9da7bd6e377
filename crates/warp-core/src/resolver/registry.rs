use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{Resolver, ResolverState};

pub(crate) type Slot<T> = RefCell<ResolverState<T>>;

/// Session-wide cache of derived structures and resolver states.
///
/// Each key holds values of a single type; a lookup with a different type
/// behaves as a miss.
#[derive(Default)]
pub struct Registry {
    values: RefCell<HashMap<String, Rc<dyn Any>>>,
    slots: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        let value = self.values.borrow().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.borrow().contains_key(key)
    }

    /// Return the cached value for `key`, constructing it on first request.
    pub fn get_or_insert_with<T: 'static>(&self, key: &str, init: impl FnOnce() -> T) -> Rc<T> {
        if let Some(value) = self.get::<T>(key) {
            return value;
        }

        let value = Rc::new(init());
        self.values
            .borrow_mut()
            .insert(key.to_string(), Rc::clone(&value) as Rc<dyn Any>);
        value
    }

    /// Like [`Registry::get_or_insert_with`]; a failed construction caches nothing.
    pub fn get_or_try_insert_with<T: 'static, E>(
        &self,
        key: &str,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<Rc<T>, E> {
        if let Some(value) = self.get::<T>(key) {
            return Ok(value);
        }

        let value = Rc::new(init()?);
        self.values
            .borrow_mut()
            .insert(key.to_string(), Rc::clone(&value) as Rc<dyn Any>);
        Ok(value)
    }

    pub(crate) fn slot<R: Resolver>(&self) -> Rc<Slot<R::Value>> {
        let any = Rc::clone(
            self.slots
                .borrow_mut()
                .entry(TypeId::of::<R>())
                .or_insert_with(|| {
                    Rc::new(Slot::<R::Value>::new(ResolverState::Unresolved)) as Rc<dyn Any>
                }),
        );
        any.downcast::<Slot<R::Value>>()
            .unwrap_or_else(|_| unreachable!("slots are keyed by resolver type"))
    }
}
