//! Memoized discovery units and the session that owns their state.
//!
//! A [`Resolver`] locates one thing in the client (a global, a function, a
//! piece of code) and produces a typed value. Resolvers never hold state
//! themselves: the [`Session`] keeps a [`ResolverState`] slot per resolver
//! type in its [`Registry`], runs each resolver at most once, and replays the
//! stored outcome on every later request.
//!
//! ```text
//!   Unresolved ──load──▶ Resolving ──Ok──▶ Resolved(value)
//!                            │
//!                            └──Err──▶ Failed(error)
//!
//!   load() while Resolving  →  CyclicDependency
//! ```
//!
//! Resolvers call each other through [`Session::depend`], which turns an
//! upstream failure into [`Error::DependencyFailure`](crate::error::Error::DependencyFailure)
//! so it propagates with `?`.

mod registry;
mod report;
mod session;

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{ResolveError, Result};
use crate::image::{Address, ReadImage};

pub use registry::Registry;
pub use report::{
    Describe, Field, FieldValue, Outcome, Report, load_reports, save_reports,
};
pub use session::{Session, SessionConfig, SessionConfigBuilder};

pub trait Resolver: 'static {
    /// Short upper-case name used in logs, errors and reports
    const NAME: &'static str;

    type Value: Describe + 'static;

    fn resolve<I: ReadImage + ?Sized>(cx: &Session<'_, I>) -> Result<Self::Value>;
}

/// A resolved value with one primary address.
pub trait AsAddress {
    fn as_address(&self) -> Address;

    fn as_hex(&self) -> String {
        self.as_address().to_hex()
    }
}

#[derive(Debug)]
pub enum ResolverState<T> {
    Unresolved,
    Resolving,
    Resolved(Rc<T>),
    Failed(ResolveError),
}

impl<T> ResolverState<T> {
    pub fn kind(&self) -> StateKind {
        match self {
            ResolverState::Unresolved => StateKind::Unresolved,
            ResolverState::Resolving => StateKind::Resolving,
            ResolverState::Resolved(_) => StateKind::Resolved,
            ResolverState::Failed(_) => StateKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum StateKind {
    Unresolved,
    Resolving,
    Resolved,
    Failed,
}
