use std::cell::OnceCell;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, debug_span, warn};

use super::{Describe, Registry, Report, Resolver, ResolverState, StateKind};
use crate::error::{Error, ResolveError, Result};
use crate::facts::{Facts, Thresholds, load_thresholds};
use crate::image::{BinaryImage, ReadImage};

/// Name the facts are reported under.
const FACTS: &str = "FACTS";

/// Configuration for a [`Session`]
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Build-date and toolchain boundaries the facts are computed with
    pub thresholds: Thresholds,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for SessionConfig
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    thresholds: Option<Thresholds>,
}

impl SessionConfigBuilder {
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Read thresholds from a JSON file; missing keys keep their defaults.
    pub fn thresholds_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let thresholds = load_thresholds(path)?;
        Ok(self.thresholds(thresholds))
    }

    pub fn build(self) -> SessionConfig {
        SessionConfig {
            thresholds: self.thresholds.unwrap_or_default(),
        }
    }
}

/// One analysis run over one image.
///
/// Everything a session learns (facts, resolver outcomes, derived
/// structures) lives as long as the session and is never recomputed.
pub struct Session<'a, I: ReadImage + ?Sized = BinaryImage> {
    image: &'a I,
    config: SessionConfig,
    facts: OnceCell<Facts>,
    registry: Registry,
}

impl<'a, I: ReadImage + ?Sized> Session<'a, I> {
    pub fn new(image: &'a I) -> Self {
        Self::with_config(image, SessionConfig::default())
    }

    pub fn with_config(image: &'a I, config: SessionConfig) -> Self {
        Self {
            image,
            config,
            facts: OnceCell::new(),
            registry: Registry::new(),
        }
    }

    pub fn image(&self) -> &'a I {
        self.image
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Facts about the client, computed on first use.
    pub fn facts(&self) -> &Facts {
        self.facts
            .get_or_init(|| Facts::compute(self.image, &self.config.thresholds))
    }

    pub fn state<R: Resolver>(&self) -> StateKind {
        self.registry.slot::<R>().borrow().kind()
    }

    /// Resolve `R`, or replay its stored outcome.
    pub fn load<R: Resolver>(&self) -> std::result::Result<Rc<R::Value>, ResolveError> {
        let slot = self.registry.slot::<R>();
        match &*slot.borrow() {
            ResolverState::Resolved(value) => return Ok(Rc::clone(value)),
            ResolverState::Failed(err) => return Err(err.clone()),
            ResolverState::Resolving => {
                warn!("{} requested while it is being resolved", R::NAME);
                return Err(ResolveError::new(R::NAME, Error::CyclicDependency(R::NAME)));
            }
            ResolverState::Unresolved => {}
        }

        *slot.borrow_mut() = ResolverState::Resolving;
        let _span = debug_span!("resolve", resolver = R::NAME).entered();
        debug!("Resolving {}...", R::NAME);

        let (state, outcome) = match R::resolve(self) {
            Ok(value) => {
                debug!("{} resolved", R::NAME);
                let value = Rc::new(value);
                (ResolverState::Resolved(Rc::clone(&value)), Ok(value))
            }
            Err(error) => {
                let err = ResolveError::new(R::NAME, error);
                warn!("{}", err);
                (ResolverState::Failed(err.clone()), Err(err))
            }
        };
        *slot.borrow_mut() = state;
        outcome
    }

    /// [`Session::load`] for use inside another resolver.
    pub fn depend<R: Resolver>(&self) -> Result<Rc<R::Value>> {
        Ok(self.load::<R>()?)
    }

    /// Force `R` and report its fields or its failure.
    pub fn describe<R: Resolver>(&self) -> Report {
        match self.load::<R>() {
            Ok(value) => Report::resolved(R::NAME, value.fields()),
            Err(err) => Report::failed(R::NAME, &err),
        }
    }

    pub fn describe_facts(&self) -> Report {
        Report::resolved(FACTS, self.facts().fields())
    }
}
