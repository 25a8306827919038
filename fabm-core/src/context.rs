//! Explicit ownership of the model cores available to a process.
//!
//! A [`BindingContext`] replaces process-wide library state: it is built once, handed to every
//! [`Model`](crate::model::Model) that should use it, and holds at most one core per spatial
//! rank. Models keep shared ownership of the core they were created with, so a core is torn
//! down only after the context and every model created from it have been dropped.

use crate::backend::Backend;
use crate::errors::{FabmError, FabmResult};
use std::fmt;
use std::sync::Arc;

/// Highest spatial rank supported by the binding layer.
pub const MAX_DOMAIN_RANK: usize = 1;

#[derive(Default, Clone)]
pub struct BindingContext {
    backends: [Option<Arc<dyn Backend>>; MAX_DOMAIN_RANK + 1],
}

impl BindingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core, replacing any core previously registered for the same rank.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> FabmResult<()> {
        let rank = backend.domain_rank();
        let slot = self
            .backends
            .get_mut(rank)
            .ok_or(FabmError::UnsupportedRank(rank))?;
        *slot = Some(backend);
        Ok(())
    }

    /// Builder-style [`BindingContext::register`].
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> FabmResult<Self> {
        self.register(backend)?;
        Ok(self)
    }

    /// The core serving domains of the given rank.
    pub fn backend(&self, rank: usize) -> FabmResult<Arc<dyn Backend>> {
        match self.backends.get(rank) {
            Some(Some(backend)) => Ok(Arc::clone(backend)),
            Some(None) => Err(FabmError::NoBackend(rank)),
            None => Err(FabmError::UnsupportedRank(rank)),
        }
    }

    /// Version string reported by the core serving the given rank.
    pub fn version(&self, rank: usize) -> FabmResult<String> {
        Ok(self.backend(rank)?.version())
    }

    /// Ranks for which a core is registered.
    pub fn ranks(&self) -> Vec<usize> {
        self.backends
            .iter()
            .enumerate()
            .filter_map(|(rank, backend)| backend.as_ref().map(|_| rank))
            .collect()
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("ranks", &self.ranks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_backend::ExampleBackend;

    #[test]
    fn backends_are_registered_by_rank() {
        let context = BindingContext::new()
            .with_backend(Arc::new(ExampleBackend::new(1)))
            .unwrap();

        assert_eq!(context.ranks(), vec![1]);
        assert!(context.backend(1).is_ok());
        assert!(matches!(context.backend(0), Err(FabmError::NoBackend(0))));
        assert!(matches!(
            context.backend(2),
            Err(FabmError::UnsupportedRank(2))
        ));
    }

    #[test]
    fn cores_of_unsupported_rank_are_refused() {
        let mut context = BindingContext::new();

        let err = context
            .register(Arc::new(ExampleBackend::new(2)))
            .unwrap_err();

        assert!(matches!(err, FabmError::UnsupportedRank(2)));
        assert_eq!(
            err.to_string(),
            "Domains of rank 2 are not supported; the highest supported rank is 1"
        );
        assert!(context.ranks().is_empty());
    }

    #[test]
    fn version_is_queried_from_the_core() {
        let context = BindingContext::new()
            .with_backend(Arc::new(ExampleBackend::new(0)))
            .unwrap();
        assert!(context.version(0).unwrap().starts_with("example-core"));
    }
}
