use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::{RuleSet, RuleSetDefinition};
use crate::error::EngineError;

/// The rule set currently served, published as an immutable snapshot.
///
/// The lock only guards cloning or replacing the `Arc`; evaluations hold
/// their own snapshot and never observe a half-installed version.
#[derive(Debug)]
pub struct ActiveRules {
    current: RwLock<Arc<RuleSet>>,
}

impl ActiveRules {
    pub fn new(initial: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    /// Compile and publish a new version.
    ///
    /// Compilation happens before the write lock is taken. A definition that
    /// fails validation, or whose version is not newer than the active one,
    /// is rejected and the active snapshot is untouched.
    pub fn install(&self, def: RuleSetDefinition) -> Result<Arc<RuleSet>, EngineError> {
        let compiled = Arc::new(RuleSet::compile(def)?);

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if compiled.version() <= current.version() {
            return Err(EngineError::invalid_ruleset(
                compiled.version(),
                format!("version must be newer than active version {}", current.version()),
            ));
        }
        let previous = current.version();
        *current = Arc::clone(&compiled);
        drop(current);

        info!(
            previous,
            version = compiled.version(),
            rules = compiled.rules().len(),
            "rule set installed"
        );
        Ok(compiled)
    }
}
