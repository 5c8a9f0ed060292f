//! Pluggable work units.
//!
//! A [`WorkUnit`] transforms the object at `input_key` into the object at
//! `output_key`. The engine resolves one per task by its `step` and never
//! looks inside.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkError;

/// One pipeline stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkUnit: Send + Sync {
    async fn execute(&self, input_key: &str, output_key: &str) -> Result<(), WorkError>;
}

/// Work units by step name.
#[derive(Clone, Default)]
pub struct WorkRegistry {
    units: HashMap<String, Arc<dyn WorkUnit>>,
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: impl Into<String>, unit: Arc<dyn WorkUnit>) -> &mut Self {
        self.units.insert(step.into(), unit);
        self
    }

    pub fn with(mut self, step: impl Into<String>, unit: Arc<dyn WorkUnit>) -> Self {
        self.register(step, unit);
        self
    }

    pub fn get(&self, step: &str) -> Option<Arc<dyn WorkUnit>> {
        self.units.get(step).cloned()
    }

    pub fn contains(&self, step: &str) -> bool {
        self.units.contains_key(step)
    }

    /// Registered step names, sorted.
    pub fn steps(&self) -> Vec<&str> {
        let mut steps: Vec<&str> = self.units.keys().map(String::as_str).collect();
        steps.sort_unstable();
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_resolves_by_step() {
        let mut unit = MockWorkUnit::new();
        unit.expect_execute()
            .withf(|input, output| input == "in" && output == "out")
            .times(1)
            .returning(|_, _| Ok(()));

        let registry = WorkRegistry::new().with("resize", Arc::new(unit));
        assert!(registry.contains("resize"));
        assert!(registry.get("thumbnail").is_none());
        assert_eq!(registry.steps(), vec!["resize"]);

        let resolved = registry.get("resize").unwrap();
        resolved.execute("in", "out").await.unwrap();
    }
}
