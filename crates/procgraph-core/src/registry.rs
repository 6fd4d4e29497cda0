//! Step handler registry.
//!
//! Maps handler names to factories producing fresh [`StepHandler`] instances.
//! The orchestrator materializes steps lazily: a handler is constructed on a
//! step's first message and lives until disposal. Registration happens while
//! the host still owns the registry; once shared with a runtime it is
//! read-only, matching the immutable-after-construction routing table.

use crate::step::StepHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory producing a fresh handler instance per step materialization.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn StepHandler> + Send + Sync>;

/// Name-to-factory table for user step handlers.
#[derive(Default)]
pub struct StepRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory under `name`. Later registrations replace
    /// earlier ones.
    pub fn register<F, H>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: StepHandler + 'static,
    {
        self.factories
            .insert(name.into(), Arc::new(move || Box::new(factory())));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct a fresh handler instance.
    pub fn create(&self, name: &str) -> Option<Box<dyn StepHandler>> {
        self.factories.get(name).map(|f| f())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("StepRegistry").field("handlers", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepContext;
    use crate::error::Result;
    use crate::step::EntryPoint;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;

    struct Noop;

    #[async_trait]
    impl StepHandler for Noop {
        fn entry_points(&self) -> Vec<EntryPoint> {
            vec![EntryPoint::new("Run")]
        }

        async fn invoke(
            &self,
            _function_name: &str,
            _arguments: HashMap<String, Value>,
            _ctx: &StepContext,
        ) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn registered_factories_produce_fresh_instances() {
        let mut registry = StepRegistry::new();
        registry.register("Noop", || Noop);

        assert!(registry.contains("Noop"));
        assert!(!registry.contains("Other"));

        let handler = registry.create("Noop").unwrap();
        assert_eq!(handler.entry_points()[0].name, "Run");
    }
}
