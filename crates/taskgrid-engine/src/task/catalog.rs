//! Registry of task implementations keyed by task type.

use std::collections::HashMap;
use std::sync::Arc;

use taskgrid_core::TaskCommand;

use super::{MonitorTask, Task, TaskError, MONITOR_TASK_TYPE};
use crate::error::EngineError;

/// Builds the [`Task`] a command names.
pub trait TaskFactory: Send + Sync {
    fn create(&self, command: &TaskCommand) -> Result<Arc<dyn Task>, TaskError>;

    /// Exclusivity of the tasks this factory builds.
    fn exclusive_per_user(&self) -> bool {
        true
    }
}

impl<F> TaskFactory for F
where
    F: Fn(&TaskCommand) -> Result<Arc<dyn Task>, TaskError> + Send + Sync,
{
    fn create(&self, command: &TaskCommand) -> Result<Arc<dyn Task>, TaskError> {
        self(command)
    }
}

/// Task types known to this process.
#[derive(Default, Clone)]
pub struct TaskCatalog {
    factories: HashMap<String, Arc<dyn TaskFactory>>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in task types registered.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(MONITOR_TASK_TYPE, MonitorTask::factory());
        catalog
    }

    /// Register a factory, replacing any previous one for the type.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        factory: impl TaskFactory + 'static,
    ) -> &mut Self {
        self.factories.insert(task_type.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Exclusivity declared for a task type. Unknown types are exclusive.
    pub fn exclusive_per_user(&self, task_type: &str) -> bool {
        self.factories
            .get(task_type)
            .map(|f| f.exclusive_per_user())
            .unwrap_or(true)
    }

    /// Build the task for `command`.
    pub fn resolve(&self, command: &TaskCommand) -> Result<Arc<dyn Task>, EngineError> {
        let factory = self
            .factories
            .get(&command.task_type)
            .ok_or_else(|| EngineError::UnknownTaskType(command.task_type.clone()))?;
        factory
            .create(command)
            .map_err(|e| EngineError::InvalidCommand(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgrid_core::SecurityContext;

    #[test]
    fn test_builtin_resolves_monitor() {
        let catalog = TaskCatalog::builtin();
        let command = TaskCommand::new(MONITOR_TASK_TYPE, SecurityContext::anonymous());

        assert!(catalog.contains(MONITOR_TASK_TYPE));
        assert!(!catalog.exclusive_per_user(MONITOR_TASK_TYPE));
        let task = catalog.resolve(&command).unwrap();
        assert!(!task.exclusive_per_user());
    }

    #[test]
    fn test_unknown_type() {
        let catalog = TaskCatalog::new();
        let command = TaskCommand::new("nope", SecurityContext::anonymous());
        assert!(matches!(
            catalog.resolve(&command),
            Err(EngineError::UnknownTaskType(t)) if t == "nope"
        ));
        assert!(catalog.exclusive_per_user("nope"));
    }

    #[test]
    fn test_factory_errors_become_invalid_command() {
        let catalog = TaskCatalog::builtin();
        let command = TaskCommand::new(MONITOR_TASK_TYPE, SecurityContext::anonymous())
            .with_parameters(json!({ "duration_ms": "soon" }));
        assert!(matches!(
            catalog.resolve(&command),
            Err(EngineError::InvalidCommand(_))
        ));
    }
}
