//! The tool registry: name → (definition, executor).
//!
//! Executors come in two flavors. Async executors run on the request's
//! task; sync executors are plain closures the execution layer moves onto a
//! blocking thread so they cannot stall the runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use helm_domain::ToolDefinition;

/// An async tool implementation. Errors are plain strings; the execution
/// layer wraps them into a failed `ToolResult`.
#[async_trait]
pub trait ToolExec: Send + Sync {
    async fn run(&self, args: Map<String, Value>) -> std::result::Result<Value, String>;
}

/// A synchronous tool body.
pub type SyncToolFn =
    dyn Fn(Map<String, Value>) -> std::result::Result<Value, String> + Send + Sync;

#[derive(Clone)]
pub enum Executor {
    Async(Arc<dyn ToolExec>),
    Sync(Arc<SyncToolFn>),
}

struct ToolEntry {
    definition: ToolDefinition,
    executor: Executor,
}

/// Process-wide registry. Stateless beyond the registration table; the
/// execution layer owns all per-call policy.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_async(&self, definition: ToolDefinition, executor: Arc<dyn ToolExec>) {
        let name = definition.name.clone();
        self.tools.write().insert(
            name,
            ToolEntry {
                definition,
                executor: Executor::Async(executor),
            },
        );
    }

    pub fn register_sync<F>(&self, definition: ToolDefinition, executor: F)
    where
        F: Fn(Map<String, Value>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let name = definition.name.clone();
        self.tools.write().insert(
            name,
            ToolEntry {
                definition,
                executor: Executor::Sync(Arc::new(executor)),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<(ToolDefinition, Executor)> {
        self.tools
            .read()
            .get(name)
            .map(|entry| (entry.definition.clone(), entry.executor.clone()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for every registered tool, used to build the LLM tools
    /// array.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .map(|entry| entry.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
