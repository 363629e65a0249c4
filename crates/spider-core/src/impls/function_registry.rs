//! In-process function registry.
//!
//! Maps `func_name` to a handler and runs assignments directly, without a
//! separate worker process. Used by the simulator and the scenario tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{OutputValue, ResolvedInput, Result, SpiderError};
use crate::ports::{Assignment, TaskExecutor};

/// A user function.
#[async_trait]
pub trait TaskFunction: Send + Sync {
    async fn call(&self, inputs: Vec<ResolvedInput>) -> std::result::Result<Vec<OutputValue>, String>;
}

/// Adapter for plain synchronous closures.
struct FnFunction<F>(F);

#[async_trait]
impl<F> TaskFunction for FnFunction<F>
where
    F: Fn(Vec<ResolvedInput>) -> std::result::Result<Vec<OutputValue>, String> + Send + Sync,
{
    async fn call(&self, inputs: Vec<ResolvedInput>) -> std::result::Result<Vec<OutputValue>, String> {
        (self.0)(inputs)
    }
}

/// Registry of functions (func_name -> function).
///
/// Built during initialization, then shared immutably behind an `Arc`.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn TaskFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn TaskFunction>) -> Result<()> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(SpiderError::Validation(format!(
                "function {name} is already registered"
            )));
        }
        self.functions.insert(name, function);
        Ok(())
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(Vec<ResolvedInput>) -> std::result::Result<Vec<OutputValue>, String>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(FnFunction(function)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TaskFunction>> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[async_trait]
impl TaskExecutor for FunctionRegistry {
    async fn execute(&self, assignment: Assignment) -> std::result::Result<Vec<OutputValue>, String> {
        let function = self
            .get(&assignment.func_name)
            .ok_or_else(|| format!("no function registered as {}", assignment.func_name))?;
        function.call(assignment.inputs).await
    }
}
