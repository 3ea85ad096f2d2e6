use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::AgentResult;
use crate::models::tool::Tool;

/// Something the model can ask us to run
#[async_trait]
pub trait Function: Send + Sync {
    /// Name, description and argument schema shown to the model
    fn definition(&self) -> &Tool;

    /// Run with already validated arguments, returning the text sent back to the model
    async fn call(&self, arguments: Map<String, Value>) -> AgentResult<String>;
}

type Handler = Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, AgentResult<String>> + Send + Sync>;

/// A function backed by a closure
#[derive(Clone)]
pub struct FnFunction {
    tool: Tool,
    handler: Handler,
}

impl FnFunction {
    pub fn new<F, Fut>(tool: Tool, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<String>> + Send + 'static,
    {
        Self {
            tool,
            handler: Arc::new(move |arguments: Map<String, Value>| handler(arguments).boxed()),
        }
    }

    pub fn from_sync<F>(tool: Tool, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> AgentResult<String> + Send + Sync + 'static,
    {
        Self::new(tool, move |arguments| std::future::ready(handler(arguments)))
    }
}

#[async_trait]
impl Function for FnFunction {
    fn definition(&self) -> &Tool {
        &self.tool
    }

    async fn call(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        (self.handler)(arguments).await
    }
}

impl fmt::Debug for FnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction")
            .field("tool", &self.tool.name)
            .finish_non_exhaustive()
    }
}

/// Functions available to the model, in registration order
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<Arc<dyn Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function, replacing any previous one with the same name
    pub fn register<F: Function + 'static>(&mut self, function: F) -> Option<Arc<dyn Function>> {
        self.register_arc(Arc::new(function))
    }

    pub fn register_arc(&mut self, function: Arc<dyn Function>) -> Option<Arc<dyn Function>> {
        let name = function.definition().name.clone();
        match self.functions.iter().position(|f| f.definition().name == name) {
            Some(index) => Some(std::mem::replace(&mut self.functions[index], function)),
            None => {
                self.functions.push(function);
                None
            }
        }
    }

    pub fn with<F: Function + 'static>(mut self, function: F) -> Self {
        self.register(function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions
            .iter()
            .find(|f| f.definition().name == name)
            .cloned()
    }

    pub fn tools(&self) -> Vec<&Tool> {
        self.functions.iter().map(|f| f.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.functions.iter().map(|f| &f.definition().name))
            .finish()
    }
}
