pub mod web;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use crate::error::ToolError;

type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

/// A named async callable exposed to a model.
///
/// The parameter schema is documentation for the model only; `invoke` forwards
/// arguments to the handler untouched and never validates them.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.name, self.description, self.parameters)
    }
}

impl Tool {
    /// An empty `name` falls back to the handler's function name.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let name = name.into();
        let name = if name.trim().is_empty() {
            handler_name::<F>()
        } else {
            name
        };

        Self {
            description: format!("Tool {name}"),
            name,
            parameters: json!({}),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn from_fn<F, Fut>(handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new("", handler)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = if description.trim().is_empty() {
            format!("Tool {}", self.name)
        } else {
            description
        };
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        (self.handler)(args).await
    }
}

/// Last path segment of the handler's type name. Closures resolve to their
/// enclosing function.
fn handler_name<F>() -> String {
    let full = std::any::type_name::<F>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .find(|segment| !segment.is_empty() && !segment.starts_with('{'))
        .unwrap_or("tool")
        .to_string()
}

/// Numbered listing of tools in the layout used by agent prompts.
pub fn render_catalog(tools: &[Tool]) -> String {
    tools
        .iter()
        .enumerate()
        .map(|(index, tool)| {
            format!(
                "{}. {}: {}\n   Parameters: {}",
                index + 1,
                tool.name,
                tool.description,
                tool.parameters
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
