//! Tools
//!
//! Named, schema-described operations the generation step may invoke. The registry
//! dispatches calls by name and records every invocation of a query in an
//! [`InvocationLog`], which is where answer citations come from.

#[cfg(test)]
mod tests;

pub mod outline;
pub mod search;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::RagError;
use crate::generation::ToolCall;
use crate::index::Citation;

pub use outline::CourseOutlineTool;
pub use search::CourseSearchTool;

pub type ToolArguments = Map<String, Value>;

/// A tool as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub input_schema: Value,
}

/// Text returned to the model, plus the evidence behind it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub citations: Vec<Citation>,
    /// The tool ran but could not satisfy the request
    pub is_error: bool,
}

impl ToolOutput {
    #[inline]
    pub fn success(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            text: text.into(),
            citations,
            is_error: false,
        }
    }

    #[inline]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            is_error: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool {tool} failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: RagError,
    },
}

impl ToolError {
    #[inline]
    pub fn execution(tool: &str, source: RagError) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            source,
        }
    }
}

/// Deserialize tool arguments into their typed parameter struct
#[inline]
pub fn parse_arguments<T: DeserializeOwned>(
    tool: &str,
    arguments: &ToolArguments,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments.clone())).map_err(|e| {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: e.to_string(),
        }
    })
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    async fn handle(&self, arguments: &ToolArguments) -> Result<ToolOutput, ToolError>;
}

/// One tool call made while answering a query
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRecord {
    pub tool: String,
    pub arguments: ToolArguments,
    pub output: String,
    pub citations: Vec<Citation>,
    pub is_error: bool,
}

/// Tool calls made while answering one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationLog {
    records: Vec<ToolInvocationRecord>,
}

impl InvocationLog {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, record: ToolInvocationRecord) {
        self.records.push(record);
    }

    #[inline]
    pub fn records(&self) -> &[ToolInvocationRecord] {
        &self.records
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Citations of every successful call, deduplicated in first-seen order
    #[inline]
    pub fn citations(&self) -> Vec<Citation> {
        self.records
            .iter()
            .filter(|record| !record.is_error)
            .flat_map(|record| record.citations.iter())
            .unique_by(|c| (c.course.clone(), c.lesson_number, c.excerpt.clone()))
            .cloned()
            .collect()
    }

    /// Outputs of successful calls that produced evidence
    #[inline]
    pub fn evidence(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| !record.is_error && !record.citations.is_empty())
            .map(|record| record.output.as_str())
            .collect()
    }
}

/// Tools available to the model, keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its definition's name, replacing any previous one
    #[inline]
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name;
        debug!("Registering tool {}", name);
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!("Tool {} was registered twice, keeping the latest", name);
        }
    }

    /// Definitions of every registered tool, ordered by name
    #[inline]
    pub fn definitions(&self) -> Vec<Tool> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch `call` to its handler and record the invocation in `log`
    #[inline]
    pub async fn invoke(
        &self,
        call: &ToolCall,
        log: &mut InvocationLog,
    ) -> Result<ToolOutput, ToolError> {
        let Some(handler) = self.handlers.get(&call.name) else {
            warn!("Model requested unknown tool {}", call.name);
            log.record(ToolInvocationRecord {
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
                output: String::new(),
                citations: Vec::new(),
                is_error: true,
            });
            return Err(ToolError::NotFound {
                name: call.name.clone(),
            });
        };

        debug!("Invoking tool {} with {:?}", call.name, call.arguments);
        let result = handler.handle(&call.arguments).await;

        let record = match &result {
            Ok(output) => ToolInvocationRecord {
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
                output: output.text.clone(),
                citations: output.citations.clone(),
                is_error: output.is_error,
            },
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                ToolInvocationRecord {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    output: e.to_string(),
                    citations: Vec::new(),
                    is_error: true,
                }
            }
        };
        log.record(record);

        result
    }
}
