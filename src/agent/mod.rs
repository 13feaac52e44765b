//! Bounded tool-orchestration loop.
//!
//! Each step asks the provider for a completion, looks for a
//! [`parser::TOOL_MARKER`] request in the text, dispatches the named tool and
//! folds its result into the next prompt. A response without a request is the
//! final answer. The step budget guarantees termination regardless of what the
//! model emits.

pub mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{AgentError, ToolError};
use crate::llm::{GenerateOptions, Provider};
use crate::tools::{Tool, render_catalog};

use parser::{PARAMETERS_MARKER, ParsedOutput, TOOL_MARKER, parse_model_output};

pub const DEFAULT_MAX_STEPS: usize = 5;
pub const STEP_LIMIT_ANSWER: &str = "Max steps reached without conclusion";
const DEFAULT_INSTRUCTIONS: &str = "You are a web research agent.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub instructions: String,
    /// Forwarded to every model call, including the per-call model.
    pub options: GenerateOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            options: GenerateOptions::default(),
        }
    }
}

/// States of one orchestration run.
///
/// `AwaitingModel` is initial. `DispatchingTool` always returns to
/// `AwaitingModel`; `TerminalAnswer` and `StepLimitReached` are final.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    ParsingOutput { output: String },
    DispatchingTool { request: ToolRequest },
    TerminalAnswer { answer: String },
    StepLimitReached,
}

/// A tool request found in model output, decoded or not.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Call {
        name: String,
        arguments: Value,
    },
    Malformed {
        name: Option<String>,
        reason: String,
    },
}

/// One tool dispatch. Failures are recorded as `{"error": ...}` results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub tool: String,
    pub parameters: Value,
    pub result: Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Answered,
    StepLimitReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRun {
    pub query: String,
    pub steps: Vec<StepRecord>,
    pub final_answer: String,
    pub termination: Termination,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ModelOutput {
        step: usize,
        text: String,
    },
    ToolCall {
        step: usize,
        tool: String,
        parameters: Value,
    },
    ToolResult(StepRecord),
    FinalAnswer {
        answer: String,
        termination: Termination,
    },
}

#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn Provider>>,
    tools: Vec<Tool>,
    config: AgentConfig,
}

impl AgentBuilder {
    pub fn provider<P>(mut self, provider: P) -> Self
    where
        P: Provider + 'static,
    {
        self.provider = Some(Arc::new(provider));
        self
    }

    pub fn shared_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.config.max_steps = max_steps;
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = instructions.into();
        self
    }

    pub fn options(mut self, options: GenerateOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let Some(provider) = self.provider else {
            return Err(AgentError::Config(
                "agent provider must be configured via AgentBuilder::provider(...)".to_string(),
            ));
        };

        let mut tool_map = HashMap::new();
        for tool in &self.tools {
            if tool_map
                .insert(tool.name().to_string(), tool.clone())
                .is_some()
            {
                return Err(AgentError::Config(format!(
                    "duplicate tool registered: {}",
                    tool.name()
                )));
            }
        }

        let system_prompt = render_system_prompt(&self.config.instructions, &self.tools);

        Ok(Agent {
            provider,
            tools: self.tools,
            tool_map,
            config: self.config,
            system_prompt,
        })
    }
}

pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Vec<Tool>,
    tool_map: HashMap<String, Tool>,
    config: AgentConfig,
    system_prompt: String,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Runs the loop to completion. Tool failures become error steps; only a
    /// provider failure aborts the run.
    pub async fn run(&self, query: impl Into<String>) -> Result<AgentRun, AgentError> {
        let query = query.into();
        let stream = self.run_stream(query.clone());
        futures_util::pin_mut!(stream);

        let mut steps = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                AgentEvent::ToolResult(record) => steps.push(record),
                AgentEvent::FinalAnswer {
                    answer,
                    termination,
                } => {
                    return Ok(AgentRun {
                        query,
                        steps,
                        final_answer: answer,
                        termination,
                    });
                }
                AgentEvent::ModelOutput { .. } | AgentEvent::ToolCall { .. } => {}
            }
        }

        // The stream always ends with a final answer unless it errored.
        Ok(AgentRun {
            query,
            steps,
            final_answer: STEP_LIMIT_ANSWER.to_string(),
            termination: Termination::StepLimitReached,
        })
    }

    pub fn run_stream(
        &self,
        query: impl Into<String>,
    ) -> impl Stream<Item = Result<AgentEvent, AgentError>> + '_ {
        let query = query.into();

        try_stream! {
            let mut state = LoopState::AwaitingModel;
            let mut step = 0;
            let mut current_prompt = query.clone();
            let mut steps: Vec<StepRecord> = Vec::new();

            loop {
                state = match state {
                    LoopState::AwaitingModel => {
                        if step >= self.config.max_steps {
                            LoopState::StepLimitReached
                        } else {
                            let prompt = self.render_prompt(&current_prompt, &steps);
                            tracing::trace!(step, prompt = %prompt, "rendered agent prompt");

                            let output = self
                                .provider
                                .generate(&prompt, &self.config.options)
                                .await?;
                            yield AgentEvent::ModelOutput { step, text: output.clone() };
                            LoopState::ParsingOutput { output }
                        }
                    }
                    LoopState::ParsingOutput { output } => match parse_model_output(&output) {
                        ParsedOutput::Answer => LoopState::TerminalAnswer { answer: output },
                        ParsedOutput::ToolRequest { name, arguments } => LoopState::DispatchingTool {
                            request: ToolRequest::Call { name, arguments },
                        },
                        ParsedOutput::Malformed { name, reason } => LoopState::DispatchingTool {
                            request: ToolRequest::Malformed { name, reason },
                        },
                    },
                    LoopState::DispatchingTool { request } => {
                        let record = match request {
                            ToolRequest::Call { name, arguments } => {
                                yield AgentEvent::ToolCall {
                                    step,
                                    tool: name.clone(),
                                    parameters: arguments.clone(),
                                };
                                self.dispatch(step, name, arguments).await
                            }
                            ToolRequest::Malformed { name, reason } => {
                                tracing::warn!(step, %reason, "malformed tool request");
                                let err = ToolError::MalformedCall(reason);
                                error_record(step, name.unwrap_or_default(), Value::Null, &err)
                            }
                        };

                        current_prompt = format!(
                            "Tool {} returned: {}\nWhat should we do next?",
                            record.tool, record.result
                        );
                        steps.push(record.clone());
                        yield AgentEvent::ToolResult(record);
                        step += 1;
                        LoopState::AwaitingModel
                    }
                    LoopState::TerminalAnswer { answer } => {
                        tracing::info!(steps = steps.len(), "agent produced a final answer");
                        yield AgentEvent::FinalAnswer {
                            answer,
                            termination: Termination::Answered,
                        };
                        break;
                    }
                    LoopState::StepLimitReached => {
                        tracing::info!(
                            steps = steps.len(),
                            max_steps = self.config.max_steps,
                            "agent step budget exhausted"
                        );
                        yield AgentEvent::FinalAnswer {
                            answer: STEP_LIMIT_ANSWER.to_string(),
                            termination: Termination::StepLimitReached,
                        };
                        break;
                    }
                };
            }
        }
    }

    async fn dispatch(&self, step: usize, name: String, arguments: Value) -> StepRecord {
        let Some(tool) = self.tool_map.get(&name) else {
            tracing::warn!(step, tool = %name, "model requested an unknown tool");
            let err = ToolError::NotFound(name.clone());
            return error_record(step, name, arguments, &err);
        };

        tracing::debug!(step, tool = %name, "dispatching tool");
        match tool.invoke(arguments.clone()).await {
            Ok(result) => StepRecord {
                step,
                tool: name,
                parameters: arguments,
                result,
                is_error: false,
            },
            Err(err) => {
                tracing::warn!(step, tool = %name, error = %err, "tool failed");
                error_record(step, name, arguments, &err)
            }
        }
    }

    fn render_prompt(&self, current_prompt: &str, steps: &[StepRecord]) -> String {
        let history = serde_json::to_string(steps).unwrap_or_else(|_| "[]".to_string());
        format!(
            "{}\n\nCurrent task: {current_prompt}\n\nConversation history: {history}",
            self.system_prompt
        )
    }
}

fn error_record(step: usize, tool: String, parameters: Value, err: &ToolError) -> StepRecord {
    StepRecord {
        step,
        tool,
        parameters,
        result: json!({"error": err.to_string()}),
        is_error: true,
    }
}

fn render_system_prompt(instructions: &str, tools: &[Tool]) -> String {
    if tools.is_empty() {
        return instructions.to_string();
    }

    format!(
        "{instructions}\n\nYou have access to these tools:\n\n{catalog}\n\n\
         When you need to use a tool, format your response like this:\n\
         {TOOL_MARKER} <tool_name>\n\
         {PARAMETERS_MARKER} <parameters as json>\n\n\
         After getting tool results, you can use another tool or provide final answer.\n\
         Always explain your thinking before using a tool.",
        catalog = render_catalog(tools),
    )
}

#[cfg(test)]
mod tests;
