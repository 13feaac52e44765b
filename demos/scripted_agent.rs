use std::collections::VecDeque;
use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use exo::llm::CompletionRequest;
use exo::{
    Agent, AgentEvent, ChatContext, GenerateOptions, InMemoryVectorStore, Provider,
    ProviderError, Router, SamplingParams, Tool, ToolError, VectorStore,
};
use futures_util::StreamExt;
use serde_json::{Value, json};

struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    defaults: SamplingParams,
    context: Arc<ChatContext>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|reply| reply.to_string()).collect()),
            defaults: SamplingParams::default(),
            context: Arc::new(ChatContext::new()),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    fn defaults(&self) -> &SamplingParams {
        &self.defaults
    }

    fn context(&self) -> &ChatContext {
        &self.context
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
        self.replies
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| ProviderError::Response("scripted provider exhausted".to_string()))
    }
}

fn add_tool() -> Tool {
    Tool::new("add", |args: Value| async move {
        let a = args
            .get("a")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::Execution("a missing".to_string()))?;
        let b = args
            .get("b")
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::Execution("b missing".to_string()))?;
        Ok(json!(a + b))
    })
    .describe("Add two integers")
    .with_parameters(json!({
        "a": {"type": "integer"},
        "b": {"type": "integer"}
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let agent = Agent::builder()
        .provider(ScriptedProvider::new(&[
            "I need arithmetic.\nUSE_TOOL: add\nPARAMETERS: {\"a\": 2, \"b\": 3}",
            "2 + 3 = 5",
        ]))
        .tool(add_tool())
        .build()?;

    let run = agent.run("What is 2 + 3?").await?;
    println!("run: {}", serde_json::to_string_pretty(&run)?);

    let streaming_agent = Agent::builder()
        .provider(ScriptedProvider::new(&[
            "USE_TOOL: add\nPARAMETERS: {\"a\": 10, \"b\": 7}",
            "10 + 7 = 17",
        ]))
        .tool(add_tool())
        .build()?;

    let stream = streaming_agent.run_stream("What is 10 + 7?");
    futures_util::pin_mut!(stream);
    while let Some(event) = stream.next().await {
        match event? {
            AgentEvent::ModelOutput { step, text } => println!("model #{step}: {text}"),
            AgentEvent::ToolCall {
                step,
                tool,
                parameters,
            } => println!("tool call #{step} {tool}: {parameters}"),
            AgentEvent::ToolResult(record) => println!(
                "tool result #{} {}: {} (error={})",
                record.step, record.tool, record.result, record.is_error
            ),
            AgentEvent::FinalAnswer {
                answer,
                termination,
            } => println!("final ({termination:?}): {answer}"),
        }
    }

    let router = Router::builder()
        .register(
            "scripted",
            Arc::new(ScriptedProvider::new(&["routed reply"])),
            ["scripted-1"],
        )
        .build();
    let reply = router
        .chat("scripted/scripted-1", "hello", &GenerateOptions::default())
        .await?;
    println!("router: {reply} (models: {:?})", router.configured_models());

    let store = InMemoryVectorStore::new();
    store
        .add(vec![vec![1.0, 0.0], vec![0.0, 1.0]], None)
        .await?;
    let nearest = store.query_scored(&[0.9, 0.1], 1).await?;
    println!("nearest: {nearest:?}");

    Ok(())
}
