use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;

use super::*;
use crate::error::ProviderError;
use crate::llm::mock::ScriptedProvider;

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
    .describe("add two numbers")
    .with_parameters(json!({
        "a": {"type": "integer"},
        "b": {"type": "integer"}
    }))
}

fn fail_tool() -> Tool {
    Tool::new("fail", |_args| async {
        Err(ToolError::Execution("boom".to_string()))
    })
    .describe("always fail")
}

fn agent_with(provider: &Arc<ScriptedProvider>, max_steps: usize) -> Agent {
    Agent::builder()
        .shared_provider(provider.clone())
        .tool(add_tool())
        .tool(fail_tool())
        .max_steps(max_steps)
        .build()
        .expect("agent builds")
}

#[tokio::test]
async fn plain_answer_finishes_without_steps() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies(["Paris."]));
    let agent = agent_with(&provider, 5);

    let run = agent.run("capital of France?").await.expect("run succeeds");

    assert_eq!(run.query, "capital of France?");
    assert!(run.steps.is_empty());
    assert_eq!(run.final_answer, "Paris.");
    assert_eq!(run.termination, Termination::Answered);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let prompt = &requests[0].messages[0].content;
    assert!(prompt.starts_with("You are a web research agent."));
    assert!(prompt.contains("1. add: add two numbers"));
    assert!(prompt.contains("Current task: capital of France?"));
    assert!(prompt.ends_with("Conversation history: []"));
}

#[tokio::test]
async fn tool_result_feeds_the_next_prompt() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies([
        "Let me add.\nUSE_TOOL: add\nPARAMETERS: {\"a\": 2, \"b\": 3}",
        "The sum is 5.",
    ]));
    let agent = agent_with(&provider, 5);

    let run = agent.run("what is 2 + 3?").await.expect("run succeeds");

    assert_eq!(run.final_answer, "The sum is 5.");
    assert_eq!(run.termination, Termination::Answered);
    assert_eq!(
        run.steps,
        vec![StepRecord {
            step: 0,
            tool: "add".to_string(),
            parameters: json!({"a": 2, "b": 3}),
            result: json!(5),
            is_error: false,
        }]
    );

    let second = &provider.requests()[1].messages[0].content;
    assert!(second.contains("Current task: Tool add returned: 5\nWhat should we do next?"));
    assert!(second.contains(r#"Conversation history: [{"step":0,"tool":"add","parameters":{"a":2,"b":3},"result":5}]"#));
}

#[tokio::test]
async fn step_budget_bounds_a_model_that_never_answers() {
    let request = "USE_TOOL: add\nPARAMETERS: {\"a\": 1, \"b\": 1}";
    let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies([request; 5]));
    let agent = agent_with(&provider, 3);

    let run = agent.run("loop forever").await.expect("run succeeds");

    assert_eq!(run.steps.len(), 3);
    assert_eq!(run.final_answer, STEP_LIMIT_ANSWER);
    assert_eq!(run.termination, Termination::StepLimitReached);
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test]
async fn zero_step_budget_never_calls_the_model() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "m"));
    let agent = agent_with(&provider, 0);

    let run = agent.run("anything").await.expect("run succeeds");

    assert_eq!(run.termination, Termination::StepLimitReached);
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn tool_failures_become_error_steps() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies([
        "USE_TOOL: search_everything\nPARAMETERS: {}",
        "USE_TOOL: add\nPARAMETERS: {a: 1}",
        "USE_TOOL: fail\nPARAMETERS: {}",
        "I could not finish.",
    ]));
    let agent = agent_with(&provider, 5);

    let run = agent.run("try things").await.expect("run succeeds");

    assert_eq!(run.steps.len(), 3);
    assert!(run.steps.iter().all(|step| step.is_error));
    assert_eq!(
        run.steps[0].result,
        json!({"error": "unknown tool: search_everything"})
    );
    assert_eq!(run.steps[1].tool, "add");
    assert!(
        run.steps[1].result["error"]
            .as_str()
            .unwrap_or_default()
            .starts_with("malformed tool call:")
    );
    assert_eq!(
        run.steps[2].result,
        json!({"error": "tool execution failed: boom"})
    );
    assert_eq!(run.final_answer, "I could not finish.");
    assert_eq!(run.termination, Termination::Answered);
}

#[tokio::test]
async fn nameless_tool_request_is_recorded_without_a_tool_call() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies([
        "USE_TOOL:\nPARAMETERS: {}",
        "Giving up.",
    ]));
    let agent = agent_with(&provider, 5);

    let events = agent
        .run_stream("do something")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert!(!events.iter().any(|event| matches!(event, AgentEvent::ToolCall { .. })));
    let record = events
        .iter()
        .find_map(|event| match event {
            AgentEvent::ToolResult(record) => Some(record.clone()),
            _ => None,
        })
        .expect("error step recorded");
    assert_eq!(record.step, 0);
    assert_eq!(record.tool, "");
    assert_eq!(record.parameters, Value::Null);
    assert!(record.is_error);
    assert_eq!(
        record.result,
        json!({"error": "malformed tool call: tool name is missing after USE_TOOL:"})
    );
    assert_eq!(
        events.last(),
        Some(&AgentEvent::FinalAnswer {
            answer: "Giving up.".to_string(),
            termination: Termination::Answered,
        })
    );
}

#[tokio::test]
async fn provider_error_aborts_the_run() {
    let provider = Arc::new(
        ScriptedProvider::new("scripted", "m")
            .replies(["USE_TOOL: add\nPARAMETERS: {\"a\": 1, \"b\": 2}"])
            .then_fail("connection reset"),
    );
    let agent = agent_with(&provider, 5);

    let err = agent.run("add").await.expect_err("provider fails");
    assert!(matches!(err, AgentError::Provider(ProviderError::Request(message)) if message == "connection reset"));
}

#[tokio::test]
async fn configured_options_reach_every_model_call() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "default-model").replies([
        "USE_TOOL: add\nPARAMETERS: {\"a\": 1, \"b\": 2}",
        "3",
    ]));
    let agent = Agent::builder()
        .shared_provider(provider.clone())
        .tool(add_tool())
        .instructions("You are a calculator.")
        .options(GenerateOptions::new().model("bigger-model").temperature(0.1))
        .build()
        .expect("agent builds");

    agent.run("1 + 2").await.expect("run succeeds");

    for request in provider.requests() {
        assert_eq!(request.model, "bigger-model");
        assert_eq!(request.sampling.temperature, Some(0.1));
        assert!(request.system.is_none());
        assert!(request.messages[0].content.starts_with("You are a calculator."));
    }
}

#[tokio::test]
async fn stream_emits_events_in_order() {
    let provider = Arc::new(ScriptedProvider::new("scripted", "m").replies([
        "USE_TOOL: add\nPARAMETERS: {\"a\": 2, \"b\": 2}",
        "four",
    ]));
    let agent = agent_with(&provider, 5);

    let events = agent
        .run_stream("2 + 2")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert_eq!(events.len(), 5);
    assert!(matches!(&events[0], AgentEvent::ModelOutput { step: 0, .. }));
    assert_eq!(
        events[1],
        AgentEvent::ToolCall {
            step: 0,
            tool: "add".to_string(),
            parameters: json!({"a": 2, "b": 2}),
        }
    );
    assert!(matches!(&events[2], AgentEvent::ToolResult(record) if record.result == json!(4)));
    assert_eq!(
        events[3],
        AgentEvent::ModelOutput {
            step: 1,
            text: "four".to_string()
        }
    );
    assert_eq!(
        events[4],
        AgentEvent::FinalAnswer {
            answer: "four".to_string(),
            termination: Termination::Answered,
        }
    );
}

#[test]
fn build_rejects_missing_provider_and_duplicate_tools() {
    let err = Agent::builder().build().err().expect("no provider");
    assert!(matches!(err, AgentError::Config(_)));

    let err = Agent::builder()
        .provider(ScriptedProvider::new("scripted", "m"))
        .tools([add_tool(), add_tool()])
        .build()
        .err()
        .expect("duplicate tool");
    assert!(err.to_string().contains("duplicate tool registered: add"));
}

#[test]
fn step_records_serialize_error_flag_only_when_set() {
    let ok = StepRecord {
        step: 0,
        tool: "add".to_string(),
        parameters: json!({}),
        result: json!(1),
        is_error: false,
    };
    assert!(serde_json::to_value(&ok).expect("serializes").get("is_error").is_none());

    let failed = StepRecord {
        is_error: true,
        ..ok
    };
    assert_eq!(
        serde_json::to_value(&failed).expect("serializes")["is_error"],
        json!(true)
    );
    assert_eq!(
        serde_json::to_value(Termination::StepLimitReached).expect("serializes"),
        json!("step_limit_reached")
    );
}
