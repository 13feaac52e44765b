//! Behavioural contract every [`Provider`] must satisfy, run against the
//! scripted double and against the HTTP adapters pointed at a local fake
//! server.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ProviderConfig;
use crate::context::Role;
use crate::llm::mock::ScriptedProvider;
use crate::llm::{GenerateOptions, GeminiProvider, OllamaProvider, OpenAiProvider, Provider};

#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
    pub(crate) path: String,
    pub(crate) body: Value,
}

/// Single-route HTTP/1.1 responder that answers every request with one canned body.
pub(crate) struct FakeServer {
    pub(crate) base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeServer {
    pub(crate) async fn start(content_type: &'static str, body: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let body = body.clone();
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    serve_one(socket, content_type, &body, &recorded).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    pub(crate) async fn json(body: Value) -> Self {
        Self::start("application/json", body.to_string()).await
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

async fn serve_one(
    mut socket: TcpStream,
    content_type: &str,
    body: &str,
    recorded: &Mutex<Vec<RecordedRequest>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }

    let request_body = serde_json::from_slice(&buffer[header_end..]).unwrap_or(Value::Null);
    recorded.lock().expect("lock poisoned").push(RecordedRequest {
        path,
        body: request_body,
    });

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Runs the shared contract. `provider` must answer every call with `reply`.
pub(crate) async fn assert_provider_contract(provider: &dyn Provider, reply: &str) {
    let options = GenerateOptions::new();
    provider.clear_history();

    let text = provider.generate("ping", &options).await.expect("generate");
    assert_eq!(text, reply);
    assert!(provider.history().is_empty(), "generate must not touch history");

    let prompts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let outputs = provider
        .generate_batch(&prompts, &options)
        .await
        .expect("batch");
    assert_eq!(outputs, vec![reply.to_string(); 3]);
    assert!(provider.history().is_empty());

    let empty = provider.generate_batch(&[], &options).await.expect("empty batch");
    assert!(empty.is_empty());

    provider.set_system_prompt(Some("be brief".to_string()));
    let answer = provider.chat("hello", &options).await.expect("chat");
    assert_eq!(answer, reply);

    let history = provider.history();
    assert_eq!(history.len(), 2, "chat appends exactly two messages");
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, reply);

    provider.clear_history();
    assert!(provider.history().is_empty());
    assert_eq!(
        provider.context().system_prompt().as_deref(),
        Some("be brief")
    );
    provider.set_system_prompt(None);
}

#[tokio::test]
async fn scripted_provider_satisfies_contract() {
    let provider = ScriptedProvider::new("scripted", "m").replies(vec!["pong"; 5]);
    assert_provider_contract(&provider, "pong").await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 5);
    let chat = &requests[4];
    assert_eq!(chat.system.as_deref(), Some("be brief"));
    assert_eq!(chat.messages.len(), 1);
}

#[tokio::test]
async fn scripted_chat_failure_keeps_user_turn() {
    let provider = ScriptedProvider::new("scripted", "m").then_fail("backend down");

    let err = provider
        .chat("hello", &GenerateOptions::new())
        .await
        .expect_err("backend fails");
    assert!(err.to_string().contains("backend down"));

    let history = provider.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn openai_adapter_satisfies_contract() {
    let server = FakeServer::json(json!({
        "choices": [{"message": {"role": "assistant", "content": "pong"}}]
    }))
    .await;
    let provider = OpenAiProvider::new(
        ProviderConfig::new("gpt-4o-mini")
            .with_api_key("test-key")
            .with_base_url(&server.base_url),
    )
    .expect("constructs");

    assert_provider_contract(&provider, "pong").await;

    let requests = server.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().all(|r| r.path == "/chat/completions"));
    let chat = &requests[4].body;
    assert_eq!(chat["messages"][0]["role"], "system");
    assert_eq!(chat["messages"][1]["content"], "hello");
}

#[tokio::test]
async fn openai_adapter_concatenates_streamed_deltas() {
    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"po"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"ng"}}]}"#,
        "data: [DONE]",
    ]
    .join("\n\n");
    let server = FakeServer::start("text/event-stream", format!("{body}\n\n")).await;
    let provider = OpenAiProvider::new(
        ProviderConfig::new("gpt-4o-mini")
            .with_api_key("test-key")
            .with_base_url(&server.base_url)
            .stream(true),
    )
    .expect("constructs");

    assert_provider_contract(&provider, "pong").await;
    assert_eq!(server.requests()[0].body["stream"], true);
}

#[tokio::test]
async fn gemini_adapter_satisfies_contract() {
    let server = FakeServer::json(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": "pong"}]}}]
    }))
    .await;
    let provider = GeminiProvider::new(
        ProviderConfig::new("gemini-2.0-flash")
            .with_api_key("test-key")
            .with_base_url(&server.base_url),
    )
    .expect("constructs");

    assert_provider_contract(&provider, "pong").await;

    let requests = server.requests();
    assert_eq!(requests[0].path, "/models/gemini-2.0-flash:generateContent");
    assert_eq!(requests[0].body["generationConfig"]["maxOutputTokens"], 500);
    assert_eq!(
        requests[4].body["systemInstruction"]["parts"][0]["text"],
        "be brief"
    );
}

#[tokio::test]
async fn ollama_adapter_concatenates_ndjson_stream() {
    let body = [
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"po"},"done":false}"#,
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"ng"},"done":true}"#,
    ]
    .join("\n");
    let server = FakeServer::start("application/x-ndjson", body).await;
    let provider = OllamaProvider::new(
        ProviderConfig::new("llama3.2")
            .with_base_url(&server.base_url)
            .stream(true),
    )
    .expect("constructs");

    assert_provider_contract(&provider, "pong").await;
    assert!(server.requests().iter().all(|r| r.path == "/api/chat"));
}

#[tokio::test]
async fn per_call_model_reaches_the_wire() {
    let server = FakeServer::json(json!({
        "message": {"role": "assistant", "content": "ok"}, "done": true
    }))
    .await;
    let provider = OllamaProvider::new(
        ProviderConfig::new("llama3.2").with_base_url(&server.base_url),
    )
    .expect("constructs");

    provider
        .generate("hi", &GenerateOptions::new().model("qwen2.5").temperature(0.0))
        .await
        .expect("generate");
    provider
        .generate("hi", &GenerateOptions::new())
        .await
        .expect("generate");

    let requests = server.requests();
    assert_eq!(requests[0].body["model"], "qwen2.5");
    assert_eq!(requests[0].body["options"]["temperature"], 0.0);
    assert_eq!(requests[1].body["model"], "llama3.2");
    assert_eq!(provider.default_model(), "llama3.2");
}
