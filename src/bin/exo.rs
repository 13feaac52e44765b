use std::env;
use std::error::Error;

use exo::tools::web::{google_search_tool, scrape_website_tool};
use exo::{Agent, AgentEvent, GenerateOptions, Router, RouterConfig};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: exo [--agent] <backend/model> <prompt...>\n\
                     configuration is read from the JSON file named by EXO_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("exo=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    let agent_mode = args.first().is_some_and(|arg| arg == "--agent");
    if agent_mode {
        args.remove(0);
    }
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }
    let model_id = args.remove(0);
    let prompt = args.join(" ");

    let config_path = env::var("EXO_CONFIG").map_err(|_| format!("EXO_CONFIG is not set\n{USAGE}"))?;
    let router = Router::new(RouterConfig::load(config_path)?)?;

    if !agent_mode {
        let reply = router
            .generate(&model_id, &prompt, &GenerateOptions::default())
            .await?;
        println!("{reply}");
        return Ok(());
    }

    let (provider, model) = router.resolve(&model_id)?;
    let agent = Agent::builder()
        .shared_provider(provider)
        .tools([
            google_search_tool(env::var("SERPAPI_KEY").ok()),
            scrape_website_tool(),
        ])
        .options(GenerateOptions::new().model(model))
        .build()?;

    let stream = agent.run_stream(prompt.clone());
    futures_util::pin_mut!(stream);

    let mut steps = Vec::new();
    while let Some(event) = stream.next().await {
        match event? {
            AgentEvent::ModelOutput { step, text } => {
                eprintln!("model #{step}: {}", truncate(&text, 200));
            }
            AgentEvent::ToolCall {
                step,
                tool,
                parameters,
            } => {
                eprintln!(
                    "tool-call #{step} {tool}: {}",
                    truncate(&parameters.to_string(), 160)
                );
            }
            AgentEvent::ToolResult(record) => {
                eprintln!(
                    "tool-result #{} {} (error={}): {}",
                    record.step,
                    record.tool,
                    record.is_error,
                    truncate(&record.result.to_string(), 240)
                );
                steps.push(record);
            }
            AgentEvent::FinalAnswer {
                answer,
                termination,
            } => {
                let run = exo::AgentRun {
                    query: prompt.clone(),
                    steps: std::mem::take(&mut steps),
                    final_answer: answer,
                    termination,
                };
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
        }
    }

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
