//! Persistent session and user-state walkthrough.
//!
//! Run with: cargo run -p session-demo [DATABASE_URL]
//!
//! The URL defaults to `AGENT_SESSIONS_DATABASE_URL`, then to `memory://`.
//! Pass `sqlite://my_agent_data.db` and run twice to see history survive.

use std::sync::Arc;

use agent_sessions_core::{SessionKey, StoreConfig};
use agent_sessions_runner::{
    Agent, CountInvocationPlugin, LoggingPlugin, ModelResponse, Runner, RunnerConfig,
    ScriptedModel, builtin, final_reply,
};
use agent_sessions_store::SessionService;
use anyhow::Context;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const APP_NAME: &str = "default";
const USER_ID: &str = "default";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(url) => StoreConfig::from_url(&url)?,
        None => StoreConfig::from_env()?,
    };
    tracing::info!(?config, durable = config.is_durable(), "opening session store");
    let service = SessionService::from_config(&config)
        .await
        .context("failed to open session store")?;

    let model = ScriptedModel::new(
        "scripted-flash-lite",
        [
            ModelResponse::text("I'm doing well! I don't know your name yet."),
            ModelResponse::call("save_userinfo", json!({"user_name": "Sam", "country": "Poland"})),
            ModelResponse::text("Nice to meet you, Sam from Poland!"),
            ModelResponse::call("retrieve_userinfo", json!({})),
            ModelResponse::text("Your name is Sam and you are from Poland."),
        ],
    );
    let agent = Agent::builder("text_chat_bot", Arc::new(model))
        .description("A text chatbot with user memory")
        .instruction("Use save_userinfo and retrieve_userinfo to remember the user.")
        .tool(builtin::save_userinfo_tool())
        .tool(builtin::retrieve_userinfo_tool())
        .build()?;

    let counter = Arc::new(CountInvocationPlugin::new());
    let runner = Runner::new(
        Arc::new(agent),
        service.store(),
        RunnerConfig {
            app_name: APP_NAME.to_string(),
            ..RunnerConfig::default()
        },
    )
    .with_plugin(counter.clone())
    .with_plugin(Arc::new(LoggingPlugin));

    let first = SessionKey::new(APP_NAME, USER_ID, "state-demo-session");
    service.open(&first).await?;
    for message in [
        "Hi there, how are you doing today? What is my name?",
        "My name is Sam. I'm from Poland.",
    ] {
        converse(&runner, &first, message).await?;
    }

    let second = SessionKey::new(APP_NAME, USER_ID, "new-isolated-session");
    service.open(&second).await?;
    converse(&runner, &second, "What is my name?").await?;

    for key in [&first, &second] {
        println!("\n--- state of {} ---", key.session_id);
        for (name, value) in service.state(key).await? {
            println!("{name} = {value}");
        }
    }

    println!("\n--- transcript ---");
    for (key, line) in service.transcript(APP_NAME, USER_ID).await? {
        println!("[{}] {}: {}", key.session_id, line.author, line.content);
    }

    let counts = counter.counts();
    println!(
        "\nagent runs: {}, model requests: {}, tool calls: {}",
        counts.agent_runs, counts.model_requests, counts.tool_calls
    );
    Ok(())
}

async fn converse(runner: &Runner, key: &SessionKey, message: &str) -> anyhow::Result<()> {
    println!("\nUser [{}] > {message}", key.session_id);
    let events = runner.run(&key.user_id, &key.session_id, message).await?;
    if let Some(reply) = final_reply(&events) {
        println!("{} > {reply}", runner.agent().name());
    }
    Ok(())
}
