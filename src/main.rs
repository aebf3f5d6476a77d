use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chat_gateway::clock::{Clock, SystemClock};
use chat_gateway::config::Args;
use chat_gateway::dispatcher::Dispatcher;
use chat_gateway::persistence::ConversationStore;
use chat_gateway::rate_limit::{RateLimitRules, RateLimiter};
use chat_gateway::state::AppState;

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_gateway=info")),
        )
        .init();

    // parse cli arguments
    let args = Args::parse();

    let pool = args.credential_pool()?;
    if pool.is_empty() {
        tracing::warn!("dev mode without API keys; chat turns will use the fallback reply");
    }
    let generation = args.generation()?;
    let chat_limit = args.chat_rate_limit()?;

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let keys_loaded = pool.len();

    // creating shared state
    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(client.clone(), args.dispatcher_config(), pool, clock.clone()),
        store: ConversationStore::new(
            client,
            args.supabase_url.as_deref(),
            args.supabase_key.as_deref(),
        ),
        rate_limiter: Arc::new(
            RateLimiter::new(RateLimitRules::new(chat_limit), clock.clone())
                .with_sweep_probability(args.sweep_probability),
        ),
        generation,
        clock,
    });

    tracing::info!(
        keys = keys_loaded,
        upstream = %args.upstream_url,
        model = %args.model,
        cooldown_secs = args.cooldown_secs,
        persistence = state.store.is_enabled(),
        "chat dispatcher ready"
    );
    tracing::info!(
        max_requests = chat_limit.max_requests,
        window_secs = chat_limit.window.as_secs(),
        block_secs = chat_limit.block_duration.as_secs(),
        "chat rate limit"
    );

    let app = chat_gateway::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
