//! Gateway HTTP server: health check and LINE webhook callback.

use crate::channels::{InboundMessage, LineClient, ReplySender, WebhookPayload};
use crate::config::{Config, Credentials};
use crate::dispatch::{DispatchOptions, Dispatcher, DEFAULT_PERSONA};
use crate::llm::{GeminiClient, GenerationConfig, TextGenerator};
use crate::session::Conversation;
use crate::signature::{self, SIGNATURE_HEADER};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

const INBOUND_QUEUE: usize = 64;

/// Extra time after the model timeout for in-flight reply calls at shutdown.
const REPLY_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct GatewayState {
    channel_secret: Arc<str>,
    /// Verified messages go here; the processor task spawns one dispatch task per message.
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl GatewayState {
    /// Start the processor task for `dispatcher` and return the state plus the task handle.
    /// Must be called inside a tokio runtime.
    pub fn new(channel_secret: &str, dispatcher: Arc<Dispatcher>) -> (Self, JoinHandle<()>) {
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
        let processor = tokio::spawn(process_inbound(dispatcher, inbound_rx));
        let state = Self {
            channel_secret: Arc::from(channel_secret),
            inbound_tx,
        };
        (state, processor)
    }
}

/// Receive verified messages until every sender is dropped. Each message runs in its own task
/// so one slow model call does not hold up the others. Once the channel closes, the tasks
/// still running are awaited so acknowledged messages get their reply.
async fn process_inbound(dispatcher: Arc<Dispatcher>, mut inbound_rx: mpsc::Receiver<InboundMessage>) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else { break };
                let dispatcher = dispatcher.clone();
                tasks.spawn(async move {
                    dispatcher.handle(msg).await;
                });
            }
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = done {
                    log::warn!("dispatch task failed: {}", e);
                }
            }
        }
    }
    if !tasks.is_empty() {
        log::info!("waiting for {} in-flight repl(ies)", tasks.len());
    }
    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            log::warn!("dispatch task failed: {}", e);
        }
    }
    log::debug!("inbound processor stopped");
}

/// Routes: `GET /` health, `POST /callback` webhook.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/callback", post(line_callback))
        .with_state(state)
}

/// Build the model and LINE clients from resolved credentials and config.
pub fn build_dispatcher(config: &Config, credentials: &Credentials) -> Dispatcher {
    let gemini = GeminiClient::new(
        credentials.gemini_api_key.clone(),
        config.gemini.model.clone(),
        GenerationConfig {
            temperature: config.gemini.temperature,
            max_output_tokens: config.gemini.max_output_tokens,
        },
        config.gemini.api_base.clone(),
    );
    let line = LineClient::new(
        credentials.channel_access_token.clone(),
        config.line.api_base.clone(),
    );
    let generator: Arc<dyn TextGenerator> = Arc::new(gemini);
    let sender: Arc<dyn ReplySender> = Arc::new(line);
    let persona = config
        .bot
        .persona
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PERSONA)
        .to_string();
    Dispatcher::new(
        generator,
        sender,
        Conversation::new(config.bot.session_mode, config.bot.max_history_turns),
        DispatchOptions {
            persona,
            timeout: Duration::from_secs(config.gemini.timeout_secs.max(1)),
        },
    )
}

/// Run the gateway server; binds to config.server.bind:config.server.port.
/// Fails before binding when a credential is missing. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let credentials = Credentials::resolve(&config)?;
    let dispatcher = Arc::new(build_dispatcher(&config, &credentials));
    log::info!(
        "model {} (session mode: {:?}, timeout {}s)",
        config.gemini.model,
        dispatcher.conversation().mode(),
        config.gemini.timeout_secs
    );
    let (state, processor) = GatewayState::new(&credentials.channel_secret, dispatcher);
    let app = router(state);

    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    // The router (and its inbound sender) is gone now, so the processor drains and exits.
    let drain = Duration::from_secs(config.gemini.timeout_secs.max(1)) + REPLY_DRAIN_GRACE;
    match tokio::time::timeout(drain, processor).await {
        Ok(Ok(())) => log::info!("pending replies finished"),
        Ok(Err(e)) => log::warn!("inbound processor failed: {}", e),
        Err(_) => log::warn!("pending replies still running after {:?}, exiting", drain),
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// POST /callback — verifies `x-line-signature` over the raw body, then queues text messages.
/// Once the signature passes the answer is always 200 so LINE does not redeliver.
async fn line_callback(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = signature::verify(&state.channel_secret, &body, provided) {
        log::warn!("callback rejected: {}", e);
        return (StatusCode::BAD_REQUEST, "Invalid signature");
    }
    let payload = match WebhookPayload::parse(&body) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("callback: signed body is not a webhook payload: {}", e);
            return (StatusCode::OK, "OK");
        }
    };
    let messages = payload.into_text_messages();
    log::debug!("callback: {} text message(s)", messages.len());
    for msg in messages {
        if state.inbound_tx.send(msg).await.is_err() {
            log::error!("callback: inbound processor is gone, dropping message");
            break;
        }
    }
    (StatusCode::OK, "OK")
}

/// GET / returns a simple health JSON (for uptime checks).
async fn health_http() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "message": "LINE Gemini Bot is running.",
    }))
}
