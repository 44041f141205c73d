//! HTTP surface: health check and the Telegram webhook.

use crate::commands::{handle_command, Command};
use crate::dispatcher::{ChatType, Dispatcher, OutboundReply, ReplySink};
use crate::security::{verify_webhook_secret, WEBHOOK_SECRET_HEADER};
use crate::settings::SettingsService;
use crate::telegram::{to_inbound_event, Update};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub settings: SettingsService,
    pub dispatcher: Arc<Dispatcher>,
    /// Where command replies go
    pub replies: Arc<dyn ReplySink>,
    pub webhook_secret: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server error")
}

async fn health() -> &'static str {
    "Bot is running"
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_webhook_secret(state.webhook_secret.as_deref(), provided) {
        warn!("Rejected webhook call {} with bad secret", update.update_id);
        return StatusCode::UNAUTHORIZED;
    }

    // Telegram redelivers unacknowledged updates, so answer before translating
    tokio::spawn(async move {
        if let Err(e) = route_update(&state, update).await {
            error!("Failed to handle update: {:#}", e);
        }
    });

    StatusCode::OK
}

/// Send one update to the command handler or the dispatcher.
pub async fn route_update(state: &AppState, update: Update) -> Result<()> {
    let Some(event) = to_inbound_event(&update) else {
        debug!("Ignoring update {}", update.update_id);
        return Ok(());
    };

    if let Some(command) = Command::parse(&event.text) {
        debug!("Command {:?} from user {}", command, event.sender_id);
        let text = handle_command(&state.settings, event.sender_id, command).await;
        return state
            .replies
            .send_reply(&OutboundReply {
                chat_id: event.chat_id,
                reply_to_message_id: event.message_id,
                body_text: text,
            })
            .await
            .context("Failed to send command reply");
    }

    if event.chat_type == ChatType::Group {
        let report = state.dispatcher.dispatch(&event, None).await;
        debug!("Message {} finished as {:?}", event.message_id, report.state);
    }
    Ok(())
}
