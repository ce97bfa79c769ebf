//! Prospector Webhook - 回调接收服务
//!
//! 在守护循环之外额外暴露 HTTP 入口：供应商把 Reveal 结果 POST 到
//! /callback，GET /callback 为订阅验证握手。投递一经受理立即 200，
//! 对账失败只在内部重试，绝不让供应商重试风暴。

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use prospector::config::load_config;
use prospector::core::{IngestOutcome, RevealEngine, ShutdownManager};
use prospector::model::CallbackDelivery;
use prospector::provider::create_provider_from_config;
use prospector::store::{ContactPersistence, ContactStore, InMemoryContactStore};

/// Webhook 服务状态
struct WebhookState {
    engine: Arc<RevealEngine>,
    verify_token: Option<String>,
}

/// 验证握手参数
#[derive(Debug, Deserialize)]
struct VerifyQuery {
    token: Option<String>,
    challenge: Option<String>,
}

/// GET /callback - 供应商订阅验证
async fn callback_verify(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, StatusCode> {
    match &state.verify_token {
        Some(expected) if query.token.as_deref() != Some(expected.as_str()) => {
            Err(StatusCode::FORBIDDEN)
        }
        _ => Ok(query.challenge.unwrap_or_default()),
    }
}

/// POST /callback - 接收一条 Reveal 结果投递
async fn callback_receive(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    Json(delivery): Json<CallbackDelivery>,
) -> StatusCode {
    let presented = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok());

    match state.engine.ingest_callback(delivery, presented).await {
        IngestOutcome::Rejected => StatusCode::BAD_REQUEST,
        // 已解析或幂等空操作都即时确认
        IngestOutcome::Reconciled | IngestOutcome::IgnoredUnknown => StatusCode::OK,
    }
}

fn create_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/callback", get(callback_verify).post(callback_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prospector::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        prospector::config::AppConfig::default()
    });

    let store = Arc::new(InMemoryContactStore::new());
    let persistence = ContactPersistence::new(&cfg.store.snapshot_path);
    if let Ok(contacts) = persistence.load() {
        if !contacts.is_empty() {
            tracing::info!(rows = contacts.len(), "Loaded contact snapshot");
            store.load_snapshot(contacts).await;
        }
    }

    let provider = create_provider_from_config(&cfg);
    let engine = Arc::new(RevealEngine::new(
        cfg.clone(),
        store.clone() as Arc<dyn ContactStore>,
        provider,
    ));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    // 调度/回收循环与 HTTP 入口并行运行
    let loop_engine = Arc::clone(&engine);
    let loop_token = shutdown.token();
    tokio::spawn(async move {
        loop_engine.run(loop_token).await;
    });

    let state = Arc::new(WebhookState {
        engine,
        verify_token: cfg.callback.verify_token.clone(),
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.callback.bind_addr).await?;
    tracing::info!(addr = %cfg.callback.bind_addr, "Webhook listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let token = shutdown.token();
            async move { token.cancelled().await }
        })
        .await?;

    persistence.save(&store.snapshot().await)?;
    tracing::info!("Webhook stopped, snapshot saved");
    Ok(())
}
