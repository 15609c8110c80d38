//! HTTP API
//!
//! - `GET /read?device=&register=&retries=&backoff=` reads one register
//! - `GET /` reads every configured notification once

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use kamstrup_core::client::MeterClient;
use kamstrup_core::config::Notification;
use kamstrup_core::protocol::{ProtocolError, RegisterValue};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    clients: Arc<BTreeMap<String, MeterClient>>,
    notifications: Arc<Vec<Notification>>,
}

impl AppState {
    pub fn new(
        clients: Arc<BTreeMap<String, MeterClient>>,
        notifications: Vec<Notification>,
    ) -> Self {
        Self {
            clients,
            notifications: Arc::new(notifications),
        }
    }

    /// Client for `device`; an empty name picks the only device if there is one
    fn client(&self, device: &str) -> Option<MeterClient> {
        if device.is_empty() && self.clients.len() == 1 {
            return self.clients.values().next().cloned();
        }
        self.clients.get(device).cloned()
    }
}

/// Longest backoff a `/read` caller may ask for between attempts
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Parameters of `/read`; anything missing, unparsable or out of range falls back to zero
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadParams {
    device: String,
    register: i16,
    retries: usize,
    backoff: Duration,
}

impl ReadParams {
    fn from_query(query: &HashMap<String, String>) -> Self {
        let number = |key: &str| query.get(key).map(|v| v.trim());
        Self {
            device: query.get("device").cloned().unwrap_or_default(),
            register: number("register")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            retries: number("retries")
                .and_then(|v| v.parse::<i8>().ok())
                .map(|v| v.max(0) as usize)
                .unwrap_or(0),
            backoff: number("backoff")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .filter(|backoff| *backoff <= MAX_BACKOFF)
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    name: String,
    reg_dec: String,
    reg_hex: String,
    value: f64,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/read", get(read_register))
        .with_state(state)
}

/// Serve the API until the process exits
pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("HTTP API listening on {}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn read_register(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let params = ReadParams::from_query(&query);
    info!("read request: {:?}", params);

    let Some(client) = state.client(&params.device) else {
        return (
            StatusCode::NOT_FOUND,
            ProtocolError::UnknownDevice(params.device).to_string(),
        )
            .into_response();
    };

    let (register, retries, backoff) = (params.register, params.retries, params.backoff);
    let outcome = tokio::task::spawn_blocking(move || {
        client.read_register_with_retry(register, retries, backoff)
    })
    .await;

    match outcome {
        Ok((Ok(reading), attempts)) => Json(ReadResponse {
            error: None,
            value: Some(format!("{:.4}", reading.value)),
            unit: Some(reading.unit),
            attempts: Some(attempts),
        })
        .into_response(),
        Ok((Err(e), attempts)) => {
            warn!("register {} failed after {} attempt(s): {}", register, attempts, e);
            error_response(e.to_string())
        }
        Err(e) => error_response(e.to_string()),
    }
}

fn error_response(error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ReadResponse {
            error: Some(error),
            value: None,
            unit: None,
            attempts: None,
        }),
    )
        .into_response()
}

async fn list_notifications(State(state): State<AppState>) -> Response {
    let mut values = Vec::with_capacity(state.notifications.len());

    for notification in state.notifications.iter() {
        let Some(client) = state.client(&notification.device) else {
            continue;
        };

        let register = notification.register;
        let reading: RegisterValue =
            match tokio::task::spawn_blocking(move || client.read_register(register)).await {
                Ok(reading) => reading,
                Err(e) => Err(ProtocolError::SerialError(e.to_string())),
            };

        let (value, error) = match reading {
            Ok(reading) => (reading.value, None),
            Err(e) => (0.0, Some(e.to_string())),
        };

        values.push(NotificationValue {
            error,
            name: notification.id.clone(),
            reg_dec: register.to_string(),
            reg_hex: format!("{:x}", register),
            value,
        });
    }

    values.sort_by(|a, b| a.name.cmp(&b.name));

    Json(serde_json::json!({ "notifications": values })).into_response()
}
