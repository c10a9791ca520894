use std::convert::Infallible;
use std::sync::Arc;

use actix_web::web::Bytes;
use actix_web::{HttpResponse, Responder, delete, get, post, put, web};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::adapters::live::{LiveConnectionRegistry, LiveEvent};
use crate::app::engine::{EngineError, MeteringEngine};
use crate::app::services::ServiceError;
use crate::domain::models::{NotificationConfig, NotificationKind, OwnerId, SessionId, TenantId};
use crate::domain::notification::validate_threshold;

pub const EXTERNAL_STOP_REASON: &str = "external_stop";

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<MeteringEngine>,
}

#[derive(Debug, Deserialize)]
pub struct MeterValuesRequest {
    pub session_id: i64,
    pub tenant_id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfigBody {
    pub notification_type: String,
    pub notification_value: String,
}

impl From<NotificationConfig> for NotificationConfigBody {
    fn from(config: NotificationConfig) -> Self {
        Self {
            notification_type: config.kind.as_str().to_string(),
            notification_value: config.value,
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(meter_values_endpoint)
        .service(get_notification_config_endpoint)
        .service(put_notification_config_endpoint)
        .service(delete_notification_config_endpoint)
        .service(session_stopped_endpoint)
        .service(live_events_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/meter-values")]
async fn meter_values_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<MeterValuesRequest>,
) -> impl Responder {
    let tenant = TenantId(body.tenant_id.clone());

    match state
        .engine
        .process_tick(&tenant, SessionId(body.session_id))
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(outcome.payload),
        Err(error) => {
            tracing::warn!(
                tenant_id = %tenant,
                session_id = body.session_id,
                error = %error,
                "meter values tick failed"
            );
            engine_error_response(error)
        }
    }
}

#[get("/sessions/{tenant_id}/{session_id}/notification-config")]
async fn get_notification_config_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<(String, i64)>,
) -> impl Responder {
    let (tenant, session_id) = path.into_inner();

    match state
        .engine
        .store()
        .notification_config(&TenantId(tenant), SessionId(session_id))
        .await
    {
        Ok(Some(config)) => HttpResponse::Ok().json(NotificationConfigBody::from(config)),
        Ok(None) => HttpResponse::Ok().json(NotificationConfigBody {
            notification_type: "NONE".to_string(),
            notification_value: "0".to_string(),
        }),
        Err(error) => service_error_response(error),
    }
}

#[put("/sessions/{tenant_id}/{session_id}/notification-config")]
async fn put_notification_config_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<(String, i64)>,
    body: web::Json<NotificationConfigBody>,
) -> impl Responder {
    let (tenant, session_id) = path.into_inner();
    let tenant = TenantId(tenant);
    let session_id = SessionId(session_id);

    let kind = match body.notification_type.parse::<NotificationKind>() {
        Ok(kind) => kind,
        Err(error) => return bad_request(error),
    };
    let config = NotificationConfig {
        kind,
        value: body.notification_value.trim().to_string(),
    };
    if let Err(error) = validate_threshold(&config) {
        return bad_request(error);
    }

    let store = state.engine.store();
    // a new threshold must be able to fire again
    if let Err(error) = store.clear_sent_notifications(&tenant, session_id).await {
        return service_error_response(error);
    }
    if let Err(error) = store
        .upsert_notification_config(&tenant, session_id, &config)
        .await
    {
        return service_error_response(error);
    }

    tracing::info!(
        tenant_id = %tenant,
        session_id = %session_id,
        kind = config.kind.as_str(),
        value = %config.value,
        "notification config saved"
    );

    HttpResponse::Ok().json(NotificationConfigBody::from(config))
}

#[delete("/sessions/{tenant_id}/{session_id}/notification-config")]
async fn delete_notification_config_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<(String, i64)>,
) -> impl Responder {
    let (tenant, session_id) = path.into_inner();

    match state
        .engine
        .store()
        .delete_notification_config(&TenantId(tenant), SessionId(session_id))
        .await
    {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "no notification config for session"
        })),
        Err(error) => service_error_response(error),
    }
}

#[post("/sessions/{tenant_id}/{session_id}/stopped")]
async fn session_stopped_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<(String, i64)>,
) -> impl Responder {
    let (tenant, session_id) = path.into_inner();
    let tenant = TenantId(tenant);
    let now = state.engine.clock().now();

    match state
        .engine
        .store()
        .mark_session_stopped(&tenant, SessionId(session_id), now, EXTERNAL_STOP_REASON)
        .await
    {
        Ok(true) => {
            tracing::info!(tenant_id = %tenant, session_id, "session stopped externally");
            HttpResponse::Ok().json(serde_json::json!({ "stopped": true }))
        }
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "no running session"
        })),
        Err(error) => service_error_response(error),
    }
}

#[get("/live/{tenant_id}/{owner_id}")]
async fn live_events_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (tenant, owner) = path.into_inner();
    let (owner, tenant) = (OwnerId(owner), TenantId(tenant));
    let (sender, receiver) = unbounded_channel::<LiveEvent>();
    let registry = Arc::clone(state.engine.live());
    registry.register(&owner, &tenant, sender);

    let subscription = LiveSubscription {
        receiver,
        registry,
        owner,
        tenant,
    };

    let opening = futures::stream::once(async {
        Ok::<_, Infallible>(Bytes::from_static(b": connected\n\n"))
    });
    let events = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.receiver.recv().await?;
        Some((Ok(Bytes::from(format_server_sent_event(&event))), subscription))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(opening.chain(events))
}

/// Receiving end of one SSE client; releases its registry entry once the
/// response stream is dropped.
struct LiveSubscription {
    receiver: UnboundedReceiver<LiveEvent>,
    registry: Arc<dyn LiveConnectionRegistry>,
    owner: OwnerId,
    tenant: TenantId,
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.receiver.close();
        self.registry.release(&self.owner, &self.tenant);
    }
}

fn format_server_sent_event(event: &LiveEvent) -> String {
    format!("event: {}\ndata: {}\n\n", event.event, event.payload)
}

fn bad_request(error: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "title": "Invalid parameters",
        "msg": error.to_string(),
    }))
}

fn engine_error_response(error: EngineError) -> HttpResponse {
    match error {
        EngineError::MissingObject(_) => HttpResponse::BadRequest().json(serde_json::json!({
            "title": "Missing object",
            "msg": error.to_string(),
        })),
        EngineError::Store(error) => service_error_response(error),
    }
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::DbLockPoisoned => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        ServiceError::Database(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}
