use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::{OwnerId, TenantId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    pub owner_id: OwnerId,
    pub tenant_id: TenantId,
    pub title: String,
    pub body: String,
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push delivery request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push delivery rejected with status {0}")]
    Rejected(u16),
}

/// Mobile push delivery. Best effort: callers log failures and move on.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError>;
}

#[derive(Debug, Clone)]
pub struct HttpPushNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpPushNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PushNotifier for HttpPushNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        let response = self.client.post(&self.url).json(notification).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PushError::Rejected(response.status().as_u16()))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyPushNotifier;

#[async_trait]
impl PushNotifier for LogOnlyPushNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        tracing::info!(
            owner_id = %notification.owner_id,
            tenant_id = %notification.tenant_id,
            title = %notification.title,
            "push delivery not configured, notification logged only"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use actix_web::{App, HttpResponse, HttpServer, web};
    use serde_json::{Value, json};

    use super::{HttpPushNotifier, LogOnlyPushNotifier, PushError, PushNotification, PushNotifier};
    use crate::domain::models::{OwnerId, TenantId};

    fn notification() -> PushNotification {
        PushNotification {
            owner_id: OwnerId("user-1".to_string()),
            tenant_id: TenantId("t1".to_string()),
            title: "Failed!".to_string(),
            body: "Automatic remote stop failed".to_string(),
            data: json!({ "sessionId": 3 }),
        }
    }

    #[actix_web::test]
    async fn posts_notification_json_and_maps_rejections() {
        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let server = HttpServer::new(move || {
            let sink = Arc::clone(&sink);
            App::new()
                .route(
                    "/push",
                    web::post().to(move |body: web::Json<Value>| {
                        let sink = Arc::clone(&sink);
                        async move {
                            sink.lock().expect("sink lock").push(body.into_inner());
                            HttpResponse::Accepted().finish()
                        }
                    }),
                )
                .route(
                    "/down",
                    web::post().to(|| async { HttpResponse::ServiceUnavailable().finish() }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("test push endpoint should bind");
        let address = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let notifier = HttpPushNotifier::new(reqwest::Client::new(), format!("http://{address}/push"));
        notifier
            .send(&notification())
            .await
            .expect("push should be delivered");

        {
            let received = received.lock().expect("sink lock");
            assert_eq!(received.len(), 1);
            assert_eq!(received[0]["owner_id"], "user-1");
            assert_eq!(received[0]["title"], "Failed!");
            assert_eq!(received[0]["data"]["sessionId"], 3);
        }

        let down = HttpPushNotifier::new(reqwest::Client::new(), format!("http://{address}/down"));
        let result = down.send(&notification()).await;
        assert!(matches!(result, Err(PushError::Rejected(503))));

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn log_only_notifier_always_succeeds() {
        LogOnlyPushNotifier
            .send(&notification())
            .await
            .expect("log only delivery should succeed");
    }
}
