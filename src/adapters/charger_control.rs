use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::{CredentialId, SessionId, TenantId};

const ACCEPTED_STATUS: &str = "Accepted";

/// Remote stop of one charging transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCommand {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub credential: CredentialId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReply {
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ChargerControlError {
    #[error("charger control request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait ChargerControl: Send + Sync {
    async fn stop(&self, command: &StopCommand) -> Result<StopReply, ChargerControlError>;
}

#[derive(Debug, Serialize)]
struct RemoteStopBody<'a> {
    transaction_id: i64,
    stop_id_tag: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteStopResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

/// Client of the OCPP gateway's remote stop endpoint.
#[derive(Debug, Clone)]
pub struct HttpChargerControl {
    client: reqwest::Client,
    stop_url: String,
}

impl HttpChargerControl {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            stop_url: format!("{}/chargers/remote_stop", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ChargerControl for HttpChargerControl {
    async fn stop(&self, command: &StopCommand) -> Result<StopReply, ChargerControlError> {
        let response = self
            .client
            .post(&self.stop_url)
            .header("tenant_id", command.tenant_id.0.as_str())
            .json(&RemoteStopBody {
                transaction_id: command.session_id.0,
                stop_id_tag: &command.credential.0,
            })
            .send()
            .await?;

        let status_code = response.status();
        let body = response
            .json::<RemoteStopResponse>()
            .await
            .unwrap_or_default();

        let accepted = status_code == reqwest::StatusCode::OK
            && body.status.as_deref() == Some(ACCEPTED_STATUS);
        let message = body.msg.unwrap_or_else(|| {
            if accepted {
                ACCEPTED_STATUS.to_string()
            } else {
                format!("charger control answered {status_code}")
            }
        });

        Ok(StopReply { accepted, message })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
    use serde_json::{Value, json};

    use super::{ChargerControl, HttpChargerControl, StopCommand};
    use crate::domain::models::{CredentialId, SessionId, TenantId};

    async fn remote_stop(request: HttpRequest, body: web::Json<Value>) -> HttpResponse {
        let tenant = request
            .headers()
            .get("tenant_id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if tenant != "t1" {
            return HttpResponse::BadRequest().json(json!({ "msg": "unknown tenant" }));
        }

        if body["transaction_id"] == 7 && body["stop_id_tag"] == "RFID-1" {
            HttpResponse::Ok().json(json!({ "status": "Accepted", "msg": "Stopped" }))
        } else {
            HttpResponse::Ok().json(json!({ "status": "Rejected", "msg": "Charger offline" }))
        }
    }

    fn start_gateway() -> (String, actix_web::dev::ServerHandle) {
        let server = HttpServer::new(|| {
            App::new().route("/chargers/remote_stop", web::post().to(remote_stop))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("test gateway should bind");
        let address = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        (format!("http://{address}"), handle)
    }

    fn command(tenant: &str, session_id: i64) -> StopCommand {
        StopCommand {
            tenant_id: TenantId(tenant.to_string()),
            session_id: SessionId(session_id),
            credential: CredentialId("RFID-1".to_string()),
        }
    }

    #[actix_web::test]
    async fn accepted_only_for_ok_and_accepted_status() {
        let (base_url, handle) = start_gateway();
        let control = HttpChargerControl::new(reqwest::Client::new(), &format!("{base_url}/"));

        let accepted = control
            .stop(&command("t1", 7))
            .await
            .expect("gateway should answer");
        assert!(accepted.accepted);
        assert_eq!(accepted.message, "Stopped");

        let rejected = control
            .stop(&command("t1", 8))
            .await
            .expect("gateway should answer");
        assert!(!rejected.accepted);
        assert_eq!(rejected.message, "Charger offline");

        let bad_request = control
            .stop(&command("t9", 7))
            .await
            .expect("gateway should answer");
        assert!(!bad_request.accepted);
        assert_eq!(bad_request.message, "unknown tenant");

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let control = HttpChargerControl::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let result = control.stop(&command("t1", 7)).await;
        assert!(result.is_err());
    }
}
