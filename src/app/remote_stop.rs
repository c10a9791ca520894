use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::adapters::charger_control::{ChargerControl, StopCommand};
use crate::adapters::live::LiveConnectionRegistry;
use crate::adapters::push::{PushNotification, PushNotifier};
use crate::app::services::MeteringStore;
use crate::domain::clock::Clock;
use crate::domain::cutoff::TerminationRequest;

pub const STOP_CHARGING_EVENT: &str = "stop_charging";
pub const REMOTE_CUTOFF_REASON: &str = "remote_cutoff";

const TRANSPORT_FAILURE_MESSAGE: &str = "Remote stop failed.";
const FAILURE_TITLE: &str = "Failed!";
const FAILURE_BODY: &str = "Automatic remote stop failed, User have to stop charging manually";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Accepted,
    Refused { message: String },
}

impl StopOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Clone)]
pub struct RemoteStopOrchestrator {
    control: Arc<dyn ChargerControl>,
    push: Arc<dyn PushNotifier>,
    live: Arc<dyn LiveConnectionRegistry>,
    store: Arc<dyn MeteringStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl RemoteStopOrchestrator {
    pub fn new(
        control: Arc<dyn ChargerControl>,
        push: Arc<dyn PushNotifier>,
        live: Arc<dyn LiveConnectionRegistry>,
        store: Arc<dyn MeteringStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            control,
            push,
            live,
            store,
            clock,
            timeout,
        }
    }

    /// Never fails: refusals, transport errors and timeouts all end up as a
    /// push alert to the owner.
    pub async fn execute(&self, request: &TerminationRequest) -> StopOutcome {
        let command = StopCommand {
            tenant_id: request.session.tenant_id.clone(),
            session_id: request.session.session_id,
            credential: request.credential.clone(),
        };

        let outcome = match tokio::time::timeout(self.timeout, self.control.stop(&command)).await {
            Ok(Ok(reply)) if reply.accepted => StopOutcome::Accepted,
            Ok(Ok(reply)) => StopOutcome::Refused {
                message: reply.message,
            },
            Ok(Err(error)) => {
                tracing::warn!(
                    session = %request.session,
                    owner_id = %request.owner_id,
                    error = %error,
                    "remote stop transport failure"
                );
                StopOutcome::Refused {
                    message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(
                    session = %request.session,
                    owner_id = %request.owner_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "remote stop timed out"
                );
                StopOutcome::Refused {
                    message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                }
            }
        };

        match &outcome {
            StopOutcome::Accepted => self.on_accepted(request).await,
            StopOutcome::Refused { message } => self.on_refused(request, message).await,
        }

        outcome
    }

    async fn on_accepted(&self, request: &TerminationRequest) {
        tracing::info!(
            session = %request.session,
            owner_id = %request.owner_id,
            charger_id = %request.charger_id,
            reason = request.reason.as_str(),
            "remote stop accepted"
        );

        if let Err(error) = self
            .store
            .mark_session_stopped(
                &request.session.tenant_id,
                request.session.session_id,
                self.clock.now(),
                REMOTE_CUTOFF_REASON,
            )
            .await
        {
            tracing::error!(
                session = %request.session,
                error = %error,
                "failed to mark remotely stopped session"
            );
        }

        self.live.send(
            &request.owner_id,
            &request.session.tenant_id,
            STOP_CHARGING_EVENT,
            json!({ "session_id": request.session.session_id }),
        );
    }

    async fn on_refused(&self, request: &TerminationRequest, message: &str) {
        tracing::warn!(
            session = %request.session,
            owner_id = %request.owner_id,
            charger_id = %request.charger_id,
            reason = request.reason.as_str(),
            message,
            "remote stop refused"
        );

        let notification = PushNotification {
            owner_id: request.owner_id.clone(),
            tenant_id: request.session.tenant_id.clone(),
            title: FAILURE_TITLE.to_string(),
            body: FAILURE_BODY.to_string(),
            data: json!({ "session_id": request.session.session_id, "msg": message }),
        };

        if let Err(error) = self.push.send(&notification).await {
            tracing::warn!(
                owner_id = %request.owner_id,
                error = %error,
                "failed to push remote stop failure"
            );
        }
    }
}
