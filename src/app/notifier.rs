use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::adapters::push::{PushError, PushNotification, PushNotifier};
use crate::app::services::{MeteringStore, ServiceError};
use crate::domain::clock::Clock;
use crate::domain::metering::MeteringSnapshot;
use crate::domain::models::{OwnerId, SentNotificationRecord};
use crate::domain::notification::{
    SessionMetrics, THRESHOLD_EVENT_NAME, ThresholdParseError, evaluate_threshold,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    NoConfig,
    NotCrossed,
    AlreadySent,
    Sent,
    /// Logged and swallowed.
    Failed,
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error(transparent)]
    Store(#[from] ServiceError),
    #[error(transparent)]
    Threshold(#[from] ThresholdParseError),
    #[error(transparent)]
    Push(#[from] PushError),
    #[error("failed to encode alert payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn MeteringStore>,
    push: Arc<dyn PushNotifier>,
    clock: Arc<dyn Clock>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn MeteringStore>,
        push: Arc<dyn PushNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, push, clock }
    }

    /// Raises the session's threshold alert at most once per ledger entry.
    pub async fn dispatch(
        &self,
        owner: &OwnerId,
        snapshot: &MeteringSnapshot,
        cost: Decimal,
    ) -> DispatchOutcome {
        match self.try_dispatch(owner, snapshot, cost).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    session = %snapshot.session,
                    owner_id = %owner,
                    error = %error,
                    "notification dispatch failed"
                );
                DispatchOutcome::Failed
            }
        }
    }

    async fn try_dispatch(
        &self,
        owner: &OwnerId,
        snapshot: &MeteringSnapshot,
        cost: Decimal,
    ) -> Result<DispatchOutcome, DispatchError> {
        let tenant = &snapshot.session.tenant_id;
        let session_id = snapshot.session.session_id;

        let Some(config) = self.store.notification_config(tenant, session_id).await? else {
            return Ok(DispatchOutcome::NoConfig);
        };

        let metrics = SessionMetrics {
            soc: snapshot.soc,
            cost,
            elapsed_hhmm: &snapshot.elapsed_hhmm,
        };
        let Some(alert) = evaluate_threshold(&config, metrics, session_id, owner)? else {
            return Ok(DispatchOutcome::NotCrossed);
        };

        if self
            .store
            .sent_notification_exists(owner, tenant, session_id, THRESHOLD_EVENT_NAME)
            .await?
        {
            return Ok(DispatchOutcome::AlreadySent);
        }

        let payload_json = serde_json::to_string(&alert.data)?;
        self.push
            .send(&PushNotification {
                owner_id: owner.clone(),
                tenant_id: tenant.clone(),
                title: alert.title.clone(),
                body: alert.body,
                data: alert.data,
            })
            .await?;

        self.store
            .record_sent_notification(
                &SentNotificationRecord {
                    owner_id: owner.clone(),
                    session: snapshot.session.clone(),
                    event_name: THRESHOLD_EVENT_NAME.to_string(),
                    payload_json,
                },
                self.clock.now(),
            )
            .await?;

        tracing::info!(
            session = %snapshot.session,
            owner_id = %owner,
            kind = config.kind.as_str(),
            title = %alert.title,
            "threshold notification sent"
        );

        Ok(DispatchOutcome::Sent)
    }
}
