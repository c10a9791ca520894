use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::DbError;
use crate::domain::clock::TimestampMs;
use crate::domain::models::{
    BillingPlan, CredentialId, MeterSample, NotificationConfig, OwnerId, PaymentMethod, Session,
    SessionId, SentNotificationRecord, TenantId, TenantProfile,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

/// Read side of the metering store, as consumed by one meter-value tick.
#[async_trait]
pub trait MeteringQueries: Send + Sync {
    async fn tenant_profile(&self, tenant: &TenantId)
    -> Result<Option<TenantProfile>, ServiceError>;
    async fn enterprise_scopes(&self, tenant: &TenantId) -> Result<Vec<TenantId>, ServiceError>;
    async fn owner_of_credential(
        &self,
        tenant: &TenantId,
        credential: &CredentialId,
    ) -> Result<Option<OwnerId>, ServiceError>;
    async fn credentials_for_owner(
        &self,
        tenant: &TenantId,
        owner: &OwnerId,
    ) -> Result<Vec<CredentialId>, ServiceError>;
    async fn enterprise_credentials(&self, owner: &OwnerId)
    -> Result<Vec<CredentialId>, ServiceError>;
    async fn running_session(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<Session>, ServiceError>;
    async fn find_running_sessions(
        &self,
        tenant: &TenantId,
        credentials: &[CredentialId],
    ) -> Result<Vec<Session>, ServiceError>;
    async fn latest_meter_sample(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<MeterSample>, ServiceError>;
    async fn billing_plan(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<BillingPlan>, ServiceError>;
    async fn recent_energy_registers(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<f64>, ServiceError>;
    async fn connector_type(&self, session: &Session) -> Result<Option<String>, ServiceError>;
    async fn payment_method(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<PaymentMethod, ServiceError>;
    async fn wallet_balance(
        &self,
        owner: &OwnerId,
        tenant: &TenantId,
    ) -> Result<Option<Decimal>, ServiceError>;
    async fn pre_authorized_fund(&self, hold_id: &str) -> Result<Option<Decimal>, ServiceError>;
    async fn minimum_reserve(&self, tenant: &TenantId) -> Result<Option<Decimal>, ServiceError>;
    async fn notification_config(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<NotificationConfig>, ServiceError>;
    async fn sent_notification_exists(
        &self,
        owner: &OwnerId,
        tenant: &TenantId,
        session_id: SessionId,
        event_name: &str,
    ) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait MeteringCommands: Send + Sync {
    async fn record_sent_notification(
        &self,
        record: &SentNotificationRecord,
        created_at: TimestampMs,
    ) -> Result<String, ServiceError>;
    async fn upsert_notification_config(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
        config: &NotificationConfig,
    ) -> Result<(), ServiceError>;
    async fn delete_notification_config(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<bool, ServiceError>;
    async fn clear_sent_notifications(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<usize, ServiceError>;
    async fn mark_session_stopped(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
        stopped_at: TimestampMs,
        reason: &str,
    ) -> Result<bool, ServiceError>;
}

pub trait MeteringStore: MeteringQueries + MeteringCommands {}

impl<T: MeteringQueries + MeteringCommands> MeteringStore for T {}

#[derive(Clone)]
pub struct SqliteMeteringStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteMeteringStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    pub fn schema_version(&self) -> Result<u32, ServiceError> {
        self.with_connection(db::schema_version)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }
}

#[async_trait]
impl MeteringQueries for SqliteMeteringStore {
    async fn tenant_profile(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<TenantProfile>, ServiceError> {
        self.with_connection(|connection| db::get_tenant_profile(connection, tenant))
    }

    async fn enterprise_scopes(&self, tenant: &TenantId) -> Result<Vec<TenantId>, ServiceError> {
        self.with_connection(|connection| db::list_enterprise_scopes(connection, tenant))
    }

    async fn owner_of_credential(
        &self,
        tenant: &TenantId,
        credential: &CredentialId,
    ) -> Result<Option<OwnerId>, ServiceError> {
        self.with_connection(|connection| db::get_owner_of_credential(connection, tenant, credential))
    }

    async fn credentials_for_owner(
        &self,
        tenant: &TenantId,
        owner: &OwnerId,
    ) -> Result<Vec<CredentialId>, ServiceError> {
        self.with_connection(|connection| db::list_credentials_for_owner(connection, tenant, owner))
    }

    async fn enterprise_credentials(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<CredentialId>, ServiceError> {
        self.with_connection(|connection| db::list_enterprise_credentials(connection, owner))
    }

    async fn running_session(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<Session>, ServiceError> {
        self.with_connection(|connection| db::get_running_session(connection, tenant, session_id))
    }

    async fn find_running_sessions(
        &self,
        tenant: &TenantId,
        credentials: &[CredentialId],
    ) -> Result<Vec<Session>, ServiceError> {
        self.with_connection(|connection| db::list_running_sessions(connection, tenant, credentials))
    }

    async fn latest_meter_sample(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<MeterSample>, ServiceError> {
        self.with_connection(|connection| {
            db::get_latest_meter_sample(connection, tenant, session_id)
        })
    }

    async fn billing_plan(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<BillingPlan>, ServiceError> {
        self.with_connection(|connection| db::get_billing_plan(connection, tenant, session_id))
    }

    async fn recent_energy_registers(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<f64>, ServiceError> {
        self.with_connection(|connection| {
            db::list_recent_energy_registers(connection, tenant, session_id, limit)
        })
    }

    async fn connector_type(&self, session: &Session) -> Result<Option<String>, ServiceError> {
        self.with_connection(|connection| {
            db::get_connector_type(
                connection,
                &session.tenant_id,
                &session.charger_id,
                session.connector_id,
            )
        })
    }

    async fn payment_method(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<PaymentMethod, ServiceError> {
        self.with_connection(|connection| db::get_payment_method(connection, tenant, session_id))
    }

    async fn wallet_balance(
        &self,
        owner: &OwnerId,
        tenant: &TenantId,
    ) -> Result<Option<Decimal>, ServiceError> {
        self.with_connection(|connection| db::get_wallet_balance(connection, tenant, owner))
    }

    async fn pre_authorized_fund(&self, hold_id: &str) -> Result<Option<Decimal>, ServiceError> {
        self.with_connection(|connection| db::get_card_hold_amount(connection, hold_id))
    }

    async fn minimum_reserve(&self, tenant: &TenantId) -> Result<Option<Decimal>, ServiceError> {
        self.with_connection(|connection| db::get_minimum_reserve(connection, tenant))
    }

    async fn notification_config(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<Option<NotificationConfig>, ServiceError> {
        self.with_connection(|connection| {
            db::get_notification_config(connection, tenant, session_id)
        })
    }

    async fn sent_notification_exists(
        &self,
        owner: &OwnerId,
        tenant: &TenantId,
        session_id: SessionId,
        event_name: &str,
    ) -> Result<bool, ServiceError> {
        self.with_connection(|connection| {
            db::sent_notification_exists(connection, owner, tenant, session_id, event_name)
        })
    }
}

#[async_trait]
impl MeteringCommands for SqliteMeteringStore {
    async fn record_sent_notification(
        &self,
        record: &SentNotificationRecord,
        created_at: TimestampMs,
    ) -> Result<String, ServiceError> {
        self.with_connection(|connection| {
            db::insert_sent_notification(connection, record, created_at)
        })
    }

    async fn upsert_notification_config(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
        config: &NotificationConfig,
    ) -> Result<(), ServiceError> {
        self.with_connection(|connection| {
            db::upsert_notification_config(connection, tenant, session_id, config)
        })
    }

    async fn delete_notification_config(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<bool, ServiceError> {
        self.with_connection(|connection| {
            db::delete_notification_config(connection, tenant, session_id)
        })
    }

    async fn clear_sent_notifications(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<usize, ServiceError> {
        self.with_connection(|connection| {
            db::delete_sent_notifications_of_session(connection, tenant, session_id)
        })
    }

    async fn mark_session_stopped(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
        stopped_at: TimestampMs,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        self.with_connection(|connection| {
            db::mark_session_stopped(connection, tenant, session_id, stopped_at, reason)
        })
    }
}
