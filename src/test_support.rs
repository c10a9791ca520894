use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::adapters::charger_control::{
    ChargerControl, ChargerControlError, StopCommand, StopReply,
};
use crate::adapters::db::{
    get_owner_of_credential, insert_credential, insert_meter_sample, insert_session,
    insert_session_parameters, open_connection, run_migrations,
};
use crate::adapters::push::{PushError, PushNotification, PushNotifier};
use crate::domain::clock::{Clock, TimestampMs};
use crate::domain::models::{
    BillingPlan, CredentialId, EnergyUnit, MeterSample, OwnerId, PowerUnit, Session, SessionId,
    StopChargingBy, TenantId,
};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_template_path);

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn default_template_path() -> PathBuf {
    if cfg!(windows) {
        Path::new(".\\data\\metering_test.db").to_path_buf()
    } else {
        Path::new("./data/metering_test.db").to_path_buf()
    }
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb")
        .join(format!("{test_name}-{now}-{counter}.sqlite"))
        .to_path_buf()
}

pub struct FixedClock(pub TimestampMs);

impl Clock for FixedClock {
    fn now(&self) -> TimestampMs {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum StopMode {
    Accept,
    Refuse(String),
    Hang,
}

pub struct FakeChargerControl {
    mode: StopMode,
    calls: Mutex<Vec<StopCommand>>,
}

impl FakeChargerControl {
    pub fn new(mode: StopMode) -> Self {
        Self {
            mode,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<StopCommand> {
        self.calls.lock().expect("calls lock should work").clone()
    }
}

#[async_trait]
impl ChargerControl for FakeChargerControl {
    async fn stop(&self, command: &StopCommand) -> Result<StopReply, ChargerControlError> {
        self.calls
            .lock()
            .expect("calls lock should work")
            .push(command.clone());

        match &self.mode {
            StopMode::Accept => Ok(StopReply {
                accepted: true,
                message: "Accepted".to_string(),
            }),
            StopMode::Refuse(message) => Ok(StopReply {
                accepted: false,
                message: message.clone(),
            }),
            StopMode::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingPushNotifier {
    fail: bool,
    sent: Mutex<Vec<PushNotification>>,
}

impl RecordingPushNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<PushNotification> {
        self.sent.lock().expect("sent lock should work").clone()
    }
}

#[async_trait]
impl PushNotifier for RecordingPushNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        if self.fail {
            return Err(PushError::Rejected(503));
        }
        self.sent
            .lock()
            .expect("sent lock should work")
            .push(notification.clone());
        Ok(())
    }
}

pub fn ts(value: &str) -> TimestampMs {
    TimestampMs::from_rfc3339(value).expect("test timestamp should parse")
}

pub fn duration_plan(price: Decimal, tax_percentage: Decimal) -> BillingPlan {
    BillingPlan {
        stop_charging_by: StopChargingBy::Duration,
        price,
        fixed_starting_fee: Decimal::ZERO,
        price_include_tax: false,
        tax_percentage,
    }
}

pub fn energy_plan(price: Decimal, tax_percentage: Decimal) -> BillingPlan {
    BillingPlan {
        stop_charging_by: StopChargingBy::Energy,
        ..duration_plan(price, tax_percentage)
    }
}

pub fn wh_sample(register_wh: f64, initial_wh: f64) -> MeterSample {
    MeterSample {
        energy_register: register_wh,
        energy_unit: EnergyUnit::Wh,
        power: 7_200.0,
        power_unit: PowerUnit::W,
        soc: None,
        initial_register_wh: initial_wh,
    }
}

/// Inserts a running session with its id-tag owner, plan and one sample.
pub fn seed_running_session(
    connection: &Connection,
    session: &Session,
    owner: &OwnerId,
    plan: Option<&BillingPlan>,
    sample: Option<&MeterSample>,
) {
    insert_session(connection, session).expect("session should insert");

    let known_owner = get_owner_of_credential(connection, &session.tenant_id, &session.credential)
        .expect("owner lookup should work");
    if known_owner.is_none() {
        insert_credential(connection, &session.tenant_id, &session.credential, owner)
            .expect("credential should insert");
    }

    if let Some(plan) = plan {
        insert_session_parameters(connection, &session.tenant_id, session.id, plan)
            .expect("plan should insert");
    }
    if let Some(sample) = sample {
        insert_meter_sample(
            connection,
            &session.tenant_id,
            session.id,
            sample,
            session.started_at,
        )
        .expect("sample should insert");
    }
}

pub fn session(tenant: &str, id: i64, charger_id: &str, id_tag: &str, started_at: &str) -> Session {
    Session {
        id: SessionId(id),
        tenant_id: TenantId(tenant.to_string()),
        charger_id: charger_id.to_string(),
        connector_id: 1,
        credential: CredentialId(id_tag.to_string()),
        started_at: ts(started_at),
        running: true,
    }
}
