use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::clock::TimestampMs;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

/// RFID card or id-tag presented at the charger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        })*
    };
}

display_inner!(TenantId, OwnerId, CredentialId, SessionId);

/// Session ids are only unique inside one tenant scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.session_id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenancyMode {
    /// Business with its own app: only its own scope is searched.
    SingleTenant,
    /// Child of an enterprise: every child scope of the parent is searched.
    Enterprise,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantProfile {
    pub tenant_id: TenantId,
    pub mode: TenancyMode,
    pub enterprise_id: Option<TenantId>,
}

impl TenantProfile {
    /// Scope the owner's wallet lives in. Enterprise children share one
    /// wallet under their parent, so every child reads the same balance.
    pub fn wallet_scope(&self) -> &TenantId {
        match (self.mode, &self.enterprise_id) {
            (TenancyMode::Enterprise, Some(parent)) => parent,
            _ => &self.tenant_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub charger_id: String,
    pub connector_id: u32,
    pub credential: CredentialId,
    pub started_at: TimestampMs,
    pub running: bool,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            tenant_id: self.tenant_id.clone(),
            session_id: self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopChargingBy {
    #[serde(rename = "duration_in_minutes")]
    Duration,
    #[serde(rename = "max_energy_consumption")]
    Energy,
}

impl StopChargingBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duration => "duration_in_minutes",
            Self::Energy => "max_energy_consumption",
        }
    }
}

impl FromStr for StopChargingBy {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "duration_in_minutes" => Ok(Self::Duration),
            "max_energy_consumption" => Ok(Self::Energy),
            other => Err(UnknownVariant::new("stop_charging_by", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyUnit {
    Wh,
    KWh,
}

impl EnergyUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wh => "Wh",
            Self::KWh => "kWh",
        }
    }
}

impl FromStr for EnergyUnit {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Wh" => Ok(Self::Wh),
            "kWh" => Ok(Self::KWh),
            other => Err(UnknownVariant::new("energy unit", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerUnit {
    W,
    KW,
}

impl PowerUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::W => "W",
            Self::KW => "kW",
        }
    }
}

impl FromStr for PowerUnit {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "W" => Ok(Self::W),
            "kW" => Ok(Self::KW),
            other => Err(UnknownVariant::new("power unit", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeterSample {
    pub energy_register: f64,
    pub energy_unit: EnergyUnit,
    pub power: f64,
    pub power_unit: PowerUnit,
    pub soc: Option<f64>,
    /// Register value captured at session start, always in Wh.
    pub initial_register_wh: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BillingPlan {
    pub stop_charging_by: StopChargingBy,
    pub price: Decimal,
    pub fixed_starting_fee: Decimal,
    pub price_include_tax: bool,
    pub tax_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMethod {
    Wallet,
    CardHold(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Soc,
    Cost,
    Duration,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soc => "soc",
            Self::Cost => "cost",
            Self::Duration => "duration",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "soc" => Ok(Self::Soc),
            "cost" => Ok(Self::Cost),
            "duration" => Ok(Self::Duration),
            other => Err(UnknownVariant::new("notification type", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub kind: NotificationKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotificationRecord {
    pub owner_id: OwnerId,
    pub session: SessionKey,
    pub event_name: String,
    pub payload_json: String,
}

/// Response of one meter-value tick for the triggering session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterValuesPayload {
    pub time_elapsed: String,
    pub energy_transferred: String,
    pub power: String,
    pub price: String,
    pub soc: Option<f64>,
    pub session_id: SessionId,
    pub tenant_id: TenantId,
}
