use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::billing::round_money;
use crate::domain::models::{NotificationConfig, NotificationKind, OwnerId, SessionId};

/// Ledger event name for threshold alerts raised from meter values.
pub const THRESHOLD_EVENT_NAME: &str = "meter_values_notification_config";

const ALERT_BODY: &str = "click on stop charging to stop the session now!";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThresholdParseError {
    #[error("invalid {kind} threshold value: {value}")]
    InvalidValue { kind: &'static str, value: String },
    #[error("elapsed time {0} is not a valid HH:MM time of day")]
    InvalidElapsed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionMetrics<'a> {
    pub soc: Option<f64>,
    pub cost: Decimal,
    pub elapsed_hhmm: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdAlert {
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Checks that a threshold value can be evaluated for its kind.
pub fn validate_threshold(config: &NotificationConfig) -> Result<(), ThresholdParseError> {
    match config.kind {
        NotificationKind::Soc => parse_soc(&config.value).map(|_| ()),
        NotificationKind::Cost => parse_cost(&config.value).map(|_| ()),
        NotificationKind::Duration => parse_time_of_day(&config.value).map(|_| ()),
    }
}

/// Returns the alert to deliver when the configured threshold is crossed.
///
/// Durations are compared as `HH:MM` times of day.
pub fn evaluate_threshold(
    config: &NotificationConfig,
    metrics: SessionMetrics<'_>,
    session_id: SessionId,
    owner_id: &OwnerId,
) -> Result<Option<ThresholdAlert>, ThresholdParseError> {
    let title = match config.kind {
        NotificationKind::Soc => {
            let threshold = parse_soc(&config.value)?;
            match metrics.soc {
                Some(soc) if soc >= threshold => format!("Your SoC has exceeded {soc} %"),
                _ => return Ok(None),
            }
        }
        NotificationKind::Cost => {
            let threshold = parse_cost(&config.value)?;
            if round_money(metrics.cost) < threshold {
                return Ok(None);
            }
            format!("Your session cost has exceeded {}", config.value)
        }
        NotificationKind::Duration => {
            let threshold = parse_time_of_day(&config.value)?;
            let elapsed = NaiveTime::parse_from_str(metrics.elapsed_hhmm, "%H:%M")
                .map_err(|_| ThresholdParseError::InvalidElapsed(metrics.elapsed_hhmm.to_string()))?;
            if threshold > elapsed {
                return Ok(None);
            }
            format!("Your session time has exceeded {threshold}")
        }
    };

    let data = json!({
        "action": "notification_limit_reached",
        "sessionId": session_id,
        "user_id": owner_id,
        "title": title,
        "body": ALERT_BODY,
    });

    Ok(Some(ThresholdAlert {
        title,
        body: ALERT_BODY.to_string(),
        data,
    }))
}

fn parse_soc(value: &str) -> Result<f64, ThresholdParseError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| invalid("soc", value))
}

fn parse_cost(value: &str) -> Result<Decimal, ThresholdParseError> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|_| invalid("cost", value))
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, ThresholdParseError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| invalid("duration", value))
}

fn invalid(kind: &'static str, value: &str) -> ThresholdParseError {
    ThresholdParseError::InvalidValue {
        kind,
        value: value.to_string(),
    }
}
