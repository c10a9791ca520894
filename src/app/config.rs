use std::time::Duration;

use rust_decimal::Decimal;

use crate::app::AppError;
use crate::app::engine::EngineSettings;
use crate::domain::cutoff::FreeUsagePolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub charger_control_url: String,
    pub push_url: Option<String>,
    pub external_call_timeout_ms: u64,
    pub org_minimum_reserve: Decimal,
    pub free_minutes_cap: i64,
    pub free_energy_cap_kwh: f64,
    pub stalled_connector_type: String,
    pub stalled_sample_window: usize,
    pub free_usage_policy: FreeUsagePolicy,
    pub cors_permissive: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let charger_control_url = non_empty(&lookup, "CHARGER_CONTROL_URL")
            .ok_or_else(|| AppError::config("CHARGER_CONTROL_URL is required"))?;

        let stalled_sample_window = parse_or_default(&lookup, "STALLED_SAMPLE_WINDOW", 5_usize)?;
        if stalled_sample_window == 0 {
            return Err(AppError::config(
                "STALLED_SAMPLE_WINDOW must be greater than zero",
            ));
        }

        Ok(Self {
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "/var/lib/ev-metering/metering.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            charger_control_url,
            push_url: non_empty(&lookup, "PUSH_URL"),
            external_call_timeout_ms: parse_or_default(
                &lookup,
                "EXTERNAL_CALL_TIMEOUT_MS",
                10_000_u64,
            )?,
            org_minimum_reserve: parse_or_default(&lookup, "ORG_MINIMUM_RESERVE", Decimal::TEN)?,
            free_minutes_cap: parse_or_default(&lookup, "FREE_MINUTES_CAP", 120_i64)?,
            free_energy_cap_kwh: parse_or_default(&lookup, "FREE_ENERGY_CAP_KWH", 45.0_f64)?,
            stalled_connector_type: non_empty(&lookup, "STALLED_CONNECTOR_TYPE")
                .unwrap_or_else(|| "15A".to_string()),
            stalled_sample_window,
            free_usage_policy: parse_free_usage_policy(&lookup)?,
            cors_permissive: parse_flag(&lookup, "CORS_PERMISSIVE", false)?,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_minimum_reserve: self.org_minimum_reserve,
            free_minutes_cap: self.free_minutes_cap,
            free_energy_cap_kwh: self.free_energy_cap_kwh,
            free_usage_policy: self.free_usage_policy,
            stalled_connector_type: self.stalled_connector_type.clone(),
            stalled_sample_window: self.stalled_sample_window,
            external_call_timeout: Duration::from_millis(self.external_call_timeout_ms),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key).as_deref().map(str::to_ascii_lowercase) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(AppError::config(format!("{key} must be true or false"))),
        },
    }
}

fn parse_free_usage_policy<F>(lookup: &F) -> Result<FreeUsagePolicy, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, "FREE_USAGE_POLICY").as_deref() {
        None | Some("log") => Ok(FreeUsagePolicy::LogOnly),
        Some("stop") => Ok(FreeUsagePolicy::Stop),
        Some(_) => Err(AppError::config("FREE_USAGE_POLICY must be log or stop")),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::AppConfig;
    use crate::domain::cutoff::FreeUsagePolicy;

    #[test]
    fn rejects_missing_charger_control_url() {
        let result = AppConfig::from_lookup(|_| None);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: CHARGER_CONTROL_URL is required"
        );
    }

    #[test]
    fn applies_defaults_for_optional_fields() {
        let result = AppConfig::from_lookup(|key| match key {
            "CHARGER_CONTROL_URL" => Some("http://ocpp.local".to_string()),
            _ => None,
        })
        .expect("config should be valid");

        assert_eq!(result.charger_control_url, "http://ocpp.local");
        assert_eq!(result.db_path, "/var/lib/ev-metering/metering.db");
        assert_eq!(result.http_bind, "0.0.0.0:8080");
        assert_eq!(result.push_url, None);
        assert_eq!(result.external_call_timeout_ms, 10_000);
        assert_eq!(result.org_minimum_reserve, dec!(10));
        assert_eq!(result.free_minutes_cap, 120);
        assert_eq!(result.free_energy_cap_kwh, 45.0);
        assert_eq!(result.stalled_connector_type, "15A");
        assert_eq!(result.stalled_sample_window, 5);
        assert_eq!(result.free_usage_policy, FreeUsagePolicy::LogOnly);
        assert!(!result.cors_permissive);
    }

    #[test]
    fn reads_overrides() {
        let result = AppConfig::from_lookup(|key| match key {
            "CHARGER_CONTROL_URL" => Some("http://ocpp.local".to_string()),
            "PUSH_URL" => Some(" http://push.local/send ".to_string()),
            "ORG_MINIMUM_RESERVE" => Some("2.50".to_string()),
            "FREE_USAGE_POLICY" => Some("stop".to_string()),
            "CORS_PERMISSIVE" => Some("TRUE".to_string()),
            _ => None,
        })
        .expect("config should be valid");

        assert_eq!(result.push_url.as_deref(), Some("http://push.local/send"));
        assert_eq!(result.org_minimum_reserve, dec!(2.50));
        assert_eq!(result.free_usage_policy, FreeUsagePolicy::Stop);
        assert!(result.cors_permissive);

        let settings = result.engine_settings();
        assert_eq!(settings.default_minimum_reserve, dec!(2.50));
        assert_eq!(settings.external_call_timeout.as_millis(), 10_000);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let result = AppConfig::from_lookup(|key| match key {
            "CHARGER_CONTROL_URL" => Some("http://ocpp.local".to_string()),
            "EXTERNAL_CALL_TIMEOUT_MS" => Some("abc".to_string()),
            _ => None,
        });

        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: EXTERNAL_CALL_TIMEOUT_MS must be a valid number"
        );
    }

    #[test]
    fn rejects_unknown_free_usage_policy() {
        let result = AppConfig::from_lookup(|key| match key {
            "CHARGER_CONTROL_URL" => Some("http://ocpp.local".to_string()),
            "FREE_USAGE_POLICY" => Some("warn".to_string()),
            _ => None,
        });

        assert_eq!(
            result.unwrap_err().to_string(),
            "invalid configuration: FREE_USAGE_POLICY must be log or stop"
        );
    }
}
