use rust_decimal::Decimal;

use crate::domain::clock::TimestampMs;
use crate::domain::models::{
    BillingPlan, EnergyUnit, MeterSample, PowerUnit, Session, SessionKey, StopChargingBy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct MeteringSnapshot {
    pub session: SessionKey,
    pub elapsed_ms: i64,
    /// `HH:MM`
    pub elapsed_hhmm: String,
    /// `HH hr:MM min`
    pub elapsed_display: String,
    pub energy_kwh: f64,
    pub power_kw: f64,
    pub soc: Option<f64>,
    pub stop_charging_by: StopChargingBy,
    pub price: Decimal,
    pub fixed_starting_fee: Decimal,
}

impl MeteringSnapshot {
    pub fn elapsed_minutes(&self) -> Decimal {
        Decimal::from(self.elapsed_ms) / Decimal::from(60_000)
    }
}

/// Net energy delivered in kWh.
///
/// The initial offset is kept in Wh, so a kWh register is scaled up before the
/// subtraction. A register below the offset (meter reset) is taken as net.
pub fn normalize_energy_kwh(register: f64, unit: EnergyUnit, initial_register_wh: f64) -> f64 {
    let mut register_wh = match unit {
        EnergyUnit::Wh => register,
        EnergyUnit::KWh => register * 1000.0,
    };

    if initial_register_wh <= register_wh {
        register_wh -= initial_register_wh;
    }

    register_wh / 1000.0
}

pub fn normalize_power_kw(power: f64, unit: PowerUnit) -> f64 {
    match unit {
        PowerUnit::W => power / 1000.0,
        PowerUnit::KW => power,
    }
}

/// Returns (`HH:MM`, `HH hr:MM min`).
pub fn format_elapsed(elapsed_ms: i64) -> (String, String) {
    let total_seconds = elapsed_ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;

    (
        format!("{hours:02}:{minutes:02}"),
        format!("{hours:02} hr:{minutes:02} min"),
    )
}

/// `None` means the session is left out of this tick.
pub fn build_snapshot(
    session: &Session,
    sample: Option<&MeterSample>,
    plan: Option<&BillingPlan>,
    now: TimestampMs,
) -> Option<MeteringSnapshot> {
    let sample = sample?;
    let plan = plan?;

    let elapsed_ms = session.started_at.elapsed_until(now);
    let (elapsed_hhmm, elapsed_display) = format_elapsed(elapsed_ms);

    Some(MeteringSnapshot {
        session: session.key(),
        elapsed_ms,
        elapsed_hhmm,
        elapsed_display,
        energy_kwh: normalize_energy_kwh(
            sample.energy_register,
            sample.energy_unit,
            sample.initial_register_wh,
        ),
        power_kw: normalize_power_kw(sample.power, sample.power_unit),
        soc: sample.soc,
        stop_charging_by: plan.stop_charging_by,
        price: plan.price,
        fixed_starting_fee: plan.fixed_starting_fee,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{build_snapshot, format_elapsed, normalize_energy_kwh, normalize_power_kw};
    use crate::domain::clock::TimestampMs;
    use crate::domain::models::{
        BillingPlan, CredentialId, EnergyUnit, MeterSample, PowerUnit, Session, SessionId,
        StopChargingBy, TenantId,
    };

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn normalizes_energy_for_every_unit_and_offset_combination() {
        let cases = [
            // (register, unit, initial offset in Wh, expected kWh)
            (15_000.0, EnergyUnit::Wh, 10_000.0, 5.0),
            (4_000.0, EnergyUnit::Wh, 10_000.0, 4.0),
            (15.0, EnergyUnit::KWh, 10_000.0, 5.0),
            (4.0, EnergyUnit::KWh, 10_000.0, 4.0),
        ];

        for (register, unit, offset, expected) in cases {
            assert_close(normalize_energy_kwh(register, unit, offset), expected);
        }
    }

    #[test]
    fn register_equal_to_offset_nets_to_zero() {
        assert_close(normalize_energy_kwh(10_000.0, EnergyUnit::Wh, 10_000.0), 0.0);
    }

    #[test]
    fn scales_power_only_when_reported_in_watts() {
        assert_close(normalize_power_kw(7_400.0, PowerUnit::W), 7.4);
        assert_close(normalize_power_kw(7.4, PowerUnit::KW), 7.4);
    }

    #[test]
    fn formats_elapsed_time_both_ways() {
        let (short, display) = format_elapsed(((2 * 3600) + (5 * 60) + 59) * 1000);
        assert_eq!(short, "02:05");
        assert_eq!(display, "02 hr:05 min");
    }

    fn session() -> Session {
        Session {
            id: SessionId(7),
            tenant_id: TenantId("t1".to_string()),
            charger_id: "CP-1".to_string(),
            connector_id: 1,
            credential: CredentialId("RFID-1".to_string()),
            started_at: TimestampMs(1_000_000),
            running: true,
        }
    }

    fn plan() -> BillingPlan {
        BillingPlan {
            stop_charging_by: StopChargingBy::Energy,
            price: dec!(12.5),
            fixed_starting_fee: dec!(1),
            price_include_tax: false,
            tax_percentage: dec!(5),
        }
    }

    fn sample() -> MeterSample {
        MeterSample {
            energy_register: 12_500.0,
            energy_unit: EnergyUnit::Wh,
            power: 11_000.0,
            power_unit: PowerUnit::W,
            soc: Some(64.0),
            initial_register_wh: 2_500.0,
        }
    }

    #[test]
    fn builds_snapshot_from_sample_and_plan() {
        let snapshot = build_snapshot(
            &session(),
            Some(&sample()),
            Some(&plan()),
            TimestampMs(1_000_000 + 90 * 60 * 1000),
        )
        .expect("snapshot should be built");

        assert_eq!(snapshot.elapsed_hhmm, "01:30");
        assert_eq!(snapshot.elapsed_display, "01 hr:30 min");
        assert_eq!(snapshot.elapsed_minutes(), dec!(90));
        assert_close(snapshot.energy_kwh, 10.0);
        assert_close(snapshot.power_kw, 11.0);
        assert_eq!(snapshot.soc, Some(64.0));
        assert_eq!(snapshot.price, dec!(12.5));
        assert_eq!(snapshot.fixed_starting_fee, dec!(1));
        assert_eq!(snapshot.stop_charging_by, StopChargingBy::Energy);
    }

    #[test]
    fn missing_sample_or_plan_excludes_the_session() {
        let now = TimestampMs(2_000_000);
        assert!(build_snapshot(&session(), None, Some(&plan()), now).is_none());
        assert!(build_snapshot(&session(), Some(&sample()), None, now).is_none());
    }
}
