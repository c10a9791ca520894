use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::domain::metering::MeteringSnapshot;
use crate::domain::models::StopChargingBy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxTreatment {
    pub price_include_tax: bool,
    pub tax_percentage: Decimal,
}

impl TaxTreatment {
    fn factor(self) -> Decimal {
        Decimal::ONE + self.tax_percentage / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCost {
    /// Tax-exclusive amount, starting fee included. Ledger use only.
    pub base: Decimal,
    pub tax: Decimal,
    pub total_with_tax: Decimal,
}

impl SessionCost {
    pub const FREE: SessionCost = SessionCost {
        base: Decimal::ZERO,
        tax: Decimal::ZERO,
        total_with_tax: Decimal::ZERO,
    };

    pub fn is_free(&self) -> bool {
        self.total_with_tax.is_zero()
    }
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

/// Tax-exclusive value of a tax-inclusive amount.
pub fn strip_tax(amount: Decimal, tax_percentage: Decimal) -> Decimal {
    amount / (Decimal::ONE + tax_percentage / Decimal::ONE_HUNDRED)
}

pub fn add_tax(amount: Decimal, tax_percentage: Decimal) -> Decimal {
    amount * (Decimal::ONE + tax_percentage / Decimal::ONE_HUNDRED)
}

/// Billed quantity: elapsed minutes or net kWh depending on the plan.
pub fn billed_quantity(snapshot: &MeteringSnapshot) -> Decimal {
    match snapshot.stop_charging_by {
        StopChargingBy::Duration => snapshot.elapsed_minutes(),
        StopChargingBy::Energy => Decimal::from_f64(snapshot.energy_kwh).unwrap_or_else(|| {
            tracing::warn!(
                session = %snapshot.session,
                energy_kwh = snapshot.energy_kwh,
                "energy is not representable as a decimal, billing zero energy"
            );
            Decimal::ZERO
        }),
    }
}

/// A zero unit price is free charging: no starting fee, no tax.
pub fn session_cost(snapshot: &MeteringSnapshot, tax: TaxTreatment) -> SessionCost {
    if snapshot.price.is_zero() {
        return SessionCost::FREE;
    }

    let quantity = billed_quantity(snapshot);

    if tax.price_include_tax {
        let net_price = strip_tax(snapshot.price, tax.tax_percentage);
        let net_fee = strip_tax(snapshot.fixed_starting_fee, tax.tax_percentage);
        let base = quantity * net_price + net_fee;
        // tax is already embedded in the configured prices
        let total_with_tax = round_money(quantity * snapshot.price + snapshot.fixed_starting_fee);
        let base = round_money(base);

        return SessionCost {
            base,
            tax: total_with_tax - base,
            total_with_tax,
        };
    }

    let base = quantity * snapshot.price + snapshot.fixed_starting_fee;
    let total_with_tax = round_money(base * tax.factor());
    let base = round_money(base);

    SessionCost {
        base,
        tax: total_with_tax - base,
        total_with_tax,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{SessionCost, TaxTreatment, add_tax, round_money, session_cost, strip_tax};
    use crate::domain::metering::MeteringSnapshot;
    use crate::domain::models::{SessionId, SessionKey, StopChargingBy, TenantId};

    fn snapshot(
        stop_charging_by: StopChargingBy,
        minutes: i64,
        energy_kwh: f64,
        price: Decimal,
        fee: Decimal,
    ) -> MeteringSnapshot {
        MeteringSnapshot {
            session: SessionKey {
                tenant_id: TenantId("t1".to_string()),
                session_id: SessionId(1),
            },
            elapsed_ms: minutes * 60_000,
            elapsed_hhmm: String::new(),
            elapsed_display: String::new(),
            energy_kwh,
            power_kw: 0.0,
            soc: None,
            stop_charging_by,
            price,
            fixed_starting_fee: fee,
        }
    }

    fn exclusive(tax_percentage: Decimal) -> TaxTreatment {
        TaxTreatment {
            price_include_tax: false,
            tax_percentage,
        }
    }

    fn inclusive(tax_percentage: Decimal) -> TaxTreatment {
        TaxTreatment {
            price_include_tax: true,
            tax_percentage,
        }
    }

    #[test]
    fn duration_billing_adds_tax_on_top() {
        let cost = session_cost(
            &snapshot(StopChargingBy::Duration, 3, 0.0, dec!(2.0), dec!(0)),
            exclusive(dec!(5)),
        );
        assert_eq!(cost.total_with_tax, dec!(6.30));
        assert_eq!(cost.base, dec!(6.00));
        assert_eq!(cost.tax, dec!(0.30));
    }

    #[test]
    fn energy_billing_includes_starting_fee_before_tax() {
        let cost = session_cost(
            &snapshot(StopChargingBy::Energy, 50, 10.0, dec!(18), dec!(20)),
            exclusive(dec!(18)),
        );
        // (10 * 18 + 20) * 1.18
        assert_eq!(cost.total_with_tax, dec!(236.00));
        assert_eq!(cost.base, dec!(200.00));
    }

    #[test]
    fn zero_price_is_always_free() {
        for (by, minutes, energy) in [
            (StopChargingBy::Duration, 600, 0.0),
            (StopChargingBy::Energy, 5, 80.0),
        ] {
            let cost = session_cost(
                &snapshot(by, minutes, energy, dec!(0), dec!(50)),
                exclusive(dec!(5)),
            );
            assert_eq!(cost, SessionCost::FREE);
            assert!(cost.is_free());
        }
    }

    #[test]
    fn tax_inclusive_total_keeps_tax_embedded() {
        let cost = session_cost(
            &snapshot(StopChargingBy::Duration, 10, 0.0, dec!(2.10), dec!(1.05)),
            inclusive(dec!(5)),
        );
        assert_eq!(cost.total_with_tax, dec!(22.05));
        assert_eq!(cost.base, dec!(21.00));
        assert_eq!(cost.tax, dec!(1.05));
    }

    #[test]
    fn tax_inclusive_total_round_trips_to_base() {
        for tax_percentage in [dec!(0), dec!(5), dec!(12.5), dec!(18), dec!(28)] {
            let base = dec!(37.40);
            // an inclusive price chosen so that the exclusive cost is `base`
            let inclusive_price = add_tax(base, tax_percentage) / dec!(4);
            let cost = session_cost(
                &snapshot(StopChargingBy::Duration, 4, 0.0, inclusive_price, dec!(0)),
                inclusive(tax_percentage),
            );

            assert_eq!(cost.total_with_tax, round_money(add_tax(base, tax_percentage)));
            let recovered = strip_tax(cost.total_with_tax, tax_percentage);
            assert!(
                (recovered - base).abs() <= dec!(0.01),
                "tax {tax_percentage}: recovered {recovered}, expected {base}"
            );
            assert!((cost.base - base).abs() <= dec!(0.01));
        }
    }
}
