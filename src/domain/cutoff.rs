use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::billing::SessionCost;
use crate::domain::metering::MeteringSnapshot;
use crate::domain::models::{CredentialId, OwnerId, Session, SessionKey, StopChargingBy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffReason {
    StalledEnergy,
    PreAuthorizedFundsExhausted,
    StoredValueExhausted,
    FreeUsageCapReached,
}

impl CutoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StalledEnergy => "stalled_energy",
            Self::PreAuthorizedFundsExhausted => "pre_authorized_funds_exhausted",
            Self::StoredValueExhausted => "stored_value_exhausted",
            Self::FreeUsageCapReached => "free_usage_cap_reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeUsagePolicy {
    LogOnly,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CutoffLimits {
    pub minimum_reserve: Decimal,
    pub free_minutes_cap: i64,
    pub free_energy_cap_kwh: f64,
    pub free_usage_policy: FreeUsagePolicy,
}

/// A running session with its metering snapshot and cost for this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedSession {
    pub session: Session,
    pub owner_id: OwnerId,
    pub snapshot: MeteringSnapshot,
    pub cost: SessionCost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationRequest {
    pub session: SessionKey,
    pub charger_id: String,
    pub credential: CredentialId,
    pub owner_id: OwnerId,
    pub reason: CutoffReason,
}

impl TerminationRequest {
    fn for_session(priced: &PricedSession, reason: CutoffReason) -> Self {
        Self {
            session: priced.session.key(),
            charger_id: priced.session.charger_id.clone(),
            credential: priced.session.credential.clone(),
            owner_id: priced.owner_id.clone(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutoffDecision {
    NoAction,
    Terminate(Vec<TerminationRequest>),
    /// Free-usage cap crossed while the policy only logs it.
    FreeUsageCapLogged(SessionKey),
}

impl CutoffDecision {
    pub fn terminations(&self) -> &[TerminationRequest] {
        match self {
            Self::Terminate(requests) => requests,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationScope {
    TriggeringSession,
    AllOwnerSessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundsExposure {
    pub triggering_cost: Decimal,
    pub aggregate_cost: Decimal,
    pub minimum_reserve: Decimal,
}

/// Funds-based stop condition selected by the session's payment method.
pub trait FundsCutoff: Send + Sync {
    fn reason(&self) -> CutoffReason;
    fn scope(&self) -> TerminationScope;
    fn is_exhausted(&self, exposure: &FundsExposure) -> bool;
}

/// Prepaid wallet covering every running session of the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredValueCutoff {
    pub wallet_balance: Decimal,
}

impl FundsCutoff for StoredValueCutoff {
    fn reason(&self) -> CutoffReason {
        CutoffReason::StoredValueExhausted
    }

    fn scope(&self) -> TerminationScope {
        TerminationScope::AllOwnerSessions
    }

    fn is_exhausted(&self, exposure: &FundsExposure) -> bool {
        self.wallet_balance <= exposure.aggregate_cost + exposure.minimum_reserve
    }
}

/// Card hold placed for one (charger, connector, owner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreAuthFundsCutoff {
    pub hold_amount: Decimal,
}

impl FundsCutoff for PreAuthFundsCutoff {
    fn reason(&self) -> CutoffReason {
        CutoffReason::PreAuthorizedFundsExhausted
    }

    fn scope(&self) -> TerminationScope {
        TerminationScope::TriggeringSession
    }

    fn is_exhausted(&self, exposure: &FundsExposure) -> bool {
        self.hold_amount <= exposure.triggering_cost + exposure.minimum_reserve
    }
}

/// Faulty or disconnected meter: exactly `window` samples that are all equal
/// or all negative.
pub fn is_energy_stalled(registers: &[f64], window: usize) -> bool {
    if window == 0 || registers.len() != window {
        return false;
    }

    let first = registers[0];
    let all_equal = registers.iter().all(|value| *value == first);
    let all_negative = registers.iter().all(|value| *value < 0.0);

    all_equal || all_negative
}

pub fn aggregate_cost<'a>(sessions: impl IntoIterator<Item = &'a PricedSession>) -> Decimal {
    sessions
        .into_iter()
        .map(|priced| priced.cost.total_with_tax)
        .sum()
}

pub fn free_usage_cap_reached(snapshot: &MeteringSnapshot, limits: &CutoffLimits) -> bool {
    match snapshot.stop_charging_by {
        StopChargingBy::Duration => snapshot
            .elapsed_minutes()
            .trunc()
            .to_i64()
            .is_some_and(|minutes| minutes >= limits.free_minutes_cap),
        StopChargingBy::Energy => snapshot.energy_kwh >= limits.free_energy_cap_kwh,
    }
}

pub struct CutoffInput<'a> {
    pub triggering: &'a PricedSession,
    /// Every running session of the owner across all resolved scopes,
    /// the triggering one included.
    pub owner_sessions: &'a [PricedSession],
    pub stalled: bool,
    /// Only consulted when the aggregate cost is non-zero.
    pub funds: Option<&'a dyn FundsCutoff>,
    pub limits: &'a CutoffLimits,
}

/// Stalled energy, then funds, then the free-usage cap; first hit wins.
pub fn evaluate(input: &CutoffInput<'_>) -> CutoffDecision {
    if input.stalled {
        return CutoffDecision::Terminate(vec![TerminationRequest::for_session(
            input.triggering,
            CutoffReason::StalledEnergy,
        )]);
    }

    let aggregate = aggregate_cost(input.owner_sessions);

    if !aggregate.is_zero() {
        let Some(funds) = input.funds else {
            return CutoffDecision::NoAction;
        };

        let exposure = FundsExposure {
            triggering_cost: input.triggering.cost.total_with_tax,
            aggregate_cost: aggregate,
            minimum_reserve: input.limits.minimum_reserve,
        };

        if !funds.is_exhausted(&exposure) {
            return CutoffDecision::NoAction;
        }

        let reason = funds.reason();
        let requests = match funds.scope() {
            TerminationScope::TriggeringSession => {
                vec![TerminationRequest::for_session(input.triggering, reason)]
            }
            TerminationScope::AllOwnerSessions => input
                .owner_sessions
                .iter()
                .map(|priced| TerminationRequest::for_session(priced, reason))
                .collect(),
        };

        return CutoffDecision::Terminate(requests);
    }

    if free_usage_cap_reached(&input.triggering.snapshot, input.limits) {
        return match input.limits.free_usage_policy {
            FreeUsagePolicy::LogOnly => {
                CutoffDecision::FreeUsageCapLogged(input.triggering.session.key())
            }
            FreeUsagePolicy::Stop => CutoffDecision::Terminate(vec![
                TerminationRequest::for_session(input.triggering, CutoffReason::FreeUsageCapReached),
            ]),
        };
    }

    CutoffDecision::NoAction
}
