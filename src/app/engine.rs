use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::adapters::charger_control::ChargerControl;
use crate::adapters::live::LiveConnectionRegistry;
use crate::adapters::push::PushNotifier;
use crate::app::notifier::{DispatchOutcome, NotificationDispatcher};
use crate::app::remote_stop::{RemoteStopOrchestrator, StopOutcome};
use crate::app::services::{MeteringStore, ServiceError};
use crate::domain::billing::{TaxTreatment, session_cost};
use crate::domain::clock::{Clock, TimestampMs};
use crate::domain::cutoff::{
    CutoffDecision, CutoffInput, CutoffLimits, FreeUsagePolicy, FundsCutoff, PreAuthFundsCutoff,
    PricedSession, StoredValueCutoff, aggregate_cost, evaluate, is_energy_stalled,
};
use crate::domain::metering::build_snapshot;
use crate::domain::models::{
    CredentialId, MeterValuesPayload, OwnerId, PaymentMethod, Session, SessionId, SessionKey,
    TenancyMode, TenantId, TenantProfile,
};
use crate::domain::tenancy::{CredentialMap, aggregate_credentials, resolve_tenant_scopes};

pub const METER_VALUES_EVENT: &str = "meter_values";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Used when the tenant has no `minimum_wallet_balance` property.
    pub default_minimum_reserve: Decimal,
    pub free_minutes_cap: i64,
    pub free_energy_cap_kwh: f64,
    pub free_usage_policy: FreeUsagePolicy,
    pub stalled_connector_type: String,
    pub stalled_sample_window: usize,
    pub external_call_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_minimum_reserve: Decimal::TEN,
            free_minutes_cap: 120,
            free_energy_cap_kwh: 45.0,
            free_usage_policy: FreeUsagePolicy::LogOnly,
            stalled_connector_type: "15A".to_string(),
            stalled_sample_window: 5,
            external_call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    MissingObject(&'static str),
    #[error(transparent)]
    Store(#[from] ServiceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub payload: MeterValuesPayload,
    pub decision: CutoffDecision,
    pub stops: Vec<(SessionKey, StopOutcome)>,
    pub notification: DispatchOutcome,
}

/// Handles one meter-value tick for a running session.
pub struct MeteringEngine {
    store: Arc<dyn MeteringStore>,
    live: Arc<dyn LiveConnectionRegistry>,
    clock: Arc<dyn Clock>,
    stopper: RemoteStopOrchestrator,
    notifier: NotificationDispatcher,
    settings: EngineSettings,
}

impl MeteringEngine {
    pub fn new(
        store: Arc<dyn MeteringStore>,
        control: Arc<dyn ChargerControl>,
        push: Arc<dyn PushNotifier>,
        live: Arc<dyn LiveConnectionRegistry>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let stopper = RemoteStopOrchestrator::new(
            control,
            Arc::clone(&push),
            Arc::clone(&live),
            Arc::clone(&store),
            Arc::clone(&clock),
            settings.external_call_timeout,
        );
        let notifier = NotificationDispatcher::new(Arc::clone(&store), push, Arc::clone(&clock));

        Self {
            store,
            live,
            clock,
            stopper,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn MeteringStore> {
        &self.store
    }

    pub fn live(&self) -> &Arc<dyn LiveConnectionRegistry> {
        &self.live
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn process_tick(
        &self,
        tenant: &TenantId,
        session_id: SessionId,
    ) -> Result<TickOutcome, EngineError> {
        let now = self.clock.now();

        let session = self
            .store
            .running_session(tenant, session_id)
            .await?
            .ok_or(EngineError::MissingObject("running session"))?;
        let owner = self
            .store
            .owner_of_credential(tenant, &session.credential)
            .await?
            .ok_or(EngineError::MissingObject("owner of credential"))?;
        let profile = self
            .store
            .tenant_profile(tenant)
            .await?
            .ok_or(EngineError::MissingObject("tenant"))?;

        let (credentials, enterprise_credentials) =
            self.owner_credentials(&profile, &owner).await?;
        if credentials.is_empty() && enterprise_credentials.is_empty() {
            return Err(EngineError::MissingObject("Rfid card"));
        }

        let sessions = self.locate_sessions(&credentials, &session).await?;
        let (triggering, owner_sessions) = self
            .price_sessions(sessions, &session, &owner, now)
            .await?;

        let stalled = self.is_stalled(&session).await?;
        let funds = if stalled || aggregate_cost(&owner_sessions).is_zero() {
            None
        } else {
            Some(self.funds_cutoff(&session, &profile, &owner).await?)
        };

        let limits = CutoffLimits {
            minimum_reserve: self
                .store
                .minimum_reserve(tenant)
                .await?
                .unwrap_or(self.settings.default_minimum_reserve),
            free_minutes_cap: self.settings.free_minutes_cap,
            free_energy_cap_kwh: self.settings.free_energy_cap_kwh,
            free_usage_policy: self.settings.free_usage_policy,
        };

        let decision = evaluate(&CutoffInput {
            triggering: &triggering,
            owner_sessions: &owner_sessions,
            stalled,
            funds: funds.as_deref(),
            limits: &limits,
        });
        log_decision(&decision, &triggering, &owner_sessions);

        let stops = join_all(decision.terminations().iter().map(|request| async move {
            (request.session.clone(), self.stopper.execute(request).await)
        }));
        let notification = self.notifier.dispatch(
            &owner,
            &triggering.snapshot,
            triggering.cost.total_with_tax,
        );
        let (stops, notification) = futures::join!(stops, notification);

        let payload = MeterValuesPayload {
            time_elapsed: triggering.snapshot.elapsed_display.clone(),
            energy_transferred: triggering.snapshot.energy_kwh.to_string(),
            power: triggering.snapshot.power_kw.to_string(),
            price: format!("{:.2}", triggering.cost.total_with_tax),
            soc: triggering.snapshot.soc,
            session_id,
            tenant_id: tenant.clone(),
        };

        match serde_json::to_value(&payload) {
            Ok(value) => {
                self.live.send(&owner, tenant, METER_VALUES_EVENT, value);
            }
            Err(error) => tracing::warn!(error = %error, "failed to encode live meter values"),
        }

        Ok(TickOutcome {
            payload,
            decision,
            stops,
            notification,
        })
    }

    /// Per-scope credentials of the owner, plus the enterprise-level ones.
    /// An enterprise without child scopes still reports its enterprise cards.
    async fn owner_credentials(
        &self,
        profile: &TenantProfile,
        owner: &OwnerId,
    ) -> Result<(CredentialMap, Vec<CredentialId>), EngineError> {
        let (children, enterprise_credentials) = match profile.mode {
            TenancyMode::SingleTenant => (Vec::new(), Vec::new()),
            TenancyMode::Enterprise => (
                self.store.enterprise_scopes(&profile.tenant_id).await?,
                self.store.enterprise_credentials(owner).await?,
            ),
        };
        let scopes = resolve_tenant_scopes(&profile.tenant_id, profile.mode, children);

        let per_scope = join_all(scopes.into_iter().map(|scope| async move {
            let credentials = self.store.credentials_for_owner(&scope, owner).await?;
            Ok::<_, ServiceError>((scope, credentials))
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        let credentials = aggregate_credentials(per_scope, &enterprise_credentials);
        Ok((credentials, enterprise_credentials))
    }

    /// Every running session of the owner across the resolved scopes. The
    /// triggering session is always part of the result.
    async fn locate_sessions(
        &self,
        credentials: &CredentialMap,
        triggering: &Session,
    ) -> Result<Vec<Session>, EngineError> {
        let located = join_all(credentials.iter().map(|(scope, credentials)| async move {
            let credentials: Vec<_> = credentials.iter().cloned().collect();
            self.store.find_running_sessions(scope, &credentials).await
        }))
        .await;

        let mut sessions = BTreeMap::new();
        for scope_sessions in located {
            for session in scope_sessions? {
                sessions.insert(session.key(), session);
            }
        }

        if !sessions.contains_key(&triggering.key()) {
            tracing::warn!(
                session = %triggering.key(),
                credential = %triggering.credential,
                searched_scopes = credentials.len(),
                "triggering session not found through owner credentials, adding it"
            );
            sessions.insert(triggering.key(), triggering.clone());
        }

        Ok(sessions.into_values().collect())
    }

    /// Snapshot and cost per session, built concurrently. Sessions lacking a
    /// meter sample or billing plan are left out, except the triggering one.
    async fn price_sessions(
        &self,
        sessions: Vec<Session>,
        triggering: &Session,
        owner: &OwnerId,
        now: TimestampMs,
    ) -> Result<(PricedSession, Vec<PricedSession>), EngineError> {
        let priced = join_all(sessions.into_iter().map(|session| async move {
            let result = self.price_session(&session, owner, now).await;
            (session, result)
        }))
        .await;

        let triggering_key = triggering.key();
        let mut current = None;
        let mut owner_sessions = Vec::with_capacity(priced.len());

        for (session, result) in priced {
            let is_triggering = session.key() == triggering_key;
            match result {
                Ok(Some(priced)) => {
                    if is_triggering {
                        current = Some(priced.clone());
                    }
                    owner_sessions.push(priced);
                }
                Ok(None) if is_triggering => {
                    return Err(EngineError::MissingObject("meter values or billing plan"));
                }
                Ok(None) => {
                    tracing::info!(
                        session = %session.key(),
                        "session has no meter values or billing plan yet, excluded from this tick"
                    );
                }
                Err(error) if is_triggering => return Err(error.into()),
                Err(error) => {
                    tracing::warn!(
                        session = %session.key(),
                        error = %error,
                        "failed to price session, excluded from this tick"
                    );
                }
            }
        }

        let current = current.ok_or(EngineError::MissingObject("meter values or billing plan"))?;
        Ok((current, owner_sessions))
    }

    async fn price_session(
        &self,
        session: &Session,
        owner: &OwnerId,
        now: TimestampMs,
    ) -> Result<Option<PricedSession>, ServiceError> {
        let (sample, plan) = futures::try_join!(
            self.store.latest_meter_sample(&session.tenant_id, session.id),
            self.store.billing_plan(&session.tenant_id, session.id),
        )?;

        let Some(snapshot) = build_snapshot(session, sample.as_ref(), plan.as_ref(), now) else {
            return Ok(None);
        };
        let Some(plan) = plan else {
            return Ok(None);
        };

        let cost = session_cost(
            &snapshot,
            TaxTreatment {
                price_include_tax: plan.price_include_tax,
                tax_percentage: plan.tax_percentage,
            },
        );

        Ok(Some(PricedSession {
            session: session.clone(),
            owner_id: owner.clone(),
            snapshot,
            cost,
        }))
    }

    async fn is_stalled(&self, session: &Session) -> Result<bool, EngineError> {
        let connector_type = self.store.connector_type(session).await?;
        if connector_type.as_deref() != Some(self.settings.stalled_connector_type.as_str()) {
            return Ok(false);
        }

        let registers = self
            .store
            .recent_energy_registers(
                &session.tenant_id,
                session.id,
                self.settings.stalled_sample_window,
            )
            .await?;

        Ok(is_energy_stalled(&registers, self.settings.stalled_sample_window))
    }

    async fn funds_cutoff(
        &self,
        session: &Session,
        profile: &TenantProfile,
        owner: &OwnerId,
    ) -> Result<Box<dyn FundsCutoff>, EngineError> {
        match self
            .store
            .payment_method(&session.tenant_id, session.id)
            .await?
        {
            PaymentMethod::Wallet => {
                let wallet_balance = self
                    .store
                    .wallet_balance(owner, profile.wallet_scope())
                    .await?
                    .ok_or(EngineError::MissingObject("wallet"))?;
                Ok(Box::new(StoredValueCutoff { wallet_balance }))
            }
            PaymentMethod::CardHold(hold_id) => {
                let hold_amount = self
                    .store
                    .pre_authorized_fund(&hold_id)
                    .await?
                    .ok_or(EngineError::MissingObject("pre-authorized fund"))?;
                Ok(Box::new(PreAuthFundsCutoff { hold_amount }))
            }
        }
    }
}

fn log_decision(
    decision: &CutoffDecision,
    triggering: &PricedSession,
    owner_sessions: &[PricedSession],
) {
    match decision {
        CutoffDecision::NoAction => tracing::debug!(
            session = %triggering.session.key(),
            owner_id = %triggering.owner_id,
            cost = %triggering.cost.total_with_tax,
            aggregate_cost = %aggregate_cost(owner_sessions),
            "no cutoff"
        ),
        CutoffDecision::Terminate(requests) => {
            for request in requests {
                tracing::info!(
                    session = %request.session,
                    owner_id = %request.owner_id,
                    charger_id = %request.charger_id,
                    reason = request.reason.as_str(),
                    triggered_by = %triggering.session.key(),
                    "cutoff decided"
                );
            }
        }
        CutoffDecision::FreeUsageCapLogged(session) => tracing::info!(
            session = %session,
            owner_id = %triggering.owner_id,
            elapsed_ms = triggering.snapshot.elapsed_ms,
            energy_kwh = triggering.snapshot.energy_kwh,
            "free usage cap reached, stop not issued"
        ),
    }
}
