//! Native commissioner: per-interface session management
//!
//! A [`Commissioner`] owns one [`InterfaceContext`] per registered
//! interface. Everything runs on the caller's thread and to completion;
//! leader answers are fed back in through [`Commissioner::handle_link_event`]
//! (or the individual `on_*` methods) when the transport delivers them.
//!
//! Timers are the caller's job: renew with
//! [`Commissioner::petition_keep_alive`] every
//! [`KEEP_ALIVE_INTERVAL`] and call [`Commissioner::check_keep_alive_expiry`]
//! to drop sessions that were not renewed within the grace window.

pub mod finalisation;
pub mod petition;
pub mod registry;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::CommissionError;
use crate::link::{LinkEvent, MeshLink};
use crate::meshcop::steering::{SteeringData, STEERING_DATA_MAX_LEN};
use crate::meshcop::{CommissioningState, Eui64};
use crate::InterfaceId;
use finalisation::FinalisationDecision;
use petition::{PetitionAttempt, PetitionController, PetitionState, PetitionTicket, StatusCallback};
use registry::{FinalisationCallback, JoinerInfo, JoinerRegistry, RegistryCursor};

/// Keep-alive cadence expected by the leader
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(40);
/// Missed-renewal tolerance, in multiples of the cadence
pub const KEEP_ALIVE_GRACE_FACTOR: u32 = 2;

#[derive(Debug, Clone)]
pub struct CommissionerSettings {
    pub keep_alive_interval: Duration,
    pub keep_alive_grace_factor: u32,
    /// Remove a joiner from the registry once its finalisation is accepted
    pub purge_on_accept: bool,
    pub steering_data_len: usize,
}

impl CommissionerSettings {
    /// Saturates instead of overflowing; a saturated window never expires.
    pub fn keep_alive_grace(&self) -> Duration {
        self.keep_alive_interval
            .checked_mul(self.keep_alive_grace_factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for CommissionerSettings {
    fn default() -> Self {
        Self {
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            keep_alive_grace_factor: KEEP_ALIVE_GRACE_FACTOR,
            purge_on_accept: false,
            steering_data_len: STEERING_DATA_MAX_LEN,
        }
    }
}

/// How the commissioner reaches the leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningMode {
    /// Interface is already part of the secured network
    Secure,
    /// Not attached yet: needs discovery and an unsecure attach first
    Unsecure,
}

/// Commissioning state of one interface
#[derive(Debug)]
pub struct InterfaceContext {
    interface_id: InterfaceId,
    mode: CommissioningMode,
    unsecure_attached: bool,
    petition: PetitionController,
    registry: JoinerRegistry,
}

impl InterfaceContext {
    fn new(interface_id: InterfaceId, mode: CommissioningMode) -> Self {
        Self {
            interface_id,
            mode,
            unsecure_attached: false,
            petition: PetitionController::new(interface_id),
            registry: JoinerRegistry::new(),
        }
    }

    pub fn interface_id(&self) -> InterfaceId {
        self.interface_id
    }

    pub fn mode(&self) -> CommissioningMode {
        self.mode
    }

    pub fn is_unsecure_attached(&self) -> bool {
        self.unsecure_attached
    }

    pub fn petition(&self) -> &PetitionController {
        &self.petition
    }

    pub fn registry(&self) -> &JoinerRegistry {
        &self.registry
    }
}

/// What a [`LinkEvent`] resulted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Petition(PetitionState),
    Finalisation {
        eui64: Eui64,
        decision: FinalisationDecision,
    },
}

pub struct Commissioner<L: MeshLink> {
    link: L,
    settings: CommissionerSettings,
    contexts: HashMap<InterfaceId, InterfaceContext>,
    /// Shared by all interfaces and kept across unregister, so a late
    /// answer never matches a later attempt
    next_attempt: PetitionAttempt,
}

impl<L: MeshLink> Commissioner<L> {
    pub fn new(link: L, settings: CommissionerSettings) -> Self {
        Self {
            link,
            settings,
            contexts: HashMap::new(),
            next_attempt: PetitionAttempt(1),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn settings(&self) -> &CommissionerSettings {
        &self.settings
    }

    pub fn context(&self, interface_id: InterfaceId) -> Option<&InterfaceContext> {
        self.contexts.get(&interface_id)
    }

    pub fn petition_state(&self, interface_id: InterfaceId) -> Option<PetitionState> {
        self.context(interface_id).map(|ctx| ctx.petition.state())
    }

    fn context_mut(
        &mut self,
        interface_id: InterfaceId,
    ) -> Result<&mut InterfaceContext, CommissionError> {
        self.contexts
            .get_mut(&interface_id)
            .ok_or(CommissionError::NotRegistered(interface_id))
    }

    // ---- Session lifecycle ----

    /// Start commissioning on an interface. Existing state is never reset.
    pub fn register(&mut self, interface_id: InterfaceId) -> Result<CommissioningMode, CommissionError> {
        if self.contexts.contains_key(&interface_id) {
            return Err(CommissionError::AlreadyRegistered(interface_id));
        }

        let mode = if self.link.is_secured(interface_id) {
            CommissioningMode::Secure
        } else {
            CommissioningMode::Unsecure
        };
        self.contexts
            .insert(interface_id, InterfaceContext::new(interface_id, mode));
        info!("Interface {}: commissioner registered ({:?})", interface_id, mode);
        Ok(mode)
    }

    /// Tear down an interface: cancel the pending petition, resign an active
    /// session, drop every joiner and leave an unsecure network.
    pub fn unregister(&mut self, interface_id: InterfaceId) -> Result<(), CommissionError> {
        let mut ctx = self
            .contexts
            .remove(&interface_id)
            .ok_or(CommissionError::NotRegistered(interface_id))?;

        if ctx.petition.state().is_session_active() {
            let session_id = ctx.petition.session_id();
            if let Err(e) =
                self.link
                    .send_keep_alive(interface_id, CommissioningState::Reject, session_id)
            {
                warn!("Interface {}: resign on unregister failed: {}", interface_id, e);
            }
        }
        ctx.petition.cancel();
        ctx.registry.clear();
        if ctx.unsecure_attached {
            self.link.detach(interface_id);
        }
        info!("Interface {}: commissioner unregistered", interface_id);
        Ok(())
    }

    // ---- Petition ----

    /// Petition the leader for the commissioner role.
    ///
    /// In unsecure mode without a discovered network this fails with
    /// [`CommissionError::ScanRequired`] and changes nothing.
    pub fn petition_start(
        &mut self,
        interface_id: InterfaceId,
        commissioner_id: &str,
        status_cb: Option<StatusCallback>,
    ) -> Result<PetitionTicket, CommissionError> {
        petition::validate_commissioner_id(commissioner_id)?;
        let ctx = self
            .contexts
            .get_mut(&interface_id)
            .ok_or(CommissionError::NotRegistered(interface_id))?;

        if ctx.mode == CommissioningMode::Unsecure && !ctx.unsecure_attached {
            let Some(network) = self.link.selected_network(interface_id) else {
                info!(
                    "Interface {}: no network selected, scan required",
                    interface_id
                );
                return Err(CommissionError::ScanRequired);
            };
            self.link.attach_unsecure(interface_id, &network)?;
            ctx.unsecure_attached = true;
        }

        let attempt = self.next_attempt;
        let ticket = ctx.petition.begin(attempt, commissioner_id, status_cb)?;
        self.next_attempt = attempt.next();
        if let Err(e) = self.link.send_petition(interface_id, attempt, commissioner_id) {
            warn!("Interface {}: petition not sent: {}", interface_id, e);
            ctx.petition.cancel();
            return Err(e);
        }
        Ok(ticket)
    }

    /// Leader answer to the petition in flight. Answers to an earlier,
    /// cancelled attempt are dropped.
    pub fn on_petition_response(
        &mut self,
        interface_id: InterfaceId,
        attempt: PetitionAttempt,
        state: CommissioningState,
        session_id: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<PetitionState, CommissionError> {
        self.context_mut(interface_id)?
            .petition
            .complete(attempt, state, session_id, now)
    }

    /// Caller-driven renewal (`Accept`) or resignation (`Reject`)
    pub fn petition_keep_alive(
        &mut self,
        interface_id: InterfaceId,
        state: CommissioningState,
        now: DateTime<Utc>,
    ) -> Result<(), CommissionError> {
        let ctx = self
            .contexts
            .get_mut(&interface_id)
            .ok_or(CommissionError::NotRegistered(interface_id))?;

        let session_id = ctx.petition.keep_alive(state, now)?;
        if let Err(e) = self.link.send_keep_alive(interface_id, state, session_id) {
            if state == CommissioningState::Accept {
                ctx.petition.fail(&format!("keep-alive not sent: {}", e));
            }
            return Err(e);
        }
        Ok(())
    }

    /// Leader answer to a keep-alive
    pub fn on_keep_alive_response(
        &mut self,
        interface_id: InterfaceId,
        state: CommissioningState,
        now: DateTime<Utc>,
    ) -> Result<PetitionState, CommissionError> {
        self.context_mut(interface_id)?
            .petition
            .keep_alive_answered(state, now)
    }

    /// Drop sessions whose keep-alive is overdue by more than the grace
    /// window. Returns the interfaces that expired.
    pub fn check_keep_alive_expiry(&mut self, now: DateTime<Utc>) -> Vec<InterfaceId> {
        let grace = self.settings.keep_alive_grace();
        let mut expired: Vec<InterfaceId> = self
            .contexts
            .values_mut()
            .filter_map(|ctx| ctx.petition.check_expiry(now, grace).then_some(ctx.interface_id))
            .collect();
        expired.sort_unstable();
        expired
    }

    pub fn next_keep_alive_due(&self, interface_id: InterfaceId) -> Option<DateTime<Utc>> {
        self.context(interface_id)?
            .petition
            .next_keep_alive_due(self.settings.keep_alive_interval)
    }

    /// Time until some interface must send a keep-alive. `None` when no
    /// session needs renewing.
    pub fn next_mandatory_wake(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.contexts
            .keys()
            .filter_map(|id| self.next_keep_alive_due(*id))
            .min()
            .map(|due| (due - now).to_std().unwrap_or(Duration::ZERO))
    }

    // ---- Joiner registry ----

    pub fn device_add(
        &mut self,
        interface_id: InterfaceId,
        short_eui64: bool,
        eui64: &[u8],
        pskd: &[u8],
        finalisation_cb: Option<FinalisationCallback>,
    ) -> Result<(), CommissionError> {
        let ctx = self.context_mut(interface_id)?;
        let replaced = ctx
            .registry
            .add(short_eui64, eui64, pskd, finalisation_cb)?;
        debug!(
            "Interface {}: joiner {} {} ({} joiners)",
            interface_id,
            hex::encode_upper(eui64),
            if replaced { "replaced" } else { "added" },
            ctx.registry.len()
        );
        Ok(())
    }

    pub fn device_delete(&mut self, interface_id: InterfaceId, eui64: &[u8]) -> Result<(), CommissionError> {
        let ctx = self.context_mut(interface_id)?;
        let eui64 = Eui64::try_from(eui64)?;
        ctx.registry.remove(&eui64)?;
        debug!("Interface {}: joiner {} deleted", interface_id, eui64);
        Ok(())
    }

    /// Next joiner after `cursor`. `None` ends the traversal; an
    /// unregistered interface has nothing to traverse.
    pub fn device_get_next(
        &self,
        interface_id: InterfaceId,
        cursor: &RegistryCursor,
    ) -> Option<(JoinerInfo, RegistryCursor)> {
        self.context(interface_id)?.registry.get_next(cursor)
    }

    /// Steering data advertising the joiners currently admitted
    pub fn steering_data(&self, interface_id: InterfaceId) -> Result<SteeringData, CommissionError> {
        self.context(interface_id)
            .ok_or(CommissionError::NotRegistered(interface_id))?
            .registry
            .steering_data(self.settings.steering_data_len)
    }

    // ---- Finalisation ----

    /// Decide a joiner finalisation. The caller sends the response.
    pub fn on_finalisation_message(
        &mut self,
        interface_id: InterfaceId,
        eui64: &[u8],
        message: &[u8],
    ) -> FinalisationDecision {
        let purge = self.settings.purge_on_accept;
        let Some(ctx) = self.contexts.get_mut(&interface_id) else {
            warn!("Finalisation on unregistered interface {}", interface_id);
            return FinalisationDecision::Reject;
        };
        let Ok(eui64) = Eui64::try_from(eui64) else {
            warn!(
                "Interface {}: finalisation with malformed EUI-64 ({} bytes)",
                interface_id,
                eui64.len()
            );
            return FinalisationDecision::Reject;
        };

        let decision = finalisation::validate(&ctx.registry, interface_id, &eui64, message);
        if decision.is_accept() && purge && ctx.registry.remove(&eui64).is_ok() {
            debug!("Interface {}: joiner {} purged after accept", interface_id, eui64);
        }
        decision
    }

    /// Dispatch an answer delivered by the transport
    pub fn handle_link_event(
        &mut self,
        event: LinkEvent,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, CommissionError> {
        match event {
            LinkEvent::PetitionResponse {
                interface_id,
                attempt,
                state,
                session_id,
            } => self
                .on_petition_response(interface_id, attempt, state, session_id, now)
                .map(EventOutcome::Petition),
            LinkEvent::KeepAliveResponse {
                interface_id,
                state,
            } => self
                .on_keep_alive_response(interface_id, state, now)
                .map(EventOutcome::Petition),
            LinkEvent::JoinerFinalisation {
                interface_id,
                eui64,
                message,
            } => {
                let decision =
                    self.on_finalisation_message(interface_id, eui64.as_bytes(), &message);
                Ok(EventOutcome::Finalisation { eui64, decision })
            }
        }
    }
}
