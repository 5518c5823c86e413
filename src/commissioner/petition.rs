//! Petition and keep-alive state machine for one interface
//!
//! ```text
//!   Inactive ──start──▶ Petitioning ──response──▶ Accepted | Pending | Rejected | NoNetwork
//!   Accepted ──keep-alive ok──▶ Accepted
//!   Accepted ──keep-alive failed / expired──▶ Rejected
//!   Accepted | Pending ──resign──▶ Inactive
//! ```
//!
//! The leader's answer arrives later through the transport and is fed in
//! with [`PetitionController::complete`]. Every attempt carries a
//! [`PetitionAttempt`] token which the answer echoes; answers for any other
//! attempt are dropped. Each petition attempt is
//! delivered exactly once, both to the optional status callback and to the
//! [`PetitionTicket`] returned at start, unless the attempt is cancelled
//! first, in which case the callback is never called and the ticket yields
//! [`CommissionError::Cancelled`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::CommissionError;
use crate::meshcop::{CommissioningState, COMMISSIONER_ID_MAX_LEN};
use crate::InterfaceId;

/// Petition result hook: `(interface_id, state) -> status`
pub type StatusCallback = Box<dyn FnOnce(InterfaceId, CommissioningState) -> i32 + Send>;

/// Lifecycle of the commissioner role on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PetitionState {
    Inactive,
    Petitioning,
    Accepted,
    Pending,
    Rejected,
    NoNetwork,
}

impl PetitionState {
    /// Whether the leader currently considers us (possibly) commissioner
    pub fn is_session_active(&self) -> bool {
        matches!(self, Self::Accepted | Self::Pending)
    }

    fn from_outcome(state: CommissioningState) -> Self {
        match state {
            CommissioningState::Accept => Self::Accepted,
            CommissioningState::Pending => Self::Pending,
            CommissioningState::Reject => Self::Rejected,
            CommissioningState::NoNetwork => Self::NoNetwork,
        }
    }
}

impl fmt::Display for PetitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PetitionState::Inactive => write!(f, "Inactive"),
            PetitionState::Petitioning => write!(f, "Petitioning"),
            PetitionState::Accepted => write!(f, "Accepted"),
            PetitionState::Pending => write!(f, "Pending"),
            PetitionState::Rejected => write!(f, "Rejected"),
            PetitionState::NoNetwork => write!(f, "NoNetwork"),
        }
    }
}

/// Token of one petition attempt, echoed back in the leader's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PetitionAttempt(pub u32);

impl PetitionAttempt {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for PetitionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One-shot handle on the outcome of a petition attempt
#[derive(Debug)]
pub struct PetitionTicket {
    rx: oneshot::Receiver<CommissioningState>,
}

impl PetitionTicket {
    /// Non-blocking check: `Ok(None)` while the leader has not answered.
    pub fn try_outcome(&mut self) -> Result<Option<CommissioningState>, CommissionError> {
        match self.rx.try_recv() {
            Ok(state) => Ok(Some(state)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(CommissionError::Cancelled),
        }
    }
}

impl Future for PetitionTicket {
    type Output = Result<CommissioningState, CommissionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| CommissionError::Cancelled))
    }
}

struct Completion {
    tx: oneshot::Sender<CommissioningState>,
    status_cb: Option<StatusCallback>,
}

pub struct PetitionController {
    interface_id: InterfaceId,
    state: PetitionState,
    commissioner_id: Option<String>,
    attempt: Option<PetitionAttempt>,
    session_id: Option<u16>,
    last_keep_alive: Option<DateTime<Utc>>,
    completion: Option<Completion>,
}

impl PetitionController {
    pub fn new(interface_id: InterfaceId) -> Self {
        Self {
            interface_id,
            state: PetitionState::Inactive,
            commissioner_id: None,
            attempt: None,
            session_id: None,
            last_keep_alive: None,
            completion: None,
        }
    }

    pub fn state(&self) -> PetitionState {
        self.state
    }

    pub fn commissioner_id(&self) -> Option<&str> {
        self.commissioner_id.as_deref()
    }

    /// Attempt the controller currently accepts an answer for
    pub fn attempt(&self) -> Option<PetitionAttempt> {
        self.attempt
    }

    /// Commissioner session id granted by the leader
    pub fn session_id(&self) -> Option<u16> {
        self.session_id
    }

    pub fn last_keep_alive(&self) -> Option<DateTime<Utc>> {
        self.last_keep_alive
    }

    /// Move to `Petitioning`. Allowed from every state without a petition
    /// in flight or a live session.
    pub fn begin(
        &mut self,
        attempt: PetitionAttempt,
        commissioner_id: &str,
        status_cb: Option<StatusCallback>,
    ) -> Result<PetitionTicket, CommissionError> {
        validate_commissioner_id(commissioner_id)?;
        if matches!(
            self.state,
            PetitionState::Petitioning | PetitionState::Accepted | PetitionState::Pending
        ) {
            return Err(CommissionError::InvalidState(self.state.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.reset();
        self.commissioner_id = Some(commissioner_id.to_string());
        self.attempt = Some(attempt);
        self.completion = Some(Completion { tx, status_cb });
        self.state = PetitionState::Petitioning;
        info!(
            "Interface {}: petition {} as '{}'",
            self.interface_id, attempt, commissioner_id
        );
        Ok(PetitionTicket { rx })
    }

    /// Apply the leader's answer to the petition in flight. An answer for
    /// another attempt is dropped and leaves the controller untouched.
    pub fn complete(
        &mut self,
        attempt: PetitionAttempt,
        outcome: CommissioningState,
        session_id: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<PetitionState, CommissionError> {
        if self.state != PetitionState::Petitioning {
            return Err(CommissionError::InvalidState(self.state.to_string()));
        }
        if self.attempt != Some(attempt) {
            debug!(
                "Interface {}: dropping answer {} to stale petition {}",
                self.interface_id, outcome, attempt
            );
            return Err(CommissionError::InvalidState(format!(
                "stale petition answer {}",
                attempt
            )));
        }

        self.state = PetitionState::from_outcome(outcome);
        if self.state.is_session_active() {
            self.session_id = session_id;
            self.last_keep_alive = Some(now);
        }
        info!(
            "Interface {}: petition answered {} (session {:?})",
            self.interface_id, outcome, session_id
        );

        if let Some(completion) = self.completion.take() {
            if let Some(cb) = completion.status_cb {
                let status = cb(self.interface_id, outcome);
                if status != 0 {
                    warn!(
                        "Interface {}: status callback returned {}",
                        self.interface_id, status
                    );
                }
            }
            // Receiver may already be gone; the callback was still told
            let _ = completion.tx.send(outcome);
        }
        Ok(self.state)
    }

    /// Validate a caller-driven keep-alive and return the session id to
    /// send it with. A renewal restarts the cadence from `now`.
    ///
    /// `Accept` renews the session; `Reject` resigns the role and returns
    /// the controller to `Inactive`.
    pub fn keep_alive(
        &mut self,
        state: CommissioningState,
        now: DateTime<Utc>,
    ) -> Result<Option<u16>, CommissionError> {
        if !self.state.is_session_active() {
            return Err(CommissionError::InvalidState(self.state.to_string()));
        }
        let session_id = self.session_id;
        match state {
            CommissioningState::Accept => {
                debug!(
                    "Interface {}: keep-alive for session {:?}",
                    self.interface_id, session_id
                );
                self.last_keep_alive = Some(now);
            }
            CommissioningState::Reject => {
                info!("Interface {}: resigning commissioner role", self.interface_id);
                self.reset();
            }
            other => {
                return Err(CommissionError::invalid(format!(
                    "keep-alive state must be Accept or Reject, got {}",
                    other
                )))
            }
        }
        Ok(session_id)
    }

    /// Leader's answer to a keep-alive
    pub fn keep_alive_answered(
        &mut self,
        outcome: CommissioningState,
        now: DateTime<Utc>,
    ) -> Result<PetitionState, CommissionError> {
        if !self.state.is_session_active() {
            return Err(CommissionError::InvalidState(self.state.to_string()));
        }
        if outcome == CommissioningState::Accept {
            self.state = PetitionState::Accepted;
            self.last_keep_alive = Some(now);
        } else {
            self.fail(&format!("keep-alive answered {}", outcome));
        }
        Ok(self.state)
    }

    /// Drop the session after a lost or failed keep-alive
    pub fn fail(&mut self, reason: &str) {
        warn!(
            "Interface {}: commissioner session lost ({})",
            self.interface_id, reason
        );
        self.state = PetitionState::Rejected;
        self.session_id = None;
    }

    /// Moves an `Accepted` session whose last renewal is older than `grace`
    /// to `Rejected`. Returns true when that happened.
    pub fn check_expiry(&mut self, now: DateTime<Utc>, grace: Duration) -> bool {
        if self.state != PetitionState::Accepted {
            return false;
        }
        let Some(last) = self.last_keep_alive else {
            return false;
        };
        let Ok(grace) = chrono::Duration::from_std(grace) else {
            return false;
        };
        if now - last > grace {
            self.fail("keep-alive expired");
            return true;
        }
        false
    }

    /// When the next keep-alive has to be sent, if a session is active
    pub fn next_keep_alive_due(&self, cadence: Duration) -> Option<DateTime<Utc>> {
        if !self.state.is_session_active() {
            return None;
        }
        let cadence = chrono::Duration::from_std(cadence).ok()?;
        self.last_keep_alive?.checked_add_signed(cadence)
    }

    /// Abandon any petition in flight. The pending outcome is never
    /// delivered; its ticket resolves as cancelled.
    pub fn cancel(&mut self) {
        if self.completion.take().is_some() {
            info!(
                "Interface {}: pending petition cancelled",
                self.interface_id
            );
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = PetitionState::Inactive;
        self.attempt = None;
        self.session_id = None;
        self.last_keep_alive = None;
    }
}

impl fmt::Debug for PetitionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PetitionController")
            .field("interface_id", &self.interface_id)
            .field("state", &self.state)
            .field("commissioner_id", &self.commissioner_id)
            .field("attempt", &self.attempt)
            .field("session_id", &self.session_id)
            .field("last_keep_alive", &self.last_keep_alive)
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

pub(crate) fn validate_commissioner_id(id: &str) -> Result<(), CommissionError> {
    if id.is_empty() {
        return Err(CommissionError::invalid("commissioner id is empty"));
    }
    if id.len() > COMMISSIONER_ID_MAX_LEN {
        return Err(CommissionError::invalid(format!(
            "commissioner id is {} bytes, limit {}",
            id.len(),
            COMMISSIONER_ID_MAX_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const A: PetitionAttempt = PetitionAttempt(1);

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn counting_cb(counter: Arc<AtomicUsize>) -> StatusCallback {
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        })
    }

    #[test]
    fn test_begin_validates_id() {
        let mut petition = PetitionController::new(1);
        assert!(petition.begin(A, "", None).is_err());
        assert!(petition.begin(A, &"x".repeat(65), None).is_err());
        assert_eq!(petition.state(), PetitionState::Inactive);
        assert!(petition.begin(A, &"x".repeat(64), None).is_ok());
        assert_eq!(petition.state(), PetitionState::Petitioning);
        assert_eq!(petition.commissioner_id(), Some("x".repeat(64).as_str()));
        assert_eq!(petition.attempt(), Some(A));
    }

    #[test]
    fn test_accept_delivers_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut petition = PetitionController::new(1);
        let mut ticket = petition.begin(A, "comm-1", Some(counting_cb(calls.clone()))).unwrap();
        assert_eq!(ticket.try_outcome().unwrap(), None);

        let state = petition
            .complete(A, CommissioningState::Accept, Some(0x1234), t0())
            .unwrap();
        assert_eq!(state, PetitionState::Accepted);
        assert_eq!(petition.session_id(), Some(0x1234));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ticket.try_outcome().unwrap(),
            Some(CommissioningState::Accept)
        );

        // A duplicate answer is refused and not delivered again
        assert!(petition
            .complete(A, CommissioningState::Reject, None, t0())
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_outcome_mapping() {
        for (outcome, expected) in [
            (CommissioningState::Pending, PetitionState::Pending),
            (CommissioningState::Reject, PetitionState::Rejected),
            (CommissioningState::NoNetwork, PetitionState::NoNetwork),
        ] {
            let mut petition = PetitionController::new(2);
            petition.begin(A, "comm", None).unwrap();
            assert_eq!(petition.complete(A, outcome, None, t0()).unwrap(), expected);
        }
    }

    #[test]
    fn test_cancel_never_calls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut petition = PetitionController::new(1);
        let ticket = petition.begin(A, "comm-1", Some(counting_cb(calls.clone()))).unwrap();

        petition.cancel();
        assert_eq!(petition.state(), PetitionState::Inactive);
        assert!(petition
            .complete(A, CommissioningState::Accept, None, t0())
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            tokio_test::block_on(ticket),
            Err(CommissionError::Cancelled)
        );
    }

    #[test]
    fn test_ticket_resolves_asynchronously() {
        let mut petition = PetitionController::new(1);
        let ticket = petition.begin(A, "comm-1", None).unwrap();
        petition
            .complete(A, CommissioningState::Pending, None, t0())
            .unwrap();
        assert_eq!(
            tokio_test::block_on(ticket),
            Ok(CommissioningState::Pending)
        );
    }

    #[test]
    fn test_begin_refused_while_in_flight_or_active() {
        let mut petition = PetitionController::new(1);
        petition.begin(A, "comm", None).unwrap();
        assert!(matches!(
            petition.begin(A, "comm", None),
            Err(CommissionError::InvalidState(_))
        ));
        petition
            .complete(A, CommissioningState::Accept, Some(1), t0())
            .unwrap();
        assert!(petition.begin(A, "comm", None).is_err());
    }

    #[test]
    fn test_retry_after_reject() {
        let mut petition = PetitionController::new(1);
        petition.begin(A, "comm", None).unwrap();
        petition
            .complete(A, CommissioningState::Reject, None, t0())
            .unwrap();
        assert!(petition.begin(A, "comm", None).is_ok());
    }

    #[test]
    fn test_keep_alive_requires_session() {
        let mut petition = PetitionController::new(1);
        assert!(matches!(
            petition.keep_alive(CommissioningState::Accept, t0()),
            Err(CommissionError::InvalidState(_))
        ));
        petition.begin(A, "comm", None).unwrap();
        assert!(petition.keep_alive(CommissioningState::Accept, t0()).is_err());
        assert_eq!(petition.state(), PetitionState::Petitioning);
    }

    #[test]
    fn test_keep_alive_renew_and_resign() {
        let mut petition = PetitionController::new(1);
        petition.begin(A, "comm", None).unwrap();
        petition
            .complete(A, CommissioningState::Accept, Some(7), t0())
            .unwrap();

        assert_eq!(petition.keep_alive(CommissioningState::Accept, t0()), Ok(Some(7)));
        let later = t0() + chrono::Duration::seconds(40);
        assert_eq!(
            petition
                .keep_alive_answered(CommissioningState::Accept, later)
                .unwrap(),
            PetitionState::Accepted
        );
        assert_eq!(petition.last_keep_alive(), Some(later));

        assert!(petition.keep_alive(CommissioningState::Pending, t0()).is_err());
        assert_eq!(petition.keep_alive(CommissioningState::Reject, t0()), Ok(Some(7)));
        assert_eq!(petition.state(), PetitionState::Inactive);
    }

    #[test]
    fn test_keep_alive_rejected_by_leader() {
        let mut petition = PetitionController::new(1);
        petition.begin(A, "comm", None).unwrap();
        petition
            .complete(A, CommissioningState::Accept, Some(7), t0())
            .unwrap();
        assert_eq!(
            petition
                .keep_alive_answered(CommissioningState::Reject, t0())
                .unwrap(),
            PetitionState::Rejected
        );
    }

    #[test]
    fn test_expiry_after_grace() {
        let cadence = Duration::from_secs(40);
        let mut petition = PetitionController::new(1);
        petition.begin(A, "comm", None).unwrap();
        petition
            .complete(A, CommissioningState::Accept, Some(7), t0())
            .unwrap();

        assert_eq!(
            petition.next_keep_alive_due(cadence),
            Some(t0() + chrono::Duration::seconds(40))
        );
        assert!(!petition.check_expiry(t0() + chrono::Duration::seconds(80), cadence * 2));
        assert!(petition.check_expiry(t0() + chrono::Duration::seconds(81), cadence * 2));
        assert_eq!(petition.state(), PetitionState::Rejected);
        assert_eq!(petition.next_keep_alive_due(cadence), None);
    }

    #[test]
    fn test_answer_for_other_attempt_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut petition = PetitionController::new(1);
        let mut ticket = petition
            .begin(A.next(), "comm-1", Some(counting_cb(calls.clone())))
            .unwrap();

        assert!(matches!(
            petition.complete(A, CommissioningState::Accept, Some(3), t0()),
            Err(CommissionError::InvalidState(_))
        ));
        assert_eq!(petition.state(), PetitionState::Petitioning);
        assert_eq!(petition.session_id(), None);
        assert_eq!(ticket.try_outcome(), Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(
            petition
                .complete(A.next(), CommissioningState::Reject, None, t0())
                .unwrap(),
            PetitionState::Rejected
        );
        assert_eq!(ticket.try_outcome(), Ok(Some(CommissioningState::Reject)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_huge_cadence_has_no_due_time() {
        let mut petition = PetitionController::new(1);
        petition.begin(A, "comm", None).unwrap();
        petition
            .complete(A, CommissioningState::Accept, Some(7), t0())
            .unwrap();
        assert_eq!(
            petition.next_keep_alive_due(Duration::from_secs(10_000_000_000_000)),
            None
        );
        assert!(!petition.check_expiry(t0() + chrono::Duration::days(365), Duration::MAX));
    }
}
