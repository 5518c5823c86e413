//! Boundary to the rest of the mesh stack
//!
//! The commissioner never touches the radio. Discovery, the unsecure attach
//! and the secured transport of petition / keep-alive messages are done by
//! whatever implements [`MeshLink`]; leader answers come back as
//! [`LinkEvent`]s which the host feeds into the commissioner.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::commissioner::petition::PetitionAttempt;
use crate::error::CommissionError;
use crate::meshcop::{CommissioningState, Eui64, NetworkCandidate};
use crate::InterfaceId;

pub trait MeshLink {
    /// True when the interface already holds the network security material
    fn is_secured(&self, interface_id: InterfaceId) -> bool;

    /// Network picked by discovery for unsecure commissioning
    fn selected_network(&self, interface_id: InterfaceId) -> Option<NetworkCandidate>;

    /// Temporarily join `network` without credentials
    fn attach_unsecure(
        &mut self,
        interface_id: InterfaceId,
        network: &NetworkCandidate,
    ) -> Result<(), CommissionError>;

    /// Leave a network joined with [`MeshLink::attach_unsecure`]
    fn detach(&mut self, interface_id: InterfaceId);

    /// Send a petition. The leader's answer must carry `attempt` back.
    fn send_petition(
        &mut self,
        interface_id: InterfaceId,
        attempt: PetitionAttempt,
        commissioner_id: &str,
    ) -> Result<(), CommissionError>;

    fn send_keep_alive(
        &mut self,
        interface_id: InterfaceId,
        state: CommissioningState,
        session_id: Option<u16>,
    ) -> Result<(), CommissionError>;
}

/// Leader answers delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    PetitionResponse {
        interface_id: InterfaceId,
        attempt: PetitionAttempt,
        state: CommissioningState,
        session_id: Option<u16>,
    },
    KeepAliveResponse {
        interface_id: InterfaceId,
        state: CommissioningState,
    },
    /// Joiner finalisation request, payload still TLV encoded
    JoinerFinalisation {
        interface_id: InterfaceId,
        eui64: Eui64,
        message: Bytes,
    },
}

/// In-process stand-in for the leader.
///
/// Answers every petition and keep-alive with a fixed verdict through an
/// mpsc channel, so the commissioner can run without a radio.
#[derive(Debug)]
pub struct LoopbackLink {
    secured: bool,
    network: Option<NetworkCandidate>,
    verdict: CommissioningState,
    next_session_id: u16,
    attached: Option<InterfaceId>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LoopbackLink {
    pub fn new(
        secured: bool,
        network: Option<NetworkCandidate>,
        verdict: CommissioningState,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                secured,
                network,
                verdict,
                next_session_id: 1,
                attached: None,
                events: tx,
            },
            rx,
        )
    }

    /// Interface currently holding an unsecure attach
    pub fn attached(&self) -> Option<InterfaceId> {
        self.attached
    }

    /// Simulate a completed network scan
    pub fn set_network(&mut self, network: Option<NetworkCandidate>) {
        self.network = network;
    }

    pub fn set_verdict(&mut self, verdict: CommissioningState) {
        self.verdict = verdict;
    }

    fn emit(&self, event: LinkEvent) -> Result<(), CommissionError> {
        self.events
            .send(event)
            .map_err(|e| CommissionError::Link(format!("event channel closed: {}", e)))
    }
}

impl MeshLink for LoopbackLink {
    fn is_secured(&self, _interface_id: InterfaceId) -> bool {
        self.secured
    }

    fn selected_network(&self, _interface_id: InterfaceId) -> Option<NetworkCandidate> {
        self.network.clone()
    }

    fn attach_unsecure(
        &mut self,
        interface_id: InterfaceId,
        network: &NetworkCandidate,
    ) -> Result<(), CommissionError> {
        info!("Loopback: interface {} attached to {}", interface_id, network);
        self.attached = Some(interface_id);
        Ok(())
    }

    fn detach(&mut self, interface_id: InterfaceId) {
        info!("Loopback: interface {} detached", interface_id);
        if self.attached == Some(interface_id) {
            self.attached = None;
        }
    }

    fn send_petition(
        &mut self,
        interface_id: InterfaceId,
        attempt: PetitionAttempt,
        commissioner_id: &str,
    ) -> Result<(), CommissionError> {
        debug!(
            "Loopback: petition {} from '{}' on interface {} -> {}",
            attempt, commissioner_id, interface_id, self.verdict
        );
        let session_id = match self.verdict {
            CommissioningState::Accept | CommissioningState::Pending => {
                let id = self.next_session_id;
                self.next_session_id = self.next_session_id.wrapping_add(1);
                Some(id)
            }
            _ => None,
        };
        self.emit(LinkEvent::PetitionResponse {
            interface_id,
            attempt,
            state: self.verdict,
            session_id,
        })
    }

    fn send_keep_alive(
        &mut self,
        interface_id: InterfaceId,
        state: CommissioningState,
        session_id: Option<u16>,
    ) -> Result<(), CommissionError> {
        debug!(
            "Loopback: keep-alive {} for session {:?} on interface {}",
            state, session_id, interface_id
        );
        // A resignation gets no answer
        if state == CommissioningState::Reject {
            return Ok(());
        }
        self.emit(LinkEvent::KeepAliveResponse {
            interface_id,
            state: self.verdict,
        })
    }
}
