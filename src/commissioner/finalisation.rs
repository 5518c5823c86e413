//! Joiner finalisation decision
//!
//! The finalisation payload is a MeshCoP TLV set (state, vendor name, model,
//! software version, vendor data, stack version, provisioning URL). It is
//! never parsed here: it goes verbatim to the callback registered with the
//! joiner, which may decode it with a TLV library.

use std::fmt;

use tracing::{debug, info, warn};

use super::registry::JoinerRegistry;
use crate::meshcop::Eui64;
use crate::InterfaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalisationDecision {
    Accept,
    Reject,
}

impl FinalisationDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl fmt::Display for FinalisationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalisationDecision::Accept => write!(f, "Accept"),
            FinalisationDecision::Reject => write!(f, "Reject"),
        }
    }
}

/// Decide whether `eui64` may finish joining.
///
/// Unknown joiners are rejected without calling anything. A known joiner
/// without a callback is accepted.
pub fn validate(
    registry: &JoinerRegistry,
    interface_id: InterfaceId,
    eui64: &Eui64,
    message: &[u8],
) -> FinalisationDecision {
    let Some(entry) = registry.get(eui64) else {
        warn!(
            "Interface {}: finalisation from unknown joiner {}",
            interface_id, eui64
        );
        return FinalisationDecision::Reject;
    };

    let decision = match &entry.finalisation_cb {
        Some(cb) => {
            debug!(
                "Interface {}: handing {} byte finalisation of {} to application",
                interface_id,
                message.len(),
                eui64
            );
            match cb(interface_id, eui64, message) {
                0 => FinalisationDecision::Accept,
                status => {
                    debug!("Finalisation callback returned {}", status);
                    FinalisationDecision::Reject
                }
            }
        }
        None => FinalisationDecision::Accept,
    };

    info!(
        "Interface {}: joiner {} finalisation {}",
        interface_id, eui64, decision
    );
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commissioner::registry::finalisation_callback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const EUI: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn test_unknown_joiner_rejected_without_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = JoinerRegistry::new();
        registry
            .add(
                false,
                &EUI,
                b"ABCDE",
                Some(finalisation_callback(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    0
                })),
            )
            .unwrap();

        let decision = validate(&registry, 1, &Eui64::new([9; 8]), b"msg");
        assert_eq!(decision, FinalisationDecision::Reject);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_decides() {
        let mut registry = JoinerRegistry::new();
        registry
            .add(false, &EUI, b"ABCDE", Some(finalisation_callback(|_, _, _| 0)))
            .unwrap();
        registry
            .add(false, &[2; 8], b"ABCDE", Some(finalisation_callback(|_, _, _| -1)))
            .unwrap();

        assert!(validate(&registry, 1, &Eui64::new(EUI), b"").is_accept());
        assert!(!validate(&registry, 1, &Eui64::new([2; 8]), b"").is_accept());
    }

    #[test]
    fn test_message_forwarded_verbatim() {
        let seen: Arc<Mutex<Option<(InterfaceId, Eui64, Vec<u8>)>>> = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let mut registry = JoinerRegistry::new();
        registry
            .add(
                false,
                &EUI,
                b"ABCDE",
                Some(finalisation_callback(move |id, eui, msg| {
                    *sink.lock().unwrap() = Some((id, *eui, msg.to_vec()));
                    0
                })),
            )
            .unwrap();

        // Deliberately malformed TLV bytes still reach the application
        let payload = [0xFF, 0x00, 0x10];
        validate(&registry, 4, &Eui64::new(EUI), &payload);

        let seen = seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen, (4, Eui64::new(EUI), payload.to_vec()));
    }

    #[test]
    fn test_no_callback_accepts() {
        let mut registry = JoinerRegistry::new();
        registry.add(true, &EUI, b"ABCDE", None).unwrap();
        assert!(validate(&registry, 1, &Eui64::new(EUI), b"").is_accept());
    }
}
