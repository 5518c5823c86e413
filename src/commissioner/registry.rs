//! Joiner registry: the allow-list of devices admitted on one interface
//!
//! Entries are keyed by EUI-64. Adding an EUI-64 that is already present
//! replaces the old entry. Traversal uses a key-resume cursor, so a cursor
//! never points at freed memory and entries that stay in the registry for
//! the whole traversal are visited exactly once, whatever else is added or
//! removed in between.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::CommissionError;
use crate::meshcop::steering::SteeringData;
use crate::meshcop::{Eui64, Pskd};
use crate::InterfaceId;

/// Application hook deciding a joiner's finalisation.
///
/// Receives the raw MeshCoP TLV payload; returns `0` to accept, anything
/// else to reject.
pub type FinalisationCallback = Arc<dyn Fn(InterfaceId, &Eui64, &[u8]) -> i32 + Send + Sync>;

/// Wrap a closure as a [`FinalisationCallback`]
pub fn finalisation_callback<F>(f: F) -> FinalisationCallback
where
    F: Fn(InterfaceId, &Eui64, &[u8]) -> i32 + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One admitted joiner
#[derive(Clone)]
pub struct JoinerEntry {
    pub eui64: Eui64,
    /// Use the short EUI-64 form when generating steering data
    pub short_eui64: bool,
    pub pskd: Pskd,
    pub finalisation_cb: Option<FinalisationCallback>,
}

impl fmt::Debug for JoinerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinerEntry")
            .field("eui64", &self.eui64)
            .field("short_eui64", &self.short_eui64)
            .field("pskd", &self.pskd)
            .field("finalisation_cb", &self.finalisation_cb.is_some())
            .finish()
    }
}

/// Entry details handed out by traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinerInfo {
    pub eui64: Eui64,
    pub short_eui64: bool,
    pub pskd: Pskd,
}

impl From<&JoinerEntry> for JoinerInfo {
    fn from(entry: &JoinerEntry) -> Self {
        Self {
            eui64: entry.eui64,
            short_eui64: entry.short_eui64,
            pskd: entry.pskd.clone(),
        }
    }
}

/// Opaque traversal position. `RegistryCursor::default()` starts over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCursor(Position);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Position {
    #[default]
    Start,
    After(Eui64),
}

impl RegistryCursor {
    pub fn start() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct JoinerRegistry {
    joiners: BTreeMap<Eui64, JoinerEntry>,
}

impl JoinerRegistry {
    pub fn new() -> Self {
        Self {
            joiners: BTreeMap::new(),
        }
    }

    /// Validate and insert a joiner. Returns true when an existing entry
    /// with the same EUI-64 was replaced.
    ///
    /// On error the registry is left untouched.
    pub fn add(
        &mut self,
        short_eui64: bool,
        eui64: &[u8],
        pskd: &[u8],
        finalisation_cb: Option<FinalisationCallback>,
    ) -> Result<bool, CommissionError> {
        let eui64 = Eui64::try_from(eui64)?;
        let pskd = Pskd::new(pskd)?;
        Ok(self
            .insert(JoinerEntry {
                eui64,
                short_eui64,
                pskd,
                finalisation_cb,
            })
            .is_some())
    }

    pub fn insert(&mut self, entry: JoinerEntry) -> Option<JoinerEntry> {
        self.joiners.insert(entry.eui64, entry)
    }

    pub fn remove(&mut self, eui64: &Eui64) -> Result<JoinerEntry, CommissionError> {
        self.joiners
            .remove(eui64)
            .ok_or_else(|| CommissionError::NotFound(eui64.to_string()))
    }

    pub fn get(&self, eui64: &Eui64) -> Option<&JoinerEntry> {
        self.joiners.get(eui64)
    }

    /// Entry following `cursor`, with the cursor to continue from.
    /// `None` marks the end of the traversal.
    pub fn get_next(&self, cursor: &RegistryCursor) -> Option<(JoinerInfo, RegistryCursor)> {
        let lower = match cursor.0 {
            Position::Start => Bound::Unbounded,
            Position::After(last) => Bound::Excluded(last),
        };
        self.joiners
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(eui64, entry)| (entry.into(), RegistryCursor(Position::After(*eui64))))
    }

    pub fn iter(&self) -> impl Iterator<Item = &JoinerEntry> {
        self.joiners.values()
    }

    pub fn len(&self) -> usize {
        self.joiners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joiners.is_empty()
    }

    pub fn clear(&mut self) {
        self.joiners.clear();
    }

    /// Steering data inviting every registered joiner
    pub fn steering_data(&self, len: usize) -> Result<SteeringData, CommissionError> {
        let mut steering = SteeringData::new(len)?;
        for entry in self.iter() {
            steering.add(&entry.eui64.joiner_id(entry.short_eui64));
        }
        Ok(steering)
    }
}
