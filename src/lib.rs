//! Thread native commissioner
//!
//! Petitions the leader for the commissioner role, keeps the joiner
//! allow-list and decides joiner finalisation. Radio, discovery and TLV
//! parsing stay behind [`link::MeshLink`] and the application callbacks.

pub mod commissioner;
pub mod config;
pub mod error;
pub mod link;
pub mod meshcop;
pub mod sleep;

/// Network interface handle of the host stack
pub type InterfaceId = i8;

pub use commissioner::{Commissioner, CommissionerSettings, CommissioningMode};
pub use error::CommissionError;
