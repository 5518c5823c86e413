//! MeshCoP steering data (joiner bloom filter)
//!
//! Border agents advertise steering data in discovery responses so that a
//! joiner can tell whether it is currently invited. Each admitted joiner
//! contributes two bits, picked by CRC16-CCITT and CRC16-ANSI of its
//! Joiner ID:
//!
//!   bit index = crc % (length * 8)
//!   byte      = length - 1 - index / 8
//!   mask      = 1 << (index % 8)
//!
//! An all-zero filter invites nobody.

use super::JoinerId;
use crate::error::CommissionError;

/// Largest steering data TLV payload
pub const STEERING_DATA_MAX_LEN: usize = 16;

const CRC16_CCITT_POLY: u16 = 0x1021;
const CRC16_ANSI_POLY: u16 = 0x8005;

/// Bloom filter over Joiner IDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteeringData {
    bits: Vec<u8>,
}

impl SteeringData {
    /// Create an empty filter of `len` bytes (1-16)
    pub fn new(len: usize) -> Result<Self, CommissionError> {
        if len == 0 || len > STEERING_DATA_MAX_LEN {
            return Err(CommissionError::invalid(format!(
                "steering data length must be 1-{}, got {}",
                STEERING_DATA_MAX_LEN, len
            )));
        }
        Ok(Self { bits: vec![0; len] })
    }

    pub fn add(&mut self, joiner_id: &JoinerId) {
        let (ccitt, ansi) = self.bit_indices(joiner_id);
        self.set_bit(ccitt);
        self.set_bit(ansi);
    }

    /// Bloom membership: false means definitely not invited
    pub fn contains(&self, joiner_id: &JoinerId) -> bool {
        let (ccitt, ansi) = self.bit_indices(joiner_id);
        self.bit(ccitt) && self.bit(ansi)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    /// TLV payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn bit_indices(&self, joiner_id: &JoinerId) -> (usize, usize) {
        let width = self.bits.len() * 8;
        (
            crc16(CRC16_CCITT_POLY, &joiner_id.0) as usize % width,
            crc16(CRC16_ANSI_POLY, &joiner_id.0) as usize % width,
        )
    }

    fn set_bit(&mut self, index: usize) {
        let len = self.bits.len();
        self.bits[len - 1 - index / 8] |= 1 << (index % 8);
    }

    fn bit(&self, index: usize) -> bool {
        let len = self.bits.len();
        self.bits[len - 1 - index / 8] & (1 << (index % 8)) != 0
    }
}

/// MSB-first CRC16 with zero initial value
fn crc16(poly: u16, data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshcop::Eui64;

    #[test]
    fn test_crc16_check_values() {
        // Standard "123456789" check values (XMODEM and BUYPASS variants)
        assert_eq!(crc16(CRC16_CCITT_POLY, b"123456789"), 0x31C3);
        assert_eq!(crc16(CRC16_ANSI_POLY, b"123456789"), 0xFEE8);
    }

    #[test]
    fn test_length_bounds() {
        assert!(SteeringData::new(0).is_err());
        assert!(SteeringData::new(17).is_err());
        assert_eq!(SteeringData::new(16).unwrap().as_bytes().len(), 16);
        assert_eq!(SteeringData::new(1).unwrap().as_bytes(), &[0]);
    }

    #[test]
    fn test_added_joiner_is_contained() {
        let mut steering = SteeringData::new(16).unwrap();
        assert!(steering.is_empty());

        let id = Eui64::new([1, 2, 3, 4, 5, 6, 7, 8]).joiner_id(false);
        steering.add(&id);

        assert!(!steering.is_empty());
        assert!(steering.contains(&id));
        let set_bits: u32 = steering.as_bytes().iter().map(|b| b.count_ones()).sum();
        assert!((1..=2).contains(&set_bits));
    }

    #[test]
    fn test_single_byte_filter() {
        let mut steering = SteeringData::new(1).unwrap();
        let id = Eui64::new([0xAA; 8]).joiner_id(true);
        steering.add(&id);
        assert!(steering.contains(&id));
    }
}
