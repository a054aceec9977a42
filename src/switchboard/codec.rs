//! Packing of a 12-switch bank into a single integer
//!
//! A bank is published as one unsigned value where switch 11 is the most
//! significant bit and switch 0 the least significant bit. The textual form
//! used in logs is the same 12-character bitstring, most significant bit
//! first.
//!
//! ```text
//! index:  11 10  9  8  7  6  5  4  3  2  1  0
//! bit:   2^11 ...                         2^0
//! ```
//!
//! Listeners already deployed on the broker decode this exact ordering.

use std::fmt;
use thiserror::Error;

/// Number of switches on every board
pub const SWITCH_COUNT: usize = 12;

/// Largest value a packed bank can take (all switches active)
pub const MAX_ENCODED: u16 = (1 << SWITCH_COUNT) - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoded bank value {0} is outside 0..={MAX_ENCODED}")]
    OutOfRange(u64),

    #[error("Switch index {0} is outside 0..{SWITCH_COUNT}")]
    IndexOutOfRange(usize),
}

/// State of a single switch slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SwitchState {
    #[default]
    Inactive = 0,
    Active = 1,
}

impl SwitchState {
    pub fn is_active(self) -> bool {
        self == SwitchState::Active
    }

    pub fn toggled(self) -> Self {
        match self {
            SwitchState::Inactive => SwitchState::Active,
            SwitchState::Active => SwitchState::Inactive,
        }
    }

    fn as_char(self) -> char {
        match self {
            SwitchState::Inactive => '0',
            SwitchState::Active => '1',
        }
    }
}

impl From<bool> for SwitchState {
    fn from(active: bool) -> Self {
        if active {
            SwitchState::Active
        } else {
            SwitchState::Inactive
        }
    }
}

/// Ordered states of the 12 switches of one board
///
/// The length is fixed by the type, so a decoded bank is always complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SwitchBank([SwitchState; SWITCH_COUNT]);

impl SwitchBank {
    pub fn new(states: [SwitchState; SWITCH_COUNT]) -> Self {
        Self(states)
    }

    pub fn get(&self, index: usize) -> Result<SwitchState, CodecError> {
        self.0
            .get(index)
            .copied()
            .ok_or(CodecError::IndexOutOfRange(index))
    }

    pub fn set(&mut self, index: usize, state: SwitchState) -> Result<(), CodecError> {
        let slot = self
            .0
            .get_mut(index)
            .ok_or(CodecError::IndexOutOfRange(index))?;
        *slot = state;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_active()).count()
    }
}

impl fmt::Display for SwitchBank {
    /// Most significant switch (index 11) first, matching the wire bit order
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for state in self.0.iter().rev() {
            write!(f, "{}", state.as_char())?;
        }
        Ok(())
    }
}

/// Packed 12-bit representation of a [`SwitchBank`]
///
/// Can only be constructed inside `0..=MAX_ENCODED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncodedBankValue(u16);

impl EncodedBankValue {
    pub fn new(raw: u64) -> Result<Self, CodecError> {
        if raw > u64::from(MAX_ENCODED) {
            return Err(CodecError::OutOfRange(raw));
        }
        Ok(Self(raw as u16))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for EncodedBankValue {
    type Error = CodecError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(u64::from(raw))
    }
}

impl fmt::Display for EncodedBankValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (0b{:012b})", self.0, self.0)
    }
}

/// Packs a bank, switch 11 ending up in the most significant bit
pub fn encode(bank: &SwitchBank) -> EncodedBankValue {
    let value = bank
        .0
        .iter()
        .rev()
        .fold(0u16, |acc, state| (acc << 1) | *state as u16);
    EncodedBankValue(value)
}

/// Exact inverse of [`encode`]
pub fn decode(value: EncodedBankValue) -> SwitchBank {
    let mut states = [SwitchState::Inactive; SWITCH_COUNT];
    for (index, state) in states.iter_mut().enumerate() {
        *state = SwitchState::from(value.0 & (1 << index) != 0);
    }
    SwitchBank(states)
}

/// Validates an integer taken off the wire and decodes it
pub fn decode_raw(raw: u64) -> Result<SwitchBank, CodecError> {
    EncodedBankValue::new(raw).map(decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_with(active: &[usize]) -> SwitchBank {
        let mut bank = SwitchBank::default();
        for &index in active {
            bank.set(index, SwitchState::Active).unwrap();
        }
        bank
    }

    #[test]
    fn empty_and_full_banks_hit_the_range_limits() {
        assert_eq!(encode(&SwitchBank::default()).get(), 0);
        assert_eq!(
            encode(&SwitchBank::new([SwitchState::Active; SWITCH_COUNT])).get(),
            4095
        );
    }

    #[test]
    fn switch_eleven_is_the_most_significant_bit() {
        assert_eq!(encode(&bank_with(&[11])).get(), 2048);
        assert_eq!(encode(&bank_with(&[0])).get(), 1);
        assert_eq!(encode(&bank_with(&[0, 1, 11])).get(), 2048 + 2 + 1);
    }

    #[test]
    fn decode_inverts_encode_for_every_bank() {
        for raw in 0..=u64::from(MAX_ENCODED) {
            let bank = decode_raw(raw).unwrap();
            assert_eq!(decode(encode(&bank)), bank);
            assert_eq!(u64::from(encode(&bank).get()), raw);
        }
    }

    #[test]
    fn bitstring_reads_most_significant_first() {
        let bank = bank_with(&[11, 0]);
        assert_eq!(bank.to_string(), "100000000001");
        assert_eq!(decode_raw(0b0000_0001_0110).unwrap().to_string(), "000000010110");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_eq!(decode_raw(4096), Err(CodecError::OutOfRange(4096)));
        assert!(EncodedBankValue::try_from(u32::MAX).is_err());
        assert!(EncodedBankValue::try_from(4095u32).is_ok());
    }

    #[test]
    fn bank_index_is_bounds_checked() {
        let mut bank = SwitchBank::default();
        assert_eq!(
            bank.set(12, SwitchState::Active),
            Err(CodecError::IndexOutOfRange(12))
        );
        assert!(bank.get(12).is_err());
    }
}
