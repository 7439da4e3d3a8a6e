//! LED sequences

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{DuelError, Result};

/// Shortest sequence a challenge may carry
pub const MIN_SEQUENCE_LENGTH: usize = 5;
/// Longest sequence a challenge may carry
pub const MAX_SEQUENCE_LENGTH: usize = 15;

/// One of the three LEDs on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Red,
    Green,
    Yellow,
}

impl Symbol {
    /// Wire character used by the device
    pub fn as_char(&self) -> char {
        match self {
            Symbol::Red => '1',
            Symbol::Green => '2',
            Symbol::Yellow => '3',
        }
    }

    pub fn from_char(c: char) -> Result<Self> {
        match c {
            '1' => Ok(Symbol::Red),
            '2' => Ok(Symbol::Green),
            '3' => Ok(Symbol::Yellow),
            other => Err(DuelError::InvalidSymbol(other)),
        }
    }
}

/// Ordered LEDs a player must reproduce.
///
/// Parsing only checks the alphabet; the length bounds are enforced when a
/// challenge is created so that stored records of any length still decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sequence(Vec<Symbol>);

impl Sequence {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Self(symbols)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.0
    }

    /// Check the length against the playable range
    pub fn validate_length(&self) -> Result<()> {
        let length = self.len();
        if !(MIN_SEQUENCE_LENGTH..=MAX_SEQUENCE_LENGTH).contains(&length) {
            return Err(DuelError::InvalidSequenceLength {
                length,
                min: MIN_SEQUENCE_LENGTH,
                max: MAX_SEQUENCE_LENGTH,
            });
        }
        Ok(())
    }
}

impl FromStr for Sequence {
    type Err = DuelError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .chars()
            .map(Symbol::from_char)
            .collect::<Result<Vec<_>>>()
            .map(Sequence)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.0 {
            write!(f, "{}", symbol.as_char())?;
        }
        Ok(())
    }
}

impl Serialize for Sequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let seq: Sequence = "12312".parse().unwrap();
        assert_eq!(seq.len(), 5);
        assert_eq!(seq.symbols()[2], Symbol::Yellow);
        assert_eq!(seq.to_string(), "12312");
    }

    #[test]
    fn test_rejects_unknown_symbol() {
        let err = "12342".parse::<Sequence>().unwrap_err();
        assert!(matches!(err, DuelError::InvalidSymbol('4')));
    }

    #[test]
    fn test_length_bounds() {
        assert!("1231".parse::<Sequence>().unwrap().validate_length().is_err());
        assert!("11111".parse::<Sequence>().unwrap().validate_length().is_ok());
        assert!("1".repeat(15).parse::<Sequence>().unwrap().validate_length().is_ok());
        let too_long: Sequence = "2".repeat(16).parse().unwrap();
        assert!(matches!(
            too_long.validate_length(),
            Err(DuelError::InvalidSequenceLength { length: 16, .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let seq: Sequence = "321".parse().unwrap();
        let json = serde_json::to_value(&seq).unwrap();
        assert_eq!(json, serde_json::json!("321"));
        let back: Sequence = serde_json::from_value(json).unwrap();
        assert_eq!(back, seq);
    }
}
