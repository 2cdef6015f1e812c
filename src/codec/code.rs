//! Game-code packing
//!
//! Room codes travel as a signed 32-bit integer. Four-character codes
//! pack their ASCII bytes directly (always non-negative); six-character
//! codes use the shuffled base-26 scheme and always come out negative,
//! which is how the two versions are told apart on the wire.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::CodecError;

/// Shuffled alphabet used by the six-character scheme.
const V2_CHARSET: &[u8; 26] = b"QWXRTYLPESDFGHUJKZOCVBINMA";

/// Index of each uppercase letter within [`V2_CHARSET`].
const V2_INDEX: [u8; 26] = [
    25, 21, 19, 10, 8, 11, 12, 13, 22, 15, 16, 6, 24, 23, 18, 7, 0, 3, 9, 4,
    14, 20, 1, 2, 5, 17,
];

/// A room code in wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameCode(pub i32);

impl GameCode {
    /// The public-pool sentinel ("    " in four-character form).
    pub const LOBBY_POOL: Self = Self(0x2020_2020);

    pub fn is_v2(self) -> bool {
        self.0 < 0
    }

    /// Generate a random six-character code.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut chars = [0u8; 6];
        for c in &mut chars {
            *c = V2_CHARSET[rng.gen_range(0..26)];
        }
        // Charset members are uppercase letters, so this cannot fail.
        Self::parse(std::str::from_utf8(&chars).unwrap_or("QQQQQQ"))
            .unwrap_or(Self::LOBBY_POOL)
    }

    /// Parse a displayed code. Accepts four or six characters.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let upper = text.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        match bytes.len() {
            4 => {
                if !bytes.iter().all(|b| b.is_ascii_uppercase() || *b == b' ') {
                    return Err(CodecError::InvalidValue { context: "v1 game code" });
                }
                Ok(Self(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
            }
            6 => {
                let mut idx = [0u32; 6];
                for (slot, b) in idx.iter_mut().zip(bytes) {
                    if !b.is_ascii_uppercase() {
                        return Err(CodecError::InvalidValue { context: "v2 game code" });
                    }
                    *slot = u32::from(V2_INDEX[(b - b'A') as usize]);
                }
                let one = (idx[0] + 26 * idx[1]) & 0x3FF;
                let two = idx[2] + 26 * (idx[3] + 26 * (idx[4] + 26 * idx[5]));
                Ok(Self((one | ((two << 10) & 0x3FFF_FC00) | 0x8000_0000) as i32))
            }
            _ => Err(CodecError::InvalidValue { context: "game code length" }),
        }
    }
}

impl fmt::Display for GameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_v2() {
            let v = self.0 as u32;
            let one = v & 0x3FF;
            let two = (v >> 10) & 0xF_FFFF;
            let chars = [
                V2_CHARSET[(one % 26) as usize],
                V2_CHARSET[(one / 26 % 26) as usize],
                V2_CHARSET[(two % 26) as usize],
                V2_CHARSET[(two / 26 % 26) as usize],
                V2_CHARSET[(two / 676 % 26) as usize],
                V2_CHARSET[(two / 17_576 % 26) as usize],
            ];
            for c in chars {
                write!(f, "{}", c as char)?;
            }
            Ok(())
        } else {
            for byte in self.0.to_le_bytes() {
                write!(f, "{}", byte as char)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn v2_index_inverts_charset() {
        for (i, c) in V2_CHARSET.iter().enumerate() {
            assert_eq!(V2_INDEX[(c - b'A') as usize] as usize, i);
        }
    }

    #[test]
    fn v1_code_packs_ascii() {
        let code = GameCode::parse("CODE").unwrap();
        assert_eq!(code.0, i32::from_le_bytes(*b"CODE"));
        assert_eq!(code.to_string(), "CODE");
        assert!(!code.is_v2());
    }

    #[test]
    fn v2_codes_are_negative() {
        let code = GameCode::parse("QWERTY").unwrap();
        assert!(code.is_v2());
    }

    #[test]
    fn code_int_roundtrip() {
        // R-law: parse(display(x)) == x across randomly generated codes.
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let code = GameCode::random(&mut rng);
            let displayed = code.to_string();
            assert_eq!(GameCode::parse(&displayed).unwrap(), code, "{displayed}");
        }
    }

    #[test]
    fn display_roundtrip_for_v2_strings() {
        for text in ["ABCDEF", "QQQQQQ", "ZZZZZZ", "SKELDQ"] {
            let code = GameCode::parse(text).unwrap();
            assert_eq!(code.to_string(), text);
        }
    }

    #[test]
    fn lobby_pool_sentinel_displays_as_spaces() {
        assert_eq!(GameCode::LOBBY_POOL.to_string(), "    ");
    }

    #[test]
    fn rejects_bad_lengths_and_characters() {
        assert!(GameCode::parse("ABC").is_err());
        assert!(GameCode::parse("ABCDE").is_err());
        assert!(GameCode::parse("AB!DEF").is_err());
    }
}
