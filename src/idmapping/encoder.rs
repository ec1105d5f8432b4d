//! Fixed-width encodings of external ids.

use crate::error::ValidationError;
use crate::input::ExternalId;

/// Marks an unused slot in the mapper's encoding array. No encoder produces it.
pub const EMPTY: u64 = u64::MAX;

/// Turns an [`ExternalId`] into the 64-bit value the mapper sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    /// blake3 of the key bytes, truncated to 64 bits. Collisions are possible,
    /// so equal encodings must be confirmed against the key bytes.
    String,
    /// The non-negative integer itself.
    Long,
    /// The string hash cut down to its low `bits`, so that distinct keys
    /// share encodings.
    #[cfg(test)]
    Truncated { bits: u32 },
}

impl Encoder {
    /// Encode `id`.
    ///
    /// # Errors
    /// For `Long`, a string or negative id.
    pub fn encode(&self, id: &ExternalId) -> Result<u64, ValidationError> {
        match self {
            Self::String => Ok(hash_key(&id.key_bytes())),
            Self::Long => id.as_non_negative(),
            #[cfg(test)]
            Self::Truncated { bits } => Ok(hash_key(&id.key_bytes()) & ((1u64 << bits) - 1)),
        }
    }

    /// Returns true if equal encodings always mean equal ids.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        matches!(self, Self::Long)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Long => "integer",
            #[cfg(test)]
            Self::Truncated { .. } => "truncated",
        }
    }
}

fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key);
    let hash = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    match u64::from_le_bytes(head) {
        EMPTY => EMPTY - 1,
        v => v,
    }
}
