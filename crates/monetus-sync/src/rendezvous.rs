//! Rendezvous identifiers and the acquisition policy.
//!
//! A host first asks for a short code that is easy to read out and type on
//! the other device. If the backend already has that code, the host asks the
//! backend to assign one instead (longer, guaranteed unique). Exactly one
//! fallback attempt is made.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::transport::Transport;

const SHORT_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Identifier for one endpoint for the duration of one session.
///
/// Case-insensitive: always stored upper-cased.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RendezvousId(String);

impl RendezvousId {
    /// Parse a typed or received code.
    ///
    /// Surrounding whitespace is ignored. Only ASCII alphanumerics and `-`
    /// are accepted.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty()
            || !trimmed
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(SyncError::InvalidIdentifier(input.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Generate a short code of `len` characters from `[A-Z0-9]`.
    pub fn generate_short<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let code = (0..len.max(1))
            .map(|_| SHORT_CODE_ALPHABET[rng.gen_range(0..SHORT_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Generate a long, hyphenated 128-bit token for backend-assigned identifiers.
    pub fn generate_token<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let bytes: [u8; 16] = rng.gen();
        let hex = hex::encode_upper(bytes);
        Self(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RendezvousId({})", self.0)
    }
}

impl fmt::Display for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RendezvousId {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<RendezvousId> for String {
    fn from(id: RendezvousId) -> Self {
        id.0
    }
}

/// Register a listening endpoint, preferring `preferred`.
///
/// On [`SyncError::IdentifierUnavailable`] retries exactly once with a
/// backend-assigned identifier. Any other failure, or a failed fallback, is
/// returned as is.
pub async fn acquire<T: Transport + ?Sized>(
    transport: &T,
    preferred: &RendezvousId,
) -> Result<T::Listener> {
    match transport.register(Some(preferred)).await {
        Ok(listener) => Ok(listener),
        Err(SyncError::IdentifierUnavailable(taken)) => {
            tracing::info!("rendezvous code {} is taken, asking backend to assign one", taken);
            transport.register(None).await
        }
        Err(e) => Err(e),
    }
}
