//! Intent tokens for the two-phase redemption flow.
//!
//! A token is the only piece of state a participant's device ever holds: the
//! QR code they present is a deep link embedding the token and nothing else.
//! Quantity and participant identity are resolved server-side at scan time,
//! so a tampered QR code cannot inflate a redemption.
//!
//! # Security
//!
//! - Tokens are 256-bit random values (base64url encoded)
//! - Tokens are single-use: exactly one confirm succeeds per token
//! - Unknown and already-processed tokens are indistinguishable to callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque single-use token identifying a pending redemption intent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentToken(String);

impl IntentToken {
    /// Generate a cryptographically secure random token.
    ///
    /// Returns a 256-bit random token encoded as base64url (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use base64::Engine;
        use rand::RngCore;

        let mut rng = rand::thread_rng();
        let mut random_bytes = [0u8; 32];
        rng.fill_bytes(&mut random_bytes);
        Self(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes))
    }

    /// Wrap a token received from a client.
    ///
    /// No validation happens here; an unknown token surfaces as not-found
    /// when it is looked up.
    #[must_use]
    pub const fn from_string(token: String) -> Self {
        Self(token)
    }

    /// The token's string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the deep link a QR code encodes for this token.
    ///
    /// The payload carries only the token; scanners resolve quantity and
    /// participant server-side.
    #[must_use]
    pub fn deep_link(&self, base_url: &str) -> String {
        format!("{}/redeem/{}", base_url.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for IntentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
