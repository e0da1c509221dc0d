//! HMAC-SHA256 event signer.
//!
//! Single tamper-evidence primitive over a pre-provisioned key; key
//! management beyond that is out of scope.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies the canonical bytes of a ledger event.
#[derive(Clone)]
pub struct EventSigner {
    key: Vec<u8>,
}

impl EventSigner {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    /// Hex-encoded HMAC-SHA256 tag over `bytes`.
    pub fn sign(&self, bytes: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(bytes);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a hex-encoded tag.
    pub fn verify(&self, bytes: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(bytes);
        mac.verify_slice(&expected).is_ok()
    }
}

impl core::fmt::Debug for EventSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        f.debug_struct("EventSigner").finish_non_exhaustive()
    }
}
