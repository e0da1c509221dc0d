//! Batch integrity checksum.
//!
//! SHA-256 over the canonical serialization of the batch: one canonical line
//! per event, in batch order, newline-separated. Field-order independent of
//! any JSON encoder, so device and authority always agree on the bytes.

use sha2::{Digest, Sha256};

use crate::wire::WireEvent;

/// Hex-encoded SHA-256 over the canonical serialization of `events`.
pub fn batch_checksum(events: &[WireEvent]) -> String {
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(event.canonical_line().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
