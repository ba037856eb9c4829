//! Ed25519 request signatures.
//!
//! Clients sign the exact request body with their key pair and send the
//! base58 public key and signature as headers.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Verifies a detached signature over a payload.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str, public_key: &str) -> bool;
}

/// Base58-encoded Ed25519 verifier used by the gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, payload: &[u8], signature: &str, public_key: &str) -> bool {
        let Some(key) = decode_public_key(public_key) else {
            return false;
        };
        let Some(sig) = decode_signature(signature) else {
            return false;
        };
        key.verify(payload, &sig).is_ok()
    }
}

fn decode_public_key(encoded: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = bs58::decode(encoded).into_vec().ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn decode_signature(encoded: &str) -> Option<Signature> {
    let bytes: [u8; 64] = bs58::decode(encoded).into_vec().ok()?.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}
