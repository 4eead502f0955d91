//! Threshold signature verification
//!
//! An alert carries `threshold` compact recoverable signatures over its
//! signing digest. A signature counts iff it recovers to a currently
//! active key that has not already counted on this alert; the alert is
//! accepted once the count of distinct valid keys reaches the threshold.
//! Slots that fail to recover are skipped, not fatal.

use beacon_model::{Alert, Hash, PubKey, COMPACT_SIG_LEN};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use std::collections::HashSet;
use thiserror::Error;

/// Compact signature header range: 27 + recovery id, +4 for a compressed
/// public key.
const HEADER_BASE: u8 = 27;
const HEADER_MAX: u8 = 34;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("signature threshold not met: {valid} distinct valid of {required} required")]
    ThresholdNotMet { valid: usize, required: usize },

    #[error("malformed compact signature")]
    Malformed,
}

/// Check that at least `threshold` distinct active keys signed the alert.
pub fn verify_threshold(
    alert: &Alert,
    active_keys: &[PubKey],
    threshold: usize,
) -> Result<(), VerifyError> {
    let digest = alert.signing_digest();
    let mut counted: HashSet<PubKey> = HashSet::new();

    for sig in &alert.signatures {
        // Unrecoverable or foreign signatures are ignored; only the count
        // of distinct valid keys matters.
        if let Ok(signer) = recover_signer(&digest, sig) {
            if active_keys.contains(&signer) {
                counted.insert(signer);
            }
        }
        if counted.len() >= threshold {
            return Ok(());
        }
    }

    Err(VerifyError::ThresholdNotMet {
        valid: counted.len(),
        required: threshold,
    })
}

/// Recover the signing key from a 65-byte compact signature over `digest`.
pub fn recover_signer(digest: &Hash, sig: &[u8]) -> Result<PubKey, VerifyError> {
    if sig.len() != COMPACT_SIG_LEN {
        return Err(VerifyError::Malformed);
    }
    let header = sig[0];
    if !(HEADER_BASE..=HEADER_MAX).contains(&header) {
        return Err(VerifyError::Malformed);
    }
    let recid =
        RecoveryId::from_byte((header - HEADER_BASE) & 3).ok_or(VerifyError::Malformed)?;
    let signature = Signature::from_slice(&sig[1..]).map_err(|_| VerifyError::Malformed)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_ref(), &signature, recid)
        .map_err(|_| VerifyError::Malformed)?;

    let point = key.to_encoded_point(true);
    PubKey::try_from(point.as_bytes()).map_err(|_| VerifyError::Malformed)
}

/// Produce a 65-byte compact recoverable signature over `digest`.
pub fn sign_digest(digest: &Hash, key: &SigningKey) -> Result<Vec<u8>, VerifyError> {
    let (signature, recid) = key
        .sign_prehash_recoverable(digest.as_ref())
        .map_err(|_| VerifyError::Malformed)?;

    let mut out = Vec::with_capacity(COMPACT_SIG_LEN);
    // Compressed-key compact header.
    out.push(HEADER_BASE + 4 + recid.to_byte());
    out.extend_from_slice(&signature.to_bytes());
    Ok(out)
}

/// The compressed public key for a signing key.
pub fn public_key_of(key: &SigningKey) -> PubKey {
    let point = key.verifying_key().to_encoded_point(true);
    PubKey::try_from(point.as_bytes()).expect("compressed point is 33 bytes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_model::Payload;
    use rand::rngs::OsRng;

    fn keys(n: usize) -> Vec<SigningKey> {
        (0..n).map(|_| SigningKey::random(&mut OsRng)).collect()
    }

    fn signed_alert(signers: &[&SigningKey]) -> Alert {
        let mut alert = Alert::unsigned(
            1,
            1_700_000_000,
            Payload::Informational { message: b"ab".to_vec() },
        );
        let digest = alert.signing_digest();
        alert.signatures = signers
            .iter()
            .map(|k| sign_digest(&digest, k).unwrap())
            .collect();
        alert
    }

    #[test]
    fn test_threshold_met() {
        let signing = keys(5);
        let active: Vec<PubKey> = signing.iter().map(public_key_of).collect();
        let alert = signed_alert(&[&signing[0], &signing[1], &signing[2]]);
        verify_threshold(&alert, &active, 3).unwrap();
    }

    #[test]
    fn test_threshold_not_met() {
        let signing = keys(5);
        let active: Vec<PubKey> = signing.iter().map(public_key_of).collect();

        let mut alert = signed_alert(&[&signing[0], &signing[1], &signing[2]]);
        // Corrupt the third signature so only two verify.
        alert.signatures[2] = vec![0u8; COMPACT_SIG_LEN];

        assert_eq!(
            verify_threshold(&alert, &active, 3),
            Err(VerifyError::ThresholdNotMet { valid: 2, required: 3 })
        );
    }

    #[test]
    fn test_duplicate_signature_counts_once() {
        let signing = keys(5);
        let active: Vec<PubKey> = signing.iter().map(public_key_of).collect();

        let mut alert = signed_alert(&[&signing[0], &signing[1], &signing[2]]);
        alert.signatures[1] = alert.signatures[0].clone();

        assert_eq!(
            verify_threshold(&alert, &active, 3),
            Err(VerifyError::ThresholdNotMet { valid: 2, required: 3 })
        );
    }

    #[test]
    fn test_foreign_key_ignored() {
        let signing = keys(5);
        let outsider = SigningKey::random(&mut OsRng);
        let active: Vec<PubKey> = signing.iter().map(public_key_of).collect();

        let alert = signed_alert(&[&signing[0], &signing[1], &outsider]);
        assert_eq!(
            verify_threshold(&alert, &active, 3),
            Err(VerifyError::ThresholdNotMet { valid: 2, required: 3 })
        );
    }

    #[test]
    fn test_recover_roundtrip() {
        let key = SigningKey::random(&mut OsRng);
        let digest = Hash::from([0x5a; 32]);
        let sig = sign_digest(&digest, &key).unwrap();
        assert_eq!(sig.len(), COMPACT_SIG_LEN);
        assert_eq!(recover_signer(&digest, &sig).unwrap(), public_key_of(&key));
    }

    #[test]
    fn test_recover_rejects_bad_header() {
        let key = SigningKey::random(&mut OsRng);
        let digest = Hash::from([0x5a; 32]);
        let mut sig = sign_digest(&digest, &key).unwrap();
        sig[0] = 0x00;
        assert_eq!(recover_signer(&digest, &sig), Err(VerifyError::Malformed));
    }

    #[test]
    fn test_recover_rejects_wrong_length() {
        let digest = Hash::from([0x5a; 32]);
        assert_eq!(
            recover_signer(&digest, &[0u8; 64]),
            Err(VerifyError::Malformed)
        );
        assert_eq!(
            recover_signer(&digest, &[0u8; 128]),
            Err(VerifyError::Malformed)
        );
    }
}
