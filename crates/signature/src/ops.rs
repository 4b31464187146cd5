//! crates/signature/src/ops.rs
//!
//! Thin wrappers over the external `fast_rsync` crate, which supplies the
//! three pure operations this module treats as an external collaborator:
//! `signature(file) -> Sig`, `delta(Sig, file) -> Delta`, and
//! `patch(file, Delta) -> file'`. This module does not re-derive the rsync
//! algorithm; it only adapts `fast_rsync`'s types to the byte-blob shape the
//! rest of the system persists and ships over the wire (`Signature` and
//! `Delta` are opaque blobs as far as every other component is concerned).

use fast_rsync::{Signature, SignatureOptions};

use crate::error::{SignatureError, SignatureResult};

/// Block size used for signature generation. 2 KiB keeps delta overhead low
/// for the small-to-medium text/config files a LAN directory sync is
/// expected to carry, at the cost of more signature blocks for very large
/// files.
const BLOCK_SIZE: u32 = 2048;

/// Bytes of the strong hash retained per block. 8 bytes is `fast_rsync`'s
/// own suggested default; collisions at this truncation are astronomically
/// unlikely for directory-sync-sized trees.
const CRYPTO_HASH_SIZE: u32 = 8;

fn options() -> SignatureOptions {
    SignatureOptions {
        block_size: BLOCK_SIZE,
        crypto_hash_size: CRYPTO_HASH_SIZE,
    }
}

/// Compute the serialized signature blob for `data`.
///
/// This is the `signature(file) -> Sig` operation: the result is opaque
/// outside this module and is what gets persisted by
/// [`crate::store::SignatureStore`] and carried in `DIR_STATE` messages.
#[must_use]
pub fn signature(data: &[u8]) -> Vec<u8> {
    Signature::calculate(data, options()).serialized().to_vec()
}

/// Compute a delta of `new_data` against a previously-serialized signature
/// of the receiver's prior content.
///
/// This is the `delta(Sig, file) -> Delta` operation.
///
/// # Errors
///
/// Returns [`SignatureError::Corrupt`] if `base_sig` is not a well-formed
/// serialized signature, and [`SignatureError::Diff`] if delta computation
/// itself fails.
pub fn delta(path: &str, base_sig: &[u8], new_data: &[u8]) -> SignatureResult<Vec<u8>> {
    let sig = Signature::deserialize(base_sig.to_vec()).map_err(|source| SignatureError::Corrupt {
        path: path.to_string(),
        source,
    })?;
    let indexed = sig.index();
    let mut out = Vec::new();
    fast_rsync::diff(&indexed, new_data, &mut out).map_err(SignatureError::Diff)?;
    Ok(out)
}

/// Apply `delta` to `base_data`, reconstructing the sender's new content.
///
/// This is the `patch(file, Delta) -> file'` operation.
///
/// # Errors
///
/// Returns [`SignatureError::Apply`] if the delta is corrupt or does not
/// match `base_data`.
pub fn patch(base_data: &[u8], delta_bytes: &[u8]) -> SignatureResult<Vec<u8>> {
    let mut out = Vec::new();
    fast_rsync::apply(base_data, delta_bytes, &mut out).map_err(SignatureError::Apply)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_then_patch_reconstructs_modified_content() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let mut modified = original.clone();
        modified[100] = b'!';

        let sig = signature(&original);
        let d = delta("f.txt", &sig, &modified).unwrap();
        let patched = patch(&original, &d).unwrap();

        assert_eq!(patched, modified);
    }

    #[test]
    fn delta_against_identical_content_applies_to_a_no_op() {
        let data = b"unchanged content, repeated".repeat(20);
        let sig = signature(&data);
        let d = delta("f.txt", &sig, &data).unwrap();
        let patched = patch(&data, &d).unwrap();
        assert_eq!(patched, data);
    }

    #[test]
    fn corrupt_signature_is_reported_with_the_path() {
        let err = delta("weird.bin", b"not a signature", b"data").unwrap_err();
        match err {
            SignatureError::Corrupt { path, .. } => assert_eq!(path, "weird.bin"),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn small_change_produces_a_small_delta() {
        let original = vec![b'a'; 10 * 1024 * 1024];
        let mut modified = original.clone();
        modified[5_000_000] = b'b';

        let sig = signature(&original);
        let d = delta("big.bin", &sig, &modified).unwrap();

        assert!(d.len() < 1024 * 1024, "delta was {} bytes", d.len());
    }
}
