//! Wire encoding for embedding vectors: `base64(zstd(raw_float32_le))`.
//!
//! Vectors travel inside JSON frames, so the binary payload is framed as
//! base64 text; it is zstd-compressed first so that long batches of
//! near-duplicate vectors don't bloat the frame. The only contract between
//! encoder and decoder is that both sides agree on the compressor — nothing
//! about the shape is encoded in the blob itself, the shape travels as a
//! parallel JSON field (see `worker-protocol`).

use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("zstd decompression failed: {0}")]
    Zstd(std::io::Error),
    #[error("decoded byte length {0} is not a multiple of 4")]
    UnalignedLength(usize),
}

/// Encodes a flat row-major `f32` buffer as `base64(zstd(raw_le_bytes))`.
pub fn encode_vectors(values: &[f32]) -> String {
    let mut raw = Vec::with_capacity(values.len() * 4);
    for &v in values {
        raw.write_f32::<LittleEndian>(v)
            .expect("writing to a Vec never fails");
    }
    let compressed =
        zstd::encode_all(raw.as_slice(), 0).expect("zstd encoding of an in-memory buffer never fails");
    base64::engine::general_purpose::STANDARD.encode(compressed)
}

/// Inverse of [`encode_vectors`]. Errors on malformed base64, malformed zstd
/// framing, or a decompressed length that isn't a whole number of `f32`s.
pub fn decode_vectors(encoded: &str) -> Result<Vec<f32>, CodecError> {
    let compressed = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let raw = zstd::decode_all(compressed.as_slice()).map_err(CodecError::Zstd)?;
    if raw.len() % 4 != 0 {
        return Err(CodecError::UnalignedLength(raw.len()));
    }
    let mut cursor = std::io::Cursor::new(raw);
    let len = cursor.get_ref().len();
    let mut out = Vec::with_capacity(len / 4);
    while (cursor.position() as usize) < len {
        out.push(
            cursor
                .read_f32::<LittleEndian>()
                .expect("length checked to be a multiple of 4"),
        );
    }
    Ok(out)
}

/// L2-normalizes `v` in place. A zero vector is left unchanged — it still
/// indexes, but a zero-norm query is rejected by the search path so a zero
/// vector is never returned as a match.
pub fn l2_normalize(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq <= f32::EPSILON {
        return;
    }
    let inv_norm = norm_sq.sqrt().recip();
    for x in v.iter_mut() {
        *x *= inv_norm;
    }
}

/// L2 norm of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_small() {
        let values = vec![1.0_f32, -2.5, 0.0, f32::MIN, f32::MAX, 3.14159];
        let encoded = encode_vectors(&values);
        let decoded = decode_vectors(&encoded).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn round_trip_empty() {
        let values: Vec<f32> = vec![];
        let encoded = encode_vectors(&values);
        let decoded = decode_vectors(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode_vectors("not valid base64!!!").is_err());
    }

    #[test]
    fn normalize_preserves_zero_vector() {
        let mut v = vec![0.0_f32; 8];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn normalize_yields_unit_norm() {
        let mut v = vec![3.0_f32, 4.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn round_trip_is_bit_identical(values in proptest::collection::vec(proptest::num::f32::ANY, 0..256)) {
            let encoded = encode_vectors(&values);
            let decoded = decode_vectors(&encoded).unwrap();
            prop_assert_eq!(decoded.len(), values.len());
            for (a, b) in values.iter().zip(decoded.iter()) {
                prop_assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
            }
        }

        #[test]
        fn normalize_is_idempotent_on_unit_vectors(raw in proptest::collection::vec(-100.0f32..100.0, 1..32)) {
            let mut v = raw.clone();
            l2_normalize(&mut v);
            if l2_norm(&raw) > f32::EPSILON {
                prop_assert!((l2_norm(&v) - 1.0).abs() < 1e-4);
            }
        }
    }
}
