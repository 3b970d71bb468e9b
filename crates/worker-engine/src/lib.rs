#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

//! The sharded ANN store: a two-level map (collection → shard → index)
//! with per-shard mutual exclusion, an internal-id → doc-id mapping, and
//! on-disk persistence across both the current and legacy layouts.
//!
//! Collections and shards are created lazily on first write and never
//! removed. A shard's lock guards its index, id map, and `next_id` counter
//! together so that a search sees either all of a concurrent insert batch
//! or none of it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use worker_core::error::EngineError;
use worker_core::vector::{l2_norm, l2_normalize};
use worker_index::{AnnIndex, CosineHnsw};
use worker_store::IdMap;

const DEFAULT_SHARD: &str = "default";

fn normalize_shard_id(shard_id: Option<&str>) -> String {
    match shard_id {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => DEFAULT_SHARD.to_string(),
    }
}

struct ShardState {
    index: Arc<dyn AnnIndex>,
    id_map: IdMap,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
}

/// The engine's public contract, per the component design in §4.1.
pub struct VectorEngine {
    data_dir: PathBuf,
    dim: usize,
    max_bytes: u64,
    shards: DashMap<(String, String), Arc<AsyncMutex<ShardState>>>,
    total_vectors: AtomicU64,
}

impl VectorEngine {
    pub fn new(data_dir: PathBuf, dim: usize, max_ram_gb: u64) -> Self {
        Self {
            data_dir,
            dim,
            max_bytes: max_ram_gb * (1 << 30),
            shards: DashMap::new(),
            total_vectors: AtomicU64::new(0),
        }
    }

    fn key(collection_id: &str, shard_id: Option<&str>) -> (String, String) {
        (collection_id.to_string(), normalize_shard_id(shard_id))
    }

    fn get_or_create_shard(&self, collection_id: &str, shard_id: Option<&str>) -> Arc<AsyncMutex<ShardState>> {
        let key = Self::key(collection_id, shard_id);
        Arc::clone(self.shards.entry(key).or_insert_with(|| {
            Arc::new(AsyncMutex::new(ShardState {
                index: Arc::new(CosineHnsw::new(self.dim)),
                id_map: IdMap::default(),
            }))
        }))
    }

    fn get_shard(&self, collection_id: &str, shard_id: Option<&str>) -> Option<Arc<AsyncMutex<ShardState>>> {
        let key = Self::key(collection_id, shard_id);
        self.shards.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// `true` iff `bytes_used + n·D·4 ≤ max_bytes`. Advisory only — the
    /// coordinator is the authoritative quota.
    pub fn can_accept(&self, n: usize) -> bool {
        let additional = (n as u64) * (self.dim as u64) * 4;
        self.get_bytes_used() + additional <= self.max_bytes
    }

    pub fn get_total_vectors(&self) -> u64 {
        self.total_vectors.load(Ordering::Relaxed)
    }

    pub fn get_bytes_used(&self) -> u64 {
        self.get_total_vectors() * (self.dim as u64) * 4
    }

    /// Number of distinct collections that own at least one shard.
    pub fn collection_count(&self) -> usize {
        self.shards
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    /// Inserts `shape.0` vectors of width `shape.1` with the given
    /// `doc_ids`. Internal ids `[next_id, next_id + n)` are reserved and the
    /// counter advanced under the same shard lock that guards the insert,
    /// so a concurrent search never observes a partial batch.
    pub async fn add_vectors(
        &self,
        collection_id: &str,
        shard_id: Option<&str>,
        vectors: &[f32],
        shape: (usize, usize),
        doc_ids: Vec<String>,
    ) -> Result<usize, EngineError> {
        let (n, d) = shape;
        if d != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: d,
            });
        }
        if doc_ids.len() != n {
            return Err(EngineError::CountMismatch {
                doc_ids: doc_ids.len(),
                vectors: n,
            });
        }
        if vectors.len() != n * d {
            return Err(EngineError::Decode(format!(
                "vector buffer has {} floats, expected {} for shape {:?}",
                vectors.len(),
                n * d,
                shape
            )));
        }
        if n == 0 {
            return Ok(0);
        }

        let mut normalized: Vec<Vec<f32>> = Vec::with_capacity(n);
        for chunk in vectors.chunks_exact(d) {
            let mut v = chunk.to_vec();
            l2_normalize(&mut v);
            normalized.push(v);
        }

        let shard = self.get_or_create_shard(collection_id, shard_id);
        let mut guard = shard.lock().await;
        let start_id = guard.id_map.next_id;
        let ids: Vec<u32> = (start_id..start_id + n as u32).collect();
        let index = Arc::clone(&guard.index);
        let batch: Vec<(u32, Vec<f32>)> = ids.iter().copied().zip(normalized).collect();

        tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
            for (id, vector) in &batch {
                index
                    .add(*id, vector)
                    .map_err(|e| EngineError::Decode(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .expect("index insertion task panicked")?;

        for (id, doc_id) in ids.into_iter().zip(doc_ids) {
            guard.id_map.insert(id, doc_id);
        }
        guard.id_map.next_id = start_id + n as u32;
        drop(guard);

        self.total_vectors.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Returns up to `min(k, current_count)` `(doc_id, score)` pairs ordered
    /// by score descending. Empty on an absent shard, `k == 0`, or a
    /// zero-norm query.
    pub async fn search(
        &self,
        collection_id: &str,
        shard_id: Option<&str>,
        query: &[f32],
        k: usize,
    ) -> Vec<SearchHit> {
        if k == 0 || l2_norm(query) <= f32::EPSILON {
            return Vec::new();
        }
        let Some(shard) = self.get_shard(collection_id, shard_id) else {
            return Vec::new();
        };
        let guard = shard.lock().await;
        if guard.id_map.is_empty() {
            return Vec::new();
        }
        let mut q = query.to_vec();
        l2_normalize(&mut q);
        let index = Arc::clone(&guard.index);
        let raw_results = tokio::task::spawn_blocking(move || index.search(&q, k))
            .await
            .expect("index search task panicked");
        raw_results
            .into_iter()
            .filter_map(|(id, score)| {
                guard.id_map.get(id).map(|doc_id| SearchHit {
                    doc_id: doc_id.to_string(),
                    score,
                })
            })
            .collect()
    }

    /// Durably writes every shard. A failure on one shard is logged and
    /// does not abort the rest.
    pub async fn save_all(&self) {
        let keys: Vec<(String, String)> = self.shards.iter().map(|e| e.key().clone()).collect();
        for (collection_id, shard_id) in keys {
            self.save_one(&collection_id, &shard_id).await;
        }
    }

    /// Durably writes every shard belonging to `collection_id`.
    pub async fn save_collection(&self, collection_id: &str) {
        let keys: Vec<(String, String)> = self
            .shards
            .iter()
            .filter(|e| e.key().0 == collection_id)
            .map(|e| e.key().clone())
            .collect();
        for (collection_id, shard_id) in keys {
            self.save_one(&collection_id, &shard_id).await;
        }
    }

    async fn save_one(&self, collection_id: &str, shard_id: &str) {
        let Some(shard) = self.get_shard(collection_id, Some(shard_id)) else {
            return;
        };
        let guard = shard.lock().await;
        let index_bytes = guard.index.serialize();
        let id_map = guard.id_map.clone();
        drop(guard);

        let data_dir = self.data_dir.clone();
        let collection = collection_id.to_string();
        let shard_name = shard_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            worker_store::save_shard(&data_dir, &collection, &shard_name, &index_bytes, &id_map)
        })
        .await
        .expect("shard save task panicked");

        match result {
            Ok(()) => info!(collection_id, shard_id, "checkpointed shard"),
            Err(err) => warn!(collection_id, shard_id, error = %err, "failed to checkpoint shard"),
        }
    }

    /// Rebuilds engine state from disk, ingesting both the current and
    /// legacy layouts. Errors on individual shards are logged and loading
    /// continues.
    pub fn load_all(&self) {
        let locations = match worker_store::discover_shards(&self.data_dir) {
            Ok(locations) => locations,
            Err(err) => {
                warn!(data_dir = %self.data_dir.display(), error = %err, "failed to scan data_dir");
                return;
            }
        };

        for location in locations {
            match worker_store::load_shard(&location) {
                Ok((index_bytes, id_map)) => {
                    let index = match CosineHnsw::from_bytes(&index_bytes, self.dim) {
                        Ok(index) => index,
                        Err(err) => {
                            warn!(
                                collection_id = %location.collection_id,
                                shard_id = %location.shard_id,
                                error = %err,
                                "failed to decode shard index, skipping"
                            );
                            continue;
                        }
                    };
                    let count = id_map.len() as u64;
                    let key = (location.collection_id.clone(), location.shard_id.clone());
                    self.shards.insert(
                        key,
                        Arc::new(AsyncMutex::new(ShardState {
                            index: Arc::new(index),
                            id_map,
                        })),
                    );
                    self.total_vectors.fetch_add(count, Ordering::Relaxed);
                    info!(
                        collection_id = %location.collection_id,
                        shard_id = %location.shard_id,
                        vectors = count,
                        "loaded shard"
                    );
                }
                Err(err) => {
                    warn!(
                        collection_id = %location.collection_id,
                        shard_id = %location.shard_id,
                        error = %err,
                        "failed to load shard, skipping"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dim: usize) -> VectorEngine {
        VectorEngine::new(PathBuf::from("/nonexistent"), dim, 4)
    }

    #[tokio::test]
    async fn round_trip_scenario() {
        let engine = engine(4);
        let vectors = vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let doc_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let stored = engine
            .add_vectors("c1", None, &vectors, (3, 4), doc_ids)
            .await
            .unwrap();
        assert_eq!(stored, 3);

        let results = engine.search("c1", None, &[1.0, 0.0, 0.0, 0.0], 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, "a");
        assert!(results[0].score >= 0.9999);
    }

    #[tokio::test]
    async fn sharding_isolates_results() {
        let engine = engine(4);
        engine
            .add_vectors("c1", Some("x"), &[1.0, 0.0, 0.0, 0.0], (1, 4), vec!["a".to_string()])
            .await
            .unwrap();
        engine
            .add_vectors("c1", Some("y"), &[0.0, 1.0, 0.0, 0.0], (1, 4), vec!["b".to_string()])
            .await
            .unwrap();

        let x_results = engine.search("c1", Some("x"), &[1.0, 0.0, 0.0, 0.0], 10).await;
        assert_eq!(x_results.len(), 1);
        assert_eq!(x_results[0].doc_id, "a");

        let y_results = engine.search("c1", Some("y"), &[0.0, 1.0, 0.0, 0.0], 10).await;
        assert_eq!(y_results.len(), 1);
        assert_eq!(y_results[0].doc_id, "b");
    }

    #[tokio::test]
    async fn empty_shard_query_absent_or_zero_norm_returns_empty() {
        let engine = engine(4);
        assert!(engine.search("missing", None, &[1.0, 0.0, 0.0, 0.0], 5).await.is_empty());
        assert!(engine.search("missing", None, &[0.0, 0.0, 0.0, 0.0], 5).await.is_empty());
        assert!(engine.search("missing", None, &[1.0, 0.0, 0.0, 0.0], 0).await.is_empty());
    }

    #[tokio::test]
    async fn dimension_and_count_mismatch_are_rejected() {
        let engine = engine(4);
        let err = engine
            .add_vectors("c1", None, &[1.0, 0.0, 0.0], (1, 3), vec!["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));

        let err = engine
            .add_vectors("c1", None, &[1.0, 0.0, 0.0, 0.0], (1, 4), vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CountMismatch { .. }));
    }

    #[tokio::test]
    async fn can_accept_flips_at_the_byte_boundary() {
        let engine = VectorEngine::new(PathBuf::from("/nonexistent"), 384, 1);
        let limit = (1u64 << 30) / (384 * 4);
        assert!(engine.can_accept(limit as usize));
        assert!(!engine.can_accept(limit as usize + 1));
    }

    #[tokio::test]
    async fn save_then_load_round_trip_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = VectorEngine::new(dir.path().to_path_buf(), 4, 4);
        let vectors = vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let doc_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        engine
            .add_vectors("c1", None, &vectors, (3, 4), doc_ids)
            .await
            .unwrap();
        engine.save_all().await;

        let reloaded = VectorEngine::new(dir.path().to_path_buf(), 4, 4);
        reloaded.load_all();
        assert_eq!(reloaded.get_total_vectors(), 3);

        let results = reloaded.search("c1", None, &[1.0, 0.0, 0.0, 0.0], 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "a");
    }

    #[tokio::test]
    async fn legacy_layout_loads_under_default_shard() {
        let dir = tempfile::tempdir().unwrap();
        let engine = VectorEngine::new(dir.path().to_path_buf(), 4, 4);
        let index = CosineHnsw::new(4);
        index.add(0, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        let mut id_map = worker_store::IdMap::default();
        id_map.insert(0, "legacy-doc".to_string());
        id_map.next_id = 1;
        std::fs::write(dir.path().join("c1.bin"), index.serialize()).unwrap();
        std::fs::write(
            dir.path().join("c1_map.json"),
            serde_json::to_vec(&id_map).unwrap(),
        )
        .unwrap();

        engine.load_all();
        assert_eq!(engine.get_total_vectors(), 1);
        let results = engine.search("c1", None, &[1.0, 0.0, 0.0, 0.0], 1).await;
        assert_eq!(results[0].doc_id, "legacy-doc");
    }
}
