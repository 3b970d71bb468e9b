#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

//! A small incremental HNSW over unit-norm `f32` vectors in cosine space.
//!
//! This is the "opaque index kernel" the worker-engine spec treats as a
//! pluggable collaborator: callers only see [`AnnIndex`]. Construction
//! tuning (`m`, `ef_construction`) and query-time expansion (`ef_search`)
//! are this implementation's own choices — the contract only requires
//! efficient incremental insertion and k-NN query over large shards.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("failed to decode index snapshot: {0}")]
    Corrupted(String),
}

/// Operations any ANN index must support. Vectors passed to `add`/`search`
/// are assumed already L2-normalized by the caller (the engine does this
/// before touching the index, see `worker-engine`).
pub trait AnnIndex: Send + Sync {
    /// Inserts one `(id, vector)` pair. `id` values are expected to be
    /// assigned in increasing order by the caller (the engine's per-shard
    /// `next_id` counter) but the index does not depend on contiguity for
    /// correctness.
    fn add(&self, id: u32, vector: &[f32]) -> Result<(), IndexError>;

    /// Returns up to `k` `(id, score)` pairs ordered by score descending,
    /// where `score` is cosine similarity in `[-1, 1]`. Empty if the index
    /// is empty or `k == 0`.
    fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dim(&self) -> usize;

    /// Serializes the whole index to an opaque byte blob.
    fn serialize(&self) -> Vec<u8>;
}

const DEFAULT_M: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 100;
const DEFAULT_EF_SEARCH: usize = 64;

struct HnswNode {
    id: u32,
    vector: Vec<f32>,
    /// `layers[l]` is the neighbor list at level `l`. `layers.len() - 1` is
    /// this node's top level. An edge only ever exists between two nodes
    /// that both have a layer at that level.
    layers: Vec<RwLock<Vec<u32>>>,
}

/// Incremental HNSW index over unit-norm vectors, scored by dot product
/// (equivalent to cosine similarity since both sides are normalized).
pub struct CosineHnsw {
    dim: usize,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    nodes: RwLock<Vec<HnswNode>>,
    id_to_pos: RwLock<std::collections::HashMap<u32, usize>>,
    entry_point: AtomicI64,
    top_level: AtomicUsize,
    len: AtomicUsize,
}

#[derive(Serialize, Deserialize)]
struct PersistedNode {
    id: u32,
    vector: Vec<f32>,
    layers: Vec<Vec<u32>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    dim: usize,
    m: usize,
    ef_construction: usize,
    entry_point: i64,
    nodes: Vec<PersistedNode>,
}

impl CosineHnsw {
    pub fn new(dim: usize) -> Self {
        Self::with_params(dim, DEFAULT_M, DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH)
    }

    pub fn with_params(dim: usize, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            dim,
            m,
            ef_construction,
            ef_search,
            nodes: RwLock::new(Vec::new()),
            id_to_pos: RwLock::new(std::collections::HashMap::new()),
            entry_point: AtomicI64::new(-1),
            top_level: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8], dim: usize) -> Result<Self, IndexError> {
        if bytes.is_empty() {
            return Ok(Self::new(dim));
        }
        let persisted: PersistedIndex =
            bincode::deserialize(bytes).map_err(|e| IndexError::Corrupted(e.to_string()))?;
        if persisted.dim != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: persisted.dim,
            });
        }
        let index = Self::with_params(
            persisted.dim,
            persisted.m,
            persisted.ef_construction,
            DEFAULT_EF_SEARCH,
        );
        index
            .entry_point
            .store(persisted.entry_point, Ordering::SeqCst);
        let mut top_level = 0usize;
        {
            let mut nodes = index.nodes.write();
            let mut id_to_pos = index.id_to_pos.write();
            for (pos, n) in persisted.nodes.into_iter().enumerate() {
                top_level = top_level.max(n.layers.len().saturating_sub(1));
                id_to_pos.insert(n.id, pos);
                nodes.push(HnswNode {
                    id: n.id,
                    vector: n.vector,
                    layers: n.layers.into_iter().map(RwLock::new).collect(),
                });
            }
            index.len.store(nodes.len(), Ordering::SeqCst);
        }
        index.top_level.store(top_level, Ordering::SeqCst);
        Ok(index)
    }

    fn random_level(&self) -> usize {
        let m_l = 1.0 / (self.m as f64).ln().max(1e-9);
        let mut rng = rand::thread_rng();
        let unif: f64 = rng.gen_range(f64::EPSILON..1.0);
        (-unif.ln() * m_l).floor() as usize
    }

    fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// Greedy single-path descent used above the insertion/query level: just
    /// walk toward whichever neighbor is closest, one hop at a time. `level`
    /// must not exceed `from`'s own top level.
    fn greedy_descend(&self, nodes: &[HnswNode], from: usize, level: usize, query: &[f32]) -> usize {
        if level >= nodes[from].layers.len() {
            return from;
        }
        let mut current = from;
        let mut current_score = self.dot(query, &nodes[current].vector);
        loop {
            let mut improved = false;
            let neighbor_ids = nodes[current].layers[level].read().clone();
            for nb_id in neighbor_ids {
                let nb_pos = match self.id_to_pos.read().get(&nb_id) {
                    Some(&p) => p,
                    None => continue,
                };
                let score = self.dot(query, &nodes[nb_pos].vector);
                if score > current_score {
                    current_score = score;
                    current = nb_pos;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search at a given level, returning up to `ef` candidates ordered
    /// by score descending. `entry` must have a layer at `level`.
    fn search_layer(
        &self,
        nodes: &[HnswNode],
        entry: usize,
        level: usize,
        query: &[f32],
        ef: usize,
    ) -> Vec<(usize, f32)> {
        if level >= nodes[entry].layers.len() {
            return vec![(entry, self.dot(query, &nodes[entry].vector))];
        }
        let mut visited = std::collections::HashSet::new();
        visited.insert(entry);
        let entry_score = self.dot(query, &nodes[entry].vector);

        let mut candidates: BinaryHeap<(OrderedFloat<f32>, usize)> = BinaryHeap::new();
        candidates.push((OrderedFloat(entry_score), entry));
        let mut results: Vec<(usize, f32)> = vec![(entry, entry_score)];

        while let Some((OrderedFloat(cand_score), cand_pos)) = candidates.pop() {
            let worst_result = results.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
            if results.len() >= ef && cand_score < worst_result {
                break;
            }
            if level >= nodes[cand_pos].layers.len() {
                continue;
            }
            let neighbor_ids = nodes[cand_pos].layers[level].read().clone();
            for nb_id in neighbor_ids {
                let nb_pos = match self.id_to_pos.read().get(&nb_id) {
                    Some(&p) => p,
                    None => continue,
                };
                if !visited.insert(nb_pos) {
                    continue;
                }
                let score = self.dot(query, &nodes[nb_pos].vector);
                candidates.push((OrderedFloat(score), nb_pos));
                results.push((nb_pos, score));
            }
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(CmpOrdering::Equal));
        results.truncate(ef.max(1));
        results
    }

    /// Links `pos` and `nb_pos` at level `l`, both directions, pruning
    /// `nb_pos`'s list back to `2*m` if it grows past that. Only called when
    /// both nodes are known to have a layer at `l`.
    fn link(&self, nodes: &[HnswNode], pos: usize, nb_pos: usize, l: usize) {
        if nb_pos == pos {
            return;
        }
        let nb_id = nodes[nb_pos].id;
        {
            let mut my_neighbors = nodes[pos].layers[l].write();
            if !my_neighbors.contains(&nb_id) {
                my_neighbors.push(nb_id);
            }
        }
        let mut nb_neighbors = nodes[nb_pos].layers[l].write();
        let pos_id = nodes[pos].id;
        if !nb_neighbors.contains(&pos_id) {
            nb_neighbors.push(pos_id);
        }
        if nb_neighbors.len() > self.m * 2 {
            let nb_vector = &nodes[nb_pos].vector;
            let id_to_pos = self.id_to_pos.read();
            let mut scored: Vec<(u32, f32)> = nb_neighbors
                .iter()
                .filter_map(|&nid| id_to_pos.get(&nid).map(|&p| (nid, self.dot(nb_vector, &nodes[p].vector))))
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(CmpOrdering::Equal));
            scored.truncate(self.m * 2);
            *nb_neighbors = scored.into_iter().map(|(nid, _)| nid).collect();
        }
    }
}

impl AnnIndex for CosineHnsw {
    fn add(&self, id: u32, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let level = self.random_level();
        let mut nodes = self.nodes.write();
        let pos = nodes.len();
        let layers = (0..=level).map(|_| RwLock::new(Vec::new())).collect();
        nodes.push(HnswNode {
            id,
            vector: vector.to_vec(),
            layers,
        });
        self.id_to_pos.write().insert(id, pos);

        let entry = self.entry_point.load(Ordering::SeqCst);
        if entry < 0 {
            self.entry_point.store(pos as i64, Ordering::SeqCst);
            self.top_level.store(level, Ordering::SeqCst);
            self.len.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        let mut current = entry as usize;
        let top = self.top_level.load(Ordering::SeqCst);

        for l in (level + 1..=top).rev() {
            current = self.greedy_descend(&nodes, current, l, vector);
        }

        for l in (0..=level.min(top)).rev() {
            let candidates = self.search_layer(&nodes, current, l, vector, self.ef_construction);
            if let Some(&(best_pos, _)) = candidates.first() {
                current = best_pos;
            }
            for &(nb_pos, _) in candidates.iter().take(self.m) {
                if l >= nodes[nb_pos].layers.len() {
                    continue;
                }
                self.link(&nodes, pos, nb_pos, l);
            }
        }

        if level > top {
            self.top_level.store(level, Ordering::SeqCst);
            self.entry_point.store(pos as i64, Ordering::SeqCst);
        }
        self.len.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let entry = self.entry_point.load(Ordering::SeqCst);
        if entry < 0 {
            return Vec::new();
        }
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return Vec::new();
        }
        let mut current = entry as usize;
        let top = self.top_level.load(Ordering::SeqCst);
        for l in (1..=top).rev() {
            current = self.greedy_descend(&nodes, current, l, query);
        }
        let ef = self.ef_search.max(k);
        let results = self.search_layer(&nodes, current, 0, query, ef);
        results
            .into_iter()
            .take(k)
            .map(|(pos, score)| (nodes[pos].id, score))
            .collect()
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn serialize(&self) -> Vec<u8> {
        let nodes = self.nodes.read();
        let persisted = PersistedIndex {
            dim: self.dim,
            m: self.m,
            ef_construction: self.ef_construction,
            entry_point: self.entry_point.load(Ordering::SeqCst),
            nodes: nodes
                .iter()
                .map(|n| PersistedNode {
                    id: n.id,
                    vector: n.vector.clone(),
                    layers: n.layers.iter().map(|l| l.read().clone()).collect(),
                })
                .collect(),
        };
        bincode::serialize(&persisted).expect("serializing an in-memory index never fails")
    }
}
