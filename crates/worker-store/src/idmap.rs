use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bijection from internal integer id to external `doc_id`, plus the next
/// id to assign. Mirrors the on-disk `shard_<id>_map.json` shape exactly:
/// `{"id_map": {"<id>": doc_id, ...}, "next_id": n}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdMap {
    pub id_map: BTreeMap<u32, String>,
    pub next_id: u32,
}

impl IdMap {
    pub fn insert(&mut self, id: u32, doc_id: String) {
        self.id_map.insert(id, doc_id);
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.id_map.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }
}
