#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! On-disk layout for a worker's shards.
//!
//! *Current layout*, written by `save_shard`: for each collection, a
//! subdirectory `data_dir/<collection_id>/` holding, per shard,
//! `shard_<shard_id>.bin` (opaque index bytes) and
//! `shard_<shard_id>_map.json` (the [`IdMap`]).
//!
//! *Legacy layout*, read-only: flat files `data_dir/<collection_id>.bin` and
//! `data_dir/<collection_id>_map.json`, loaded as shard `"default"`. This
//! implementation never writes the legacy layout — only the current one.

mod idmap;
mod layout;

pub use idmap::IdMap;
pub use layout::{discover_shards, load_shard, save_shard, ShardLocation, StoreError};
