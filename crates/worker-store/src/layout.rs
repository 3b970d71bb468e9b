use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::idmap::IdMap;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse id map at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where a shard's files live, and whether they're in the current
/// (per-collection-directory) or legacy (flat) layout.
#[derive(Debug, Clone)]
pub struct ShardLocation {
    pub collection_id: String,
    pub shard_id: String,
    bin_path: PathBuf,
    map_path: PathBuf,
}

fn current_dir(data_dir: &Path, collection_id: &str) -> PathBuf {
    data_dir.join(collection_id)
}

fn current_bin_path(data_dir: &Path, collection_id: &str, shard_id: &str) -> PathBuf {
    current_dir(data_dir, collection_id).join(format!("shard_{shard_id}.bin"))
}

fn current_map_path(data_dir: &Path, collection_id: &str, shard_id: &str) -> PathBuf {
    current_dir(data_dir, collection_id).join(format!("shard_{shard_id}_map.json"))
}

fn legacy_bin_path(data_dir: &Path, collection_id: &str) -> PathBuf {
    data_dir.join(format!("{collection_id}.bin"))
}

fn legacy_map_path(data_dir: &Path, collection_id: &str) -> PathBuf {
    data_dir.join(format!("{collection_id}_map.json"))
}

/// Writes a shard's index bytes and id map in the current layout. Both
/// files are written to a temp path in the same directory and renamed into
/// place, so a crash mid-write never leaves a half-written file visible
/// under the real name. The writer never produces the legacy layout.
pub fn save_shard(
    data_dir: &Path,
    collection_id: &str,
    shard_id: &str,
    index_bytes: &[u8],
    id_map: &IdMap,
) -> Result<(), StoreError> {
    let dir = current_dir(data_dir, collection_id);
    fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
        path: dir.clone(),
        source,
    })?;

    let bin_path = current_bin_path(data_dir, collection_id, shard_id);
    atomic_write(&bin_path, index_bytes)?;

    let map_path = current_map_path(data_dir, collection_id, shard_id);
    let json = serde_json::to_vec_pretty(id_map).map_err(|source| StoreError::Json {
        path: map_path.clone(),
        source,
    })?;
    atomic_write(&map_path, &json)?;

    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).map_err(|source| StoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a shard's index bytes and id map from whichever location points at
/// it (current or legacy).
pub fn load_shard(location: &ShardLocation) -> Result<(Vec<u8>, IdMap), StoreError> {
    let index_bytes = fs::read(&location.bin_path).map_err(|source| StoreError::Io {
        path: location.bin_path.clone(),
        source,
    })?;
    let map_bytes = fs::read(&location.map_path).map_err(|source| StoreError::Io {
        path: location.map_path.clone(),
        source,
    })?;
    let id_map: IdMap = serde_json::from_slice(&map_bytes).map_err(|source| StoreError::Json {
        path: location.map_path.clone(),
        source,
    })?;
    Ok((index_bytes, id_map))
}

/// Scans `data_dir` for every shard in both layouts. Current-layout shards
/// are discovered by walking each collection subdirectory for
/// `shard_<id>.bin` files; legacy-layout shards are the flat
/// `<collection_id>.bin` files at the root, always mapped to shard
/// `"default"`.
pub fn discover_shards(data_dir: &Path) -> std::io::Result<Vec<ShardLocation>> {
    let mut out = Vec::new();
    if !data_dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let collection_id = entry.file_name().to_string_lossy().into_owned();
            for shard_entry in fs::read_dir(&path)? {
                let shard_entry = shard_entry?;
                let name = shard_entry.file_name().to_string_lossy().into_owned();
                if let Some(shard_id) = name.strip_prefix("shard_").and_then(|n| n.strip_suffix(".bin")) {
                    out.push(ShardLocation {
                        collection_id: collection_id.clone(),
                        shard_id: shard_id.to_string(),
                        bin_path: current_bin_path(data_dir, &collection_id, shard_id),
                        map_path: current_map_path(data_dir, &collection_id, shard_id),
                    });
                }
            }
        } else if file_type.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(collection_id) = name.strip_suffix(".bin") {
                if collection_id.is_empty() {
                    continue;
                }
                out.push(ShardLocation {
                    collection_id: collection_id.to_string(),
                    shard_id: "default".to_string(),
                    bin_path: legacy_bin_path(data_dir, collection_id),
                    map_path: legacy_map_path(data_dir, collection_id),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut id_map = IdMap::default();
        id_map.insert(0, "a".to_string());
        id_map.next_id = 1;

        save_shard(dir.path(), "c1", "default", b"index-bytes", &id_map).unwrap();

        let locations = discover_shards(dir.path()).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].collection_id, "c1");
        assert_eq!(locations[0].shard_id, "default");

        let (bytes, loaded_map) = load_shard(&locations[0]).unwrap();
        assert_eq!(bytes, b"index-bytes");
        assert_eq!(loaded_map.get(0), Some("a"));
    }

    #[test]
    fn legacy_layout_is_discovered_as_default_shard() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c1.bin"), b"legacy-bytes").unwrap();
        fs::write(
            dir.path().join("c1_map.json"),
            r#"{"id_map":{"0":"a"},"next_id":1}"#,
        )
        .unwrap();

        let locations = discover_shards(dir.path()).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].collection_id, "c1");
        assert_eq!(locations[0].shard_id, "default");

        let (bytes, id_map) = load_shard(&locations[0]).unwrap();
        assert_eq!(bytes, b"legacy-bytes");
        assert_eq!(id_map.get(0), Some("a"));
    }

    #[test]
    fn writer_never_produces_legacy_layout() {
        let dir = tempfile::tempdir().unwrap();
        let id_map = IdMap::default();
        save_shard(dir.path(), "c1", "default", b"bytes", &id_map).unwrap();
        assert!(!dir.path().join("c1.bin").exists());
        assert!(dir.path().join("c1").join("shard_default.bin").exists());
    }

    #[test]
    fn current_and_legacy_layouts_coexist_for_different_collections() {
        let dir = tempfile::tempdir().unwrap();
        let id_map = IdMap::default();
        save_shard(dir.path(), "c1", "default", b"current", &id_map).unwrap();
        fs::write(dir.path().join("c2.bin"), b"legacy").unwrap();
        fs::write(dir.path().join("c2_map.json"), r#"{"id_map":{},"next_id":0}"#).unwrap();

        let mut locations = discover_shards(dir.path()).unwrap();
        locations.sort_by(|a, b| a.collection_id.cmp(&b.collection_id));
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].collection_id, "c1");
        assert_eq!(locations[1].collection_id, "c2");
    }
}
