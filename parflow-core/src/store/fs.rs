//! Filesystem store.
//!
//! Layout: `{root}/{key}/` per node, holding
//! - `{node_file}`: the node descriptor (default `__node__.json`)
//! - `{map_prefix}{partition}{suffix}`: one map-output object per partition
//!   (default `__map__0.json`, `__map__1.json`, ...)
//! - one sub-directory per child named in the descriptor.
//!
//! Writes are atomic (write to `.tmp`, rename into place). Reads are retried
//! a bounded number of times, since a concurrent worker may be halfway
//! through a write nearby.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{NodeRecord, Store, StoreError};
use crate::output::OutputMap;

const TMP_SUFFIX: &str = ".tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File naming inside a node directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreLayout {
    pub node_file: String,
    pub map_prefix: String,
    pub suffix: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            node_file: "__node__.json".to_string(),
            map_prefix: "__map__".to_string(),
            suffix: ".json".to_string(),
        }
    }
}

impl StoreLayout {
    fn map_file(&self, partition: usize) -> String {
        format!("{}{}{}", self.map_prefix, partition, self.suffix)
    }

    fn parse_map_file(&self, name: &str) -> Option<usize> {
        name.strip_prefix(&self.map_prefix)?
            .strip_suffix(&self.suffix)?
            .parse()
            .ok()
    }
}

/// Bounded retries for reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first failure (default 10).
    pub read_retries: u32,
    /// Pause between attempts, in milliseconds (default 20).
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            read_retries: 10,
            backoff_ms: 20,
        }
    }
}

/// The filesystem store.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    layout: StoreLayout,
    retry: RetryPolicy,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, layout: StoreLayout, retry: RetryPolicy) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            layout,
            retry,
        })
    }

    /// Open with the default layout and retry policy.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(root, StoreLayout::default(), RetryPolicy::default())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Directory for a node: `{root}/{key}`.
    fn node_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn with_retries<T>(&self, what: &str, mut attempt: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut failures = 0;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && failures < self.retry.read_retries => {
                    failures += 1;
                    warn!(what, attempt = failures, error = %e, "store read failed, retrying");
                    thread::sleep(Duration::from_millis(self.retry.backoff_ms));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Map-output files under `key`, by partition. Sub-directories must be
    /// children named in the node descriptor.
    fn list_outputs(&self, key: &str) -> Result<Vec<(usize, PathBuf)>, StoreError> {
        let dir = self.node_dir(key);
        if !dir.is_dir() {
            return Err(StoreError::Missing(key.to_string()));
        }
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut found = Vec::new();
        let mut children: Option<Vec<String>> = None;
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if children.is_none() {
                    let record: NodeRecord = read_json(key, &dir.join(&self.layout.node_file))?;
                    children = Some(record.children);
                }
                if !children.as_ref().is_some_and(|c| c.contains(&name)) {
                    return Err(StoreError::UnknownExtension {
                        key: key.to_string(),
                        name,
                    });
                }
                continue;
            }
            if name == self.layout.node_file {
                continue;
            }
            if name.ends_with(TMP_SUFFIX) {
                return Err(StoreError::Incomplete(key.to_string()));
            }
            match self.layout.parse_map_file(&name) {
                Some(partition) => found.push((partition, path)),
                None => {
                    return Err(StoreError::UnknownExtension {
                        key: key.to_string(),
                        name,
                    })
                }
            }
        }
        found.sort_by_key(|(partition, _)| *partition);
        Ok(found)
    }
}

/// Write `bytes` to `path` through a temporary file named uniquely per
/// process and call.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        "{file_name}.{}-{}{TMP_SUFFIX}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn read_json<T: DeserializeOwned>(key: &str, path: &Path) -> Result<T, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::Missing(key.to_string()))
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupt(path.display(), e))
}

fn to_json<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(value).map_err(|e| StoreError::corrupt(key, e))
}

impl Store for FsStore {
    fn save_node(&self, key: &str, record: &NodeRecord) -> Result<(), StoreError> {
        let path = self.node_dir(key).join(&self.layout.node_file);
        write_atomic(&path, &to_json(key, record)?)
    }

    fn load_node(&self, key: &str) -> Result<NodeRecord, StoreError> {
        let path = self.node_dir(key).join(&self.layout.node_file);
        self.with_retries(key, || read_json(key, &path))
    }

    fn save_outputs(&self, key: &str, partition: usize, outputs: &OutputMap) -> Result<(), StoreError> {
        let path = self.node_dir(key).join(self.layout.map_file(partition));
        debug!(key, partition, outputs = outputs.len(), "saving map outputs");
        write_atomic(&path, &to_json(key, outputs)?)
    }

    fn load_outputs(&self, key: &str) -> Result<Vec<(usize, OutputMap)>, StoreError> {
        self.with_retries(key, || {
            self.list_outputs(key)?
                .into_iter()
                .map(|(partition, path)| Ok((partition, read_json(key, &path)?)))
                .collect()
        })
    }

    fn root_keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
            if entry.path().join(&self.layout.node_file).is_file() {
                keys.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputValue;
    use crate::store::{KindRecord, NodeRecord};
    use tempfile::TempDir;

    fn quick(dir: &TempDir) -> FsStore {
        FsStore::open(
            dir.path(),
            StoreLayout::default(),
            RetryPolicy {
                read_retries: 1,
                backoff_ms: 1,
            },
        )
        .unwrap()
    }

    fn record() -> NodeRecord {
        NodeRecord {
            name: "Methods".into(),
            signature_args: Default::default(),
            wildcard: false,
            kind: KindRecord::Methods,
            parent: None,
            children: vec![],
        }
    }

    #[test]
    fn node_descriptor_lands_in_key_directory() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        store.save_node("Methods/LDA", &record()).unwrap();
        assert!(dir.path().join("Methods/LDA/__node__.json").is_file());
        assert_eq!(store.load_node("Methods/LDA").unwrap(), record());
    }

    #[test]
    fn outputs_are_listed_per_partition() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        let mut a = OutputMap::new();
        a.insert("pred".into(), OutputValue::Sequence(vec![1.0]));
        store.save_node("R", &record()).unwrap();
        store.save_outputs("R", 2, &a).unwrap();
        store.save_outputs("R", 0, &a).unwrap();
        let loaded = store.load_outputs("R").unwrap();
        assert_eq!(loaded.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(loaded[0].1, a);
    }

    #[test]
    fn unknown_files_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        store.save_node("R", &record()).unwrap();
        fs::write(dir.path().join("R/stray.pkl"), b"x").unwrap();
        assert!(matches!(
            store.load_outputs("R"),
            Err(StoreError::UnknownExtension { .. })
        ));
    }

    #[test]
    fn leftover_tmp_file_escalates_after_retries() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        store.save_node("R", &record()).unwrap();
        fs::write(dir.path().join("R/__map__0.json.tmp"), b"{").unwrap();
        assert!(matches!(store.load_outputs("R"), Err(StoreError::Incomplete(_))));
    }

    #[test]
    fn read_recovers_once_tmp_file_is_renamed() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(
            dir.path(),
            StoreLayout::default(),
            RetryPolicy {
                read_retries: 50,
                backoff_ms: 5,
            },
        )
        .unwrap();
        store.save_node("R", &record()).unwrap();
        let mut out = OutputMap::new();
        out.insert("pred".into(), OutputValue::Sequence(vec![1.0, -1.0]));
        let tmp = dir.path().join("R/__map__0.json.tmp");
        fs::write(&tmp, serde_json::to_vec(&out).unwrap()).unwrap();

        let writer = thread::spawn({
            let tmp = tmp.clone();
            let done = dir.path().join("R/__map__0.json");
            move || {
                thread::sleep(Duration::from_millis(30));
                fs::rename(tmp, done).unwrap();
            }
        });
        let loaded = store.load_outputs("R").unwrap();
        writer.join().unwrap();
        assert_eq!(loaded, vec![(0, out)]);
    }

    #[test]
    fn undeclared_child_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        let mut parent = record();
        parent.children = vec!["SignClassifier(threshold=0)".into()];
        store.save_node("R", &parent).unwrap();
        store.save_node("R/SignClassifier(threshold=0)", &record()).unwrap();
        assert!(store.load_outputs("R").unwrap().is_empty());

        fs::create_dir_all(dir.path().join("R/backup")).unwrap();
        match store.load_outputs("R") {
            Err(StoreError::UnknownExtension { name, .. }) => assert_eq!(name, "backup"),
            other => panic!("expected UnknownExtension, got {other:?}"),
        }
    }

    #[test]
    fn missing_key_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        assert!(matches!(store.load_node("nope"), Err(StoreError::Missing(_))));
    }

    #[test]
    fn corrupt_descriptor_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        fs::create_dir_all(dir.path().join("R")).unwrap();
        fs::write(dir.path().join("R/__node__.json"), b"not json").unwrap();
        assert!(matches!(store.load_node("R"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn root_keys_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = quick(&dir);
        store.save_node("CV", &record()).unwrap();
        store.save_node("CV/CV(nb=0)", &record()).unwrap();
        assert_eq!(store.root_keys().unwrap(), vec!["CV".to_string()]);
        store.clear().unwrap();
        assert!(store.root_keys().unwrap().is_empty());
    }

    #[test]
    fn layout_parses_its_own_names() {
        let layout = StoreLayout::default();
        assert_eq!(layout.parse_map_file(&layout.map_file(12)), Some(12));
        assert_eq!(layout.parse_map_file("__map__x.json"), None);
        assert_eq!(layout.parse_map_file("__node__.json"), None);
    }
}
