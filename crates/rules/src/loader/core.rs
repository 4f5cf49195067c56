//! Core [`ConfigLoader`] struct: filesystem-backed document loading with optional hot-reload.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{info, warn};

use logwarden_core::{Playbook, Rule};

use crate::schema::{ConfigDocument, ConfigEnvelope};

use super::error::{ConfigError, LoadResult, LoadStatus, Result};
use super::watcher::handle_fs_event;

pub(super) type DocumentMap = Arc<RwLock<BTreeMap<PathBuf, ConfigDocument>>>;

/// Filesystem-backed configuration loader with optional hot-reload.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files and keeps the
/// parsed [`ConfigDocument`]s keyed by file path. Every change to the set
/// bumps a generation counter published on a `watch` channel, so consumers
/// can rebuild their rule or playbook tables without polling.
pub struct ConfigLoader {
    config_dir: PathBuf,
    documents: DocumentMap,
    generation: Arc<watch::Sender<u64>>,
    /// Held to keep the watcher alive.
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigLoader {
    /// Create a new loader for the given directory.
    ///
    /// Creates the directory (and parents) if it does not exist.
    pub fn new(config_dir: PathBuf) -> Self {
        if !config_dir.exists() {
            if let Err(e) = fs::create_dir_all(&config_dir) {
                warn!(path = %config_dir.display(), error = %e, "failed to create config directory");
            }
        }
        // Watcher events carry canonical paths; keys must match them.
        let config_dir = fs::canonicalize(&config_dir).unwrap_or(config_dir);
        let (generation, _) = watch::channel(0);
        Self {
            config_dir,
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            generation: Arc::new(generation),
            _watcher: None,
        }
    }

    /// Recursively scan the directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse errors are reported
    /// per file and never abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.config_dir, &mut results)?;
        self.generation.send_modify(|g| *g += 1);
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        paths.sort();

        for path in paths {
            if is_dotfile(&path) {
                if path.is_file() {
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Skipped {
                            reason: "dotfile".to_string(),
                        },
                    });
                }
                continue;
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, results)?;
                continue;
            }

            if !is_yaml(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            match Self::load_file(&path) {
                Ok(doc) => {
                    let id = doc.metadata().id.clone();
                    let kind = doc.kind();
                    info!(id = %id, kind = %kind, path = %path.display(), "loaded config document");
                    self.documents
                        .write()
                        .expect("documents lock poisoned")
                        .insert(path.clone(), doc);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { id, kind },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(())
    }

    /// Parse a single YAML file via two-pass deserialization.
    ///
    /// First pass reads the [`ConfigEnvelope`] to learn the `kind`; second
    /// pass deserializes the kind-specific document.
    pub fn load_file(path: &Path) -> Result<ConfigDocument> {
        let contents = fs::read_to_string(path)?;
        parse_document(&contents)
    }

    /// Start a filesystem watcher with a 500ms poll interval.
    ///
    /// Created or modified files are re-parsed and upserted; deleted files
    /// are dropped. A file that fails to parse keeps its previous version.
    pub fn watch(&mut self) -> Result<()> {
        let documents = Arc::clone(&self.documents);
        let generation = Arc::clone(&self.generation);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if handle_fs_event(&event, &documents) {
                        generation.send_modify(|g| *g += 1);
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&self.config_dir, RecursiveMode::Recursive)?;

        let _ = watcher
            .configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.config_dir.display(), "watching config directory for changes (recursive)");
        self._watcher = Some(watcher);
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Receiver that changes every time the document set is reloaded.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    pub fn documents(&self) -> Vec<ConfigDocument> {
        self.documents
            .read()
            .expect("documents lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of every detection rule, enabled or not. When two files
    /// declare the same id, the one with the lexically greater path wins.
    pub fn rules(&self) -> Vec<Rule> {
        let mut by_id = BTreeMap::new();
        for (path, doc) in self.documents.read().expect("documents lock poisoned").iter() {
            if let Some(rule) = doc.as_rule() {
                if let Some(previous) = by_id.insert(rule.id.clone(), rule) {
                    warn!(rule_id = %previous.id, path = %path.display(), "duplicate rule id, later file wins");
                }
            }
        }
        by_id.into_values().collect()
    }

    /// Snapshot of enabled playbooks.
    pub fn playbooks(&self) -> Vec<Playbook> {
        self.documents
            .read()
            .expect("documents lock poisoned")
            .values()
            .filter(|doc| doc.is_enabled())
            .filter_map(ConfigDocument::as_playbook)
            .collect()
    }
}

pub(super) fn parse_document(contents: &str) -> Result<ConfigDocument> {
    let envelope: ConfigEnvelope = serde_yaml::from_str(contents)?;

    if envelope.metadata.id.trim().is_empty() {
        return Err(ConfigError::MissingId);
    }

    envelope.parse_full().map_err(|e| ConfigError::InvalidDocument {
        kind: envelope.kind.clone(),
        id: envelope.metadata.id.clone(),
        message: e,
    })
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

pub(super) fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
