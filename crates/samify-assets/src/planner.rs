//! Placement decisions and write-once staging.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use samify_plan::RenamePlan;

use crate::{AssetError, PlacementPolicy};

/// Where an asset's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Inline payload already in the document
    Inline { payload: String, file_name: String },

    /// A path on disk (file or directory)
    Local(PathBuf),

    /// A remote artifact reference
    Remote {
        bucket: String,
        key: String,
        version: Option<String>,
    },
}

/// Fetch capability for remote artifacts. Absent capability plus a
/// remote-only asset is an [`AssetError::Unavailable`].
pub trait RemoteFetcher {
    /// Retrieve the artifact bytes.
    ///
    /// # Errors
    /// Any retrieval failure; the planner turns it into `Unavailable`.
    fn fetch(&self, bucket: &str, key: &str, version: Option<&str>)
        -> std::io::Result<Vec<u8>>;
}

/// Placement decision for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedLocation {
    /// Payload stays inline in the document
    Inline,

    /// Bytes staged at this path, relative to the output document
    Staged(String),

    /// Remote reference passes through unchanged
    Remote,
}

/// One staged artifact.
#[derive(Debug, Clone)]
pub struct StagedAsset {
    pub logical_id: String,
    pub relative_path: String,
    digest: String,
}

#[derive(Debug)]
enum PendingWrite {
    File { bytes: Vec<u8> },
    CopyTree { source: PathBuf },
}

/// Plans placements in memory; [`AssetPlanner::commit`] performs every write
/// exactly once at the very end; an aborted run leaves no partial output.
#[derive(Debug)]
pub struct AssetPlanner {
    assets_dir: String,
    policy: PlacementPolicy,
    staged: Vec<StagedAsset>,
    by_digest: HashMap<String, String>,
    writes: Vec<(String, PendingWrite)>,
}

impl AssetPlanner {
    /// Planner staging under `<assets_dir>/<semantic name>/...` relative to
    /// the output document.
    #[must_use]
    pub fn new(assets_dir: impl Into<String>, policy: PlacementPolicy) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            policy,
            staged: Vec::new(),
            by_digest: HashMap::new(),
            writes: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Every staged artifact, in decision order.
    #[inline]
    #[must_use]
    pub fn staged(&self) -> &[StagedAsset] {
        &self.staged
    }

    /// Decide placement for one asset owned by `logical_id`.
    ///
    /// # Errors
    /// [`AssetError::Unavailable`] when external placement is required and
    /// the bytes cannot be obtained.
    pub fn place(
        &mut self,
        logical_id: &str,
        source: &AssetSource,
        fetcher: Option<&dyn RemoteFetcher>,
    ) -> Result<PlannedLocation, AssetError> {
        match source {
            AssetSource::Inline { payload, file_name } => {
                if self.policy == PlacementPolicy::PreferInline {
                    return Ok(PlannedLocation::Inline);
                }
                let digest = hex_digest(payload.as_bytes());
                let dir = self.reserve(logical_id, &digest, |planner, dir| {
                    let mut contents = payload.clone();
                    if !contents.ends_with('\n') {
                        contents.push('\n');
                    }
                    planner.writes.push((
                        format!("{dir}/{file_name}"),
                        PendingWrite::File {
                            bytes: contents.into_bytes(),
                        },
                    ));
                });
                Ok(PlannedLocation::Staged(dir))
            }
            AssetSource::Local(path) => {
                if !path.exists() {
                    return Err(AssetError::Unavailable {
                        logical_id: logical_id.to_string(),
                        reason: format!("local asset {} does not exist", path.display()),
                    });
                }
                let digest = digest_path(path)?;
                let dir = self.reserve(logical_id, &digest, |planner, dir| {
                    planner.writes.push((
                        dir.to_string(),
                        PendingWrite::CopyTree {
                            source: path.clone(),
                        },
                    ));
                });
                Ok(PlannedLocation::Staged(dir))
            }
            AssetSource::Remote {
                bucket,
                key,
                version,
            } => {
                if self.policy == PlacementPolicy::PreferInline {
                    return Ok(PlannedLocation::Remote);
                }
                let Some(fetcher) = fetcher else {
                    return Err(AssetError::Unavailable {
                        logical_id: logical_id.to_string(),
                        reason: format!(
                            "remote artifact s3://{bucket}/{key} has no local copy and no fetch capability"
                        ),
                    });
                };
                let bytes = fetcher
                    .fetch(bucket, key, version.as_deref())
                    .map_err(|err| AssetError::Unavailable {
                        logical_id: logical_id.to_string(),
                        reason: format!("fetch of s3://{bucket}/{key} failed: {err}"),
                    })?;
                let digest = hex_digest(&bytes);
                let file_name = key.rsplit('/').next().unwrap_or("artifact.zip").to_string();
                let dir = self.reserve(logical_id, &digest, |planner, dir| {
                    planner
                        .writes
                        .push((format!("{dir}/{file_name}"), PendingWrite::File { bytes }));
                });
                Ok(PlannedLocation::Staged(dir))
            }
        }
    }

    /// Reserve a staged directory for a digest: the first holder allocates
    /// `<assets_dir>/<logical_id>` and schedules the write; later holders of
    /// the same digest share the path and nothing is written twice.
    fn reserve<F>(&mut self, logical_id: &str, digest: &str, schedule: F) -> String
    where
        F: FnOnce(&mut Self, &str),
    {
        if let Some(existing) = self.by_digest.get(digest) {
            let path = existing.clone();
            tracing::debug!(logical_id, %path, "asset deduplicated by content digest");
            self.staged.push(StagedAsset {
                logical_id: logical_id.to_string(),
                relative_path: path.clone(),
                digest: digest.to_string(),
            });
            return path;
        }
        let dir = format!("{}/{logical_id}", self.assets_dir);
        self.by_digest.insert(digest.to_string(), dir.clone());
        self.staged.push(StagedAsset {
            logical_id: logical_id.to_string(),
            relative_path: dir.clone(),
            digest: digest.to_string(),
        });
        schedule(self, &dir);
        dir
    }

    /// Relocate staged paths after a rename. Only the first holder of a
    /// digest names the directory, so shared paths move consistently.
    pub fn apply_rename(&mut self, plan: &RenamePlan) {
        if plan.is_empty() {
            return;
        }
        let mut moves: HashMap<String, String> = HashMap::new();
        for asset in &mut self.staged {
            let new_id = plan.apply(&asset.logical_id);
            if new_id != asset.logical_id {
                let old_dir = format!("{}/{}", self.assets_dir, asset.logical_id);
                if asset.relative_path.starts_with(&old_dir) {
                    let new_dir = format!("{}/{new_id}", self.assets_dir);
                    moves.insert(old_dir.clone(), new_dir.clone());
                }
                asset.logical_id = new_id.to_string();
            }
        }
        if moves.is_empty() {
            return;
        }
        let rewrite = |path: &str| -> String {
            for (old_dir, new_dir) in &moves {
                if let Some(rest) = path.strip_prefix(old_dir.as_str()) {
                    return format!("{new_dir}{rest}");
                }
            }
            path.to_string()
        };
        for asset in &mut self.staged {
            asset.relative_path = rewrite(&asset.relative_path);
        }
        for (path, _) in &mut self.writes {
            *path = rewrite(path);
        }
        for dir in self.by_digest.values_mut() {
            *dir = rewrite(dir);
        }
    }

    /// The staged path for a logical ID, when one was planned.
    #[must_use]
    pub fn staged_path(&self, logical_id: &str) -> Option<&str> {
        self.staged
            .iter()
            .find(|asset| asset.logical_id == logical_id)
            .map(|asset| asset.relative_path.as_str())
    }

    /// Perform every planned write under `output_root`. Called exactly once,
    /// at the very end of a successful run.
    ///
    /// # Errors
    /// [`AssetError::Io`] on any filesystem failure.
    pub fn commit(&self, output_root: &Path) -> Result<(), AssetError> {
        for (path, write) in &self.writes {
            let target = output_root.join(path);
            match write {
                PendingWrite::File { bytes } => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent).map_err(|source| AssetError::Io {
                            path: parent.display().to_string(),
                            source,
                        })?;
                    }
                    std::fs::write(&target, bytes).map_err(|source| AssetError::Io {
                        path: target.display().to_string(),
                        source,
                    })?;
                }
                PendingWrite::CopyTree { source } => copy_tree(source, &target)?,
            }
        }
        if !self.writes.is_empty() {
            tracing::info!(count = self.writes.len(), "staged asset tree written");
        }
        Ok(())
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), AssetError> {
    let io_err = |path: &Path, source: std::io::Error| AssetError::Io {
        path: path.display().to_string(),
        source,
    };
    if source.is_dir() {
        std::fs::create_dir_all(target).map_err(|e| io_err(target, e))?;
        let mut entries: Vec<_> = std::fs::read_dir(source)
            .map_err(|e| io_err(source, e))?
            .collect::<Result<_, _>>()
            .map_err(|e| io_err(source, e))?;
        entries.sort_by_key(std::fs::DirEntry::file_name);
        for entry in entries {
            copy_tree(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::copy(source, target)
            .map(|_| ())
            .map_err(|e| io_err(target, e))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content digest of a file, or of a directory tree (sorted relative paths
/// hashed together with their bytes).
fn digest_path(path: &Path) -> Result<String, AssetError> {
    let io_err = |path: &Path, source: std::io::Error| AssetError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut hasher = Sha256::new();
    if path.is_dir() {
        digest_dir(path, path, &mut hasher)?;
    } else {
        let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn digest_dir(root: &Path, dir: &Path, hasher: &mut Sha256) -> Result<(), AssetError> {
    let io_err = |path: &Path, source: std::io::Error| AssetError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .collect::<Result<_, _>>()
        .map_err(|e| io_err(dir, e))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);
    for entry in entries {
        let path = entry.path();
        if let Ok(relative) = path.strip_prefix(root) {
            hasher.update(relative.to_string_lossy().as_bytes());
        }
        if path.is_dir() {
            digest_dir(root, &path, hasher)?;
        } else {
            let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
            hasher.update(&bytes);
        }
    }
    Ok(())
}
