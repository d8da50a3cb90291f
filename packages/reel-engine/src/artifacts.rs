//! The shared artifact root: id allocation, in-flight tracking, discovery,
//! confined lookups and the retention pass.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/videos/<scratch-stem>/<resolution>/<unique_id>.mp4
//! <root>/videos/<scratch-stem>/<resolution>/partial_movie_files/...
//! <root>/scratch/<unique_id>*.py
//! <root>/jobs/<unique_id>
//! <root>/logs/pipeline.jsonl
//! ```
//!
//! `jobs/` holds one marker per running render so that stores opened by other
//! processes on the same root see it as in flight.

use crate::error::{ReelError, ReelResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const PARTIAL_DIR_NAME: &str = "partial_movie_files";
const VIDEO_EXTENSION: &str = "mp4";
/// Parent directories removed after deleting an artifact, counted upward from its own directory.
const MAX_EMPTY_PARENT_LEVELS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub path: PathBuf,
    pub scene_name: String,
    pub unique_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl RenderedArtifact {
    pub fn from_path(path: PathBuf, scene_name: &str, unique_id: &str) -> ReelResult<Self> {
        let meta = std::fs::metadata(&path)?;
        let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        Ok(Self {
            path,
            scene_name: scene_name.to_string(),
            unique_id: unique_id.to_string(),
            created_at: DateTime::<Utc>::from(modified),
            size_bytes: meta.len(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub removed_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
    pub purged_partials: Vec<PathBuf>,
    pub kept: usize,
}

impl RetentionReport {
    pub fn is_noop(&self) -> bool {
        self.removed_files.is_empty()
            && self.removed_dirs.is_empty()
            && self.purged_partials.is_empty()
    }
}

struct StoreInner {
    root: PathBuf,
    seq: AtomicU64,
    in_flight: Mutex<HashSet<String>>,
}

/// Cloneable handle to one artifact root. Every component touching rendered files goes through it.
#[derive(Clone)]
pub struct ArtifactStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("root", &self.inner.root)
            .finish()
    }
}

/// Marks a job id as in flight until dropped.
pub struct InFlightGuard {
    store: ArtifactStore,
    unique_id: String,
}

impl InFlightGuard {
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.store.lock_in_flight().remove(&self.unique_id);
        let marker = self.store.jobs_dir().join(&self.unique_id);
        if let Err(e) = std::fs::remove_file(&marker) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %marker.display(), error = %e, "could not remove job marker");
            }
        }
    }
}

impl ArtifactStore {
    /// Creates the directory layout if needed and pins the canonical root.
    pub fn open(root: impl AsRef<Path>) -> ReelResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root.join("videos"))?;
        std::fs::create_dir_all(root.join("scratch"))?;
        std::fs::create_dir_all(root.join("jobs"))?;
        let root = root.canonicalize()?;
        debug!(root = %root.display(), "artifact store opened");
        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                seq: AtomicU64::new(0),
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.inner.root.join("videos")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.inner.root.join("scratch")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.inner.root.join("logs")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.inner.root.join("jobs")
    }

    /// `<scene>_<unix seconds>_<seq>_<tag>`.
    ///
    /// The zero-padded sequence separates ids from this handle within one second; the
    /// random 8-hex tag separates handles, including ones in other processes. Both fields
    /// are fixed width, so one id is never a substring of another for the same scene.
    pub fn next_unique_id(&self, scene_name: &str) -> String {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let tag = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{:06}_{}",
            scene_name,
            Utc::now().timestamp(),
            seq,
            &tag[..8]
        )
    }

    /// Registers `unique_id` in memory and as a marker under `jobs/` until the guard drops.
    pub fn begin_job(&self, unique_id: &str) -> ReelResult<InFlightGuard> {
        std::fs::create_dir_all(self.jobs_dir())?;
        std::fs::write(
            self.jobs_dir().join(unique_id),
            std::process::id().to_string(),
        )?;
        self.lock_in_flight().insert(unique_id.to_string());
        Ok(InFlightGuard {
            store: self.clone(),
            unique_id: unique_id.to_string(),
        })
    }

    /// Ids in flight on this root: this handle's jobs plus every job marker on disk.
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active_ids().into_iter().collect();
        ids.sort();
        ids
    }

    fn active_ids(&self) -> HashSet<String> {
        let mut ids = self.lock_in_flight().clone();
        if let Ok(entries) = std::fs::read_dir(self.jobs_dir()) {
            ids.extend(
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .map(|e| e.file_name().to_string_lossy().into_owned()),
            );
        }
        ids
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }


    /// Most recently modified final video whose file name contains `unique_id`.
    pub fn locate(&self, unique_id: &str) -> Option<PathBuf> {
        final_videos(&self.videos_dir())
            .into_iter()
            .filter(|(path, _)| {
                path.file_name()
                    .map(|n| n.to_string_lossy().contains(unique_id))
                    .unwrap_or(false)
            })
            .max_by_key(|(_, modified)| *modified)
            .map(|(path, _)| path)
    }

    /// True when `path` canonicalizes to a location under the root.
    pub fn contains(&self, path: &Path) -> bool {
        path.canonicalize()
            .map(|p| p.starts_with(&self.inner.root))
            .unwrap_or(false)
    }

    /// Maps a request path (relative to the videos directory) to an existing file inside it.
    pub fn resolve(&self, relative: &str) -> ReelResult<PathBuf> {
        let rel = Path::new(relative);
        let is_plain = !relative.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !is_plain {
            warn!(path = relative, "rejected artifact path");
            return Err(ReelError::PathEscape(rel.to_path_buf()));
        }

        let videos = self.videos_dir();
        let candidate = videos.join(rel);
        let canonical = match candidate.canonicalize() {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReelError::NotFound(candidate));
            }
            Err(e) => return Err(e.into()),
        };
        if !canonical.starts_with(&videos) {
            warn!(path = relative, "artifact path resolves outside the videos directory");
            return Err(ReelError::PathEscape(rel.to_path_buf()));
        }
        if !canonical.is_file() {
            return Err(ReelError::NotFound(canonical));
        }
        Ok(canonical)
    }

    /// Public URL for an artifact: `/video/<path under videos dir>` with forward slashes.
    pub fn video_url(&self, path: &Path) -> ReelResult<String> {
        let canonical = path.canonicalize()?;
        let rel = canonical
            .strip_prefix(self.videos_dir())
            .map_err(|_| ReelError::PathEscape(path.to_path_buf()))?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(format!("/video/{}", parts.join("/")))
    }

    /// Keeps the `keep_last_n` newest final videos plus anything in `protect` or in flight,
    /// deletes the rest with their emptied parent directories, and purges partial-file trees.
    ///
    /// Individual deletion failures are logged and skipped.
    pub fn retain(&self, keep_last_n: usize, protect: &[PathBuf]) -> ReelResult<RetentionReport> {
        let videos = self.videos_dir();
        let mut report = RetentionReport::default();
        if !videos.exists() {
            return Ok(report);
        }

        let protected: HashSet<PathBuf> = protect
            .iter()
            .filter_map(|p| p.canonicalize().ok())
            .collect();

        let active = self.active_ids();
        let mut files = final_videos(&videos);
        files.sort_by(|a, b| b.1.cmp(&a.1));

        for (index, (path, _)) in files.into_iter().enumerate() {
            let is_protected = path
                .canonicalize()
                .map(|p| protected.contains(&p))
                .unwrap_or(false);
            if index < keep_last_n || is_protected || touches_any(&path, &active) {
                report.kept += 1;
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "deleted old render");
                    report
                        .removed_dirs
                        .extend(remove_empty_parents(&path, &videos));
                    report.removed_files.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "could not delete render"),
            }
        }

        for dir in partial_dirs(&videos) {
            if touches_any(&dir, &active) {
                continue;
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(path = %dir.display(), "cleaned up partial files");
                    report.purged_partials.push(dir);
                }
                Err(e) => warn!(path = %dir.display(), error = %e, "could not delete partial directory"),
            }
        }

        Ok(report)
    }
}

fn touches_any(path: &Path, ids: &HashSet<String>) -> bool {
    let text = path.to_string_lossy();
    ids.iter().any(|id| text.contains(id.as_str()))
}

fn is_partial_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == PARTIAL_DIR_NAME
}

/// Final `.mp4` files under `videos` with their modification times, skipping partial trees.
fn final_videos(videos: &Path) -> Vec<(PathBuf, SystemTime)> {
    WalkDir::new(videos)
        .into_iter()
        .filter_entry(|e| !is_partial_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == VIDEO_EXTENSION)
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.into_path(), modified))
        })
        .collect()
}

fn partial_dirs(videos: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(videos).into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        if is_partial_dir(&entry) {
            walker.skip_current_dir();
            found.push(entry.into_path());
        }
    }
    found
}

fn remove_empty_parents(file: &Path, videos: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let mut current = file.parent();
    for _ in 0..MAX_EMPTY_PARENT_LEVELS {
        let Some(dir) = current else { break };
        if dir == videos || !dir.starts_with(videos) || !is_empty_dir(dir) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        debug!(path = %dir.display(), "removed empty directory");
        removed.push(dir.to_path_buf());
        current = dir.parent();
    }
    removed
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
