//! Filesystem abstraction: the one seam both the build
//! monitor (workdir cleanup, atomic publish) and the orchestrator (playlist
//! polling, sweeper) go through, so tests never touch the real disk unless
//! they explicitly choose [`RealFs`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One entry returned by [`Fs::read_dir_entries`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait Fs: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn file_size(&self, path: &Path) -> Option<u64>;
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
    async fn read_dir_entries(&self, path: &Path) -> std::io::Result<Vec<DirEntryInfo>>;
    async fn dir_modified(&self, path: &Path) -> std::io::Result<DateTime<Utc>>;
}

/// Real filesystem, backed by `tokio::fs`.
#[derive(Default)]
pub struct RealFs;

fn system_time_to_utc(t: std::time::SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

#[async_trait]
impl Fs for RealFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn file_size(&self, path: &Path) -> Option<u64> {
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await
    }

    async fn read_dir_entries(&self, path: &Path) -> std::io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            let modified = metadata.modified().map(system_time_to_utc).unwrap_or_else(|_| Utc::now());
            entries.push(DirEntryInfo { name: entry.file_name().to_string_lossy().into_owned(), modified });
        }
        Ok(entries)
    }

    async fn dir_modified(&self, path: &Path) -> std::io::Result<DateTime<Utc>> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(metadata.modified().map(system_time_to_utc).unwrap_or_else(|_| Utc::now()))
    }
}

#[derive(Default)]
struct MockFsState {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashMap<PathBuf, DateTime<Utc>>,
}

/// In-memory filesystem for build-monitor and sweeper unit tests: deterministic,
/// no real I/O, and directory mtimes are explicitly controllable via
/// [`MockFs::set_dir_modified`] rather than racing the real clock.
#[derive(Default)]
pub struct MockFs {
    state: Mutex<MockFsState>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_ancestor_dirs(state: &mut MockFsState, path: &Path, now: DateTime<Utc>) {
        let mut ancestor = path.to_path_buf();
        while let Some(parent) = ancestor.parent() {
            if parent.as_os_str().is_empty() {
                break;
            }
            state.dirs.entry(parent.to_path_buf()).or_insert(now);
            ancestor = parent.to_path_buf();
        }
    }

    pub fn set_dir_modified(&self, path: &Path, modified: DateTime<Utc>) {
        let mut state = self.state.lock().expect("mock fs mutex poisoned");
        state.dirs.insert(path.to_path_buf(), modified);
    }

    pub fn session_dir_exists(&self, path: &Path) -> bool {
        let state = self.state.lock().expect("mock fs mutex poisoned");
        state.dirs.contains_key(path) || state.files.keys().any(|f| f.starts_with(path))
    }
}

#[async_trait]
impl Fs for MockFs {
    async fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().expect("mock fs mutex poisoned");
        state.files.contains_key(path) || state.dirs.contains_key(path)
    }

    async fn file_size(&self, path: &Path) -> Option<u64> {
        let state = self.state.lock().expect("mock fs mutex poisoned");
        state.files.get(path).map(|v| v.len() as u64)
    }

    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        let state = self.state.lock().expect("mock fs mutex poisoned");
        let bytes = state
            .files
            .get(path)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "mock fs: no such file"))?;
        String::from_utf8(bytes.clone())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("mock fs mutex poisoned");
        let now = Utc::now();
        Self::ensure_ancestor_dirs(&mut state, path, now);
        state.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("mock fs mutex poisoned");
        let now = Utc::now();
        state.dirs.entry(path.to_path_buf()).or_insert(now);
        Self::ensure_ancestor_dirs(&mut state, path, now);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("mock fs mutex poisoned");
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("mock fs mutex poisoned");
        let bytes = state
            .files
            .remove(from)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "mock fs: rename source missing"))?;
        let now = Utc::now();
        Self::ensure_ancestor_dirs(&mut state, to, now);
        state.files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    async fn read_dir_entries(&self, path: &Path) -> std::io::Result<Vec<DirEntryInfo>> {
        let state = self.state.lock().expect("mock fs mutex poisoned");
        let mut seen = std::collections::BTreeMap::new();
        for (dir, modified) in &state.dirs {
            if dir.parent() == Some(path) {
                if let Some(name) = dir.file_name() {
                    seen.insert(name.to_string_lossy().into_owned(), *modified);
                }
            }
        }
        Ok(seen.into_iter().map(|(name, modified)| DirEntryInfo { name, modified }).collect())
    }

    async fn dir_modified(&self, path: &Path) -> std::io::Result<DateTime<Utc>> {
        let state = self.state.lock().expect("mock fs mutex poisoned");
        state
            .dirs
            .get(path)
            .copied()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "mock fs: no such directory"))
    }
}
