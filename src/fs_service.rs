// src/fs_service.rs

//! File System Service (§4.2): primitive batch I/O on top of a [`PathGuard`].
//!
//! Every call resolves its paths through the guard first, so no caller of
//! this module can escape the configured root. Writes are atomic
//! (temp-file + rename); multi-file atomicity across files is the
//! Transaction Manager's job, not this layer's.

use crate::error::{Error, Result};
use crate::path_guard::PathGuard;
use globset::{Glob, GlobSetBuilder};
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebouncedEventKind};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap on how large a file may be before `readMany` reports it as
/// `SizeExceeded` instead of returning its content.
pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Outcome of reading a single path (§3 `ReadResult`).
#[derive(Debug, Clone)]
pub enum ReadResult {
    Text(String),
    /// Content is not valid UTF-8; a placeholder is substituted.
    Binary,
    Error(String),
}

/// Metadata snapshot of a single path.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub is_dir: bool,
    pub is_file: bool,
    pub size: u64,
    pub mtime: std::time::SystemTime,
    #[cfg(unix)]
    pub mode: u32,
}

/// Options controlling glob expansion (§6 "Glob patterns").
///
/// Matches are always files (`nodir`), and `node_modules/**` and `.git/**`
/// are always excluded regardless of `exclude`.
#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    /// Additional `!`-negated patterns excluded from the match set.
    pub exclude: Vec<String>,
}

/// Patterns excluded by `glob` on every call, independent of `GlobOptions`.
const DEFAULT_IGNORED_GLOBS: &[&str] = &["node_modules/**", ".git/**"];

/// A callback invoked on a debounced filesystem change under a watched path.
pub type WatchCallback = Box<dyn Fn(PathBuf) + Send + Sync>;

/// Primitive batch file I/O (§4.2).
pub struct FileSystemService {
    guard: PathGuard,
    max_read_bytes: u64,
}

impl FileSystemService {
    pub fn new(guard: PathGuard) -> Self {
        Self { guard, max_read_bytes: DEFAULT_MAX_READ_BYTES }
    }

    pub fn with_max_read_bytes(mut self, max: u64) -> Self {
        self.max_read_bytes = max;
        self
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Read a batch of paths, never failing the whole call for one bad path.
    pub fn read_many(&self, paths: &[String]) -> HashMap<String, ReadResult> {
        paths
            .iter()
            .map(|p| (p.clone(), self.read_one(p)))
            .collect()
    }

    fn read_one(&self, path: &str) -> ReadResult {
        let resolved = match self.guard.resolve(path) {
            Ok(p) => p,
            Err(e) => return ReadResult::Error(e.to_string()),
        };
        let meta = match fs::metadata(&resolved) {
            Ok(m) => m,
            Err(e) => return ReadResult::Error(e.to_string()),
        };
        if meta.len() > self.max_read_bytes {
            return ReadResult::Error(
                Error::SizeExceeded { path: resolved, size: meta.len(), limit: self.max_read_bytes }
                    .to_string(),
            );
        }
        let bytes = match fs::read(&resolved) {
            Ok(b) => b,
            Err(e) => return ReadResult::Error(e.to_string()),
        };
        match String::from_utf8(bytes) {
            Ok(text) => ReadResult::Text(text),
            Err(_) => ReadResult::Binary,
        }
    }

    /// Atomically write every path in `files`. Each write lands via a
    /// sibling temp file + rename; a failed temp-write unlinks every temp
    /// file created so far in this call and returns the first error.
    /// Already-renamed targets from earlier in the batch are not undone —
    /// cross-file atomicity is the Transaction Manager's responsibility.
    pub fn write_many(&self, files: &[(String, Vec<u8>)]) -> Result<()> {
        let mut temps: Vec<(PathBuf, PathBuf)> = Vec::new();
        for (path, bytes) in files {
            match self.write_one(path, bytes) {
                Ok((temp, target)) => temps.push((temp, target)),
                Err(e) => {
                    for (temp, _) in &temps {
                        let _ = fs::remove_file(temp);
                    }
                    return Err(e);
                }
            }
        }
        for (temp, target) in temps {
            fs::rename(&temp, &target).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Write one path to a temp sibling; returns `(temp_path, target_path)`
    /// without renaming, so the caller can stage a batch before committing.
    fn write_one(&self, path: &str, bytes: &[u8]) -> Result<(PathBuf, PathBuf)> {
        let target = self.guard.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_name = format!(".{file_name}.{:x}.tmp", uuid::Uuid::new_v4().as_u128() as u64);
        let temp_path = target.parent().unwrap_or(Path::new(".")).join(temp_name);
        let mut file = fs::File::create(&temp_path).map_err(Error::Io)?;
        file.write_all(bytes).map_err(Error::Io)?;
        file.sync_all().map_err(Error::Io)?;
        Ok((temp_path, target))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.guard.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn check_files_exist(&self, paths: &[String]) -> HashMap<String, bool> {
        paths.iter().map(|p| (p.clone(), self.exists(p))).collect()
    }

    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let resolved = self.guard.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(Error::Io)?;
        Ok(FileStat {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            size: meta.len(),
            mtime: meta.modified().map_err(Error::Io)?,
            #[cfg(unix)]
            mode: {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode()
            },
        })
    }

    pub fn delete_many(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            let resolved = self.guard.resolve(path)?;
            match fs::metadata(&resolved) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&resolved).map_err(Error::Io)?,
                Ok(_) => fs::remove_file(&resolved).map_err(Error::Io)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    pub fn mkdirp(&self, path: &str) -> Result<()> {
        let resolved = self.guard.resolve(path)?;
        fs::create_dir_all(resolved).map_err(Error::Io)
    }

    pub fn rmdir_empty(&self, path: &str) -> Result<()> {
        let resolved = self.guard.resolve(path)?;
        fs::remove_dir(resolved).map_err(Error::Io)
    }

    /// Copy a file, preserving nothing but bytes; creates missing parents.
    pub fn copy(&self, from: &str, to: &str) -> Result<u64> {
        let from = self.guard.resolve(from)?;
        let to = self.guard.resolve(to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        fs::copy(&from, &to).map_err(Error::Io)
    }

    /// Move/rename a file, falling back to copy+fsync+delete on `EXDEV`
    /// (cross-filesystem rename, e.g. a transaction snapshot directory on a
    /// different mount than the working tree).
    pub fn mv(&self, from: &str, to: &str) -> Result<()> {
        let from = self.guard.resolve(from)?;
        let to = self.guard.resolve(to)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        match fs::rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
                fs::copy(&from, &to).map_err(Error::Io)?;
                let f = fs::File::open(&to).map_err(Error::Io)?;
                f.sync_all().map_err(Error::Io)?;
                fs::remove_file(&from).map_err(Error::Io)?;
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Expand glob patterns (supports `**`, `{a,b}` alternation, `!`
    /// negation) against the guard's root, returning root-relative paths.
    pub fn glob(&self, patterns: &[String], opts: &GlobOptions) -> Result<Vec<String>> {
        let mut include_builder = GlobSetBuilder::new();
        let mut negate_builder = GlobSetBuilder::new();
        let mut has_include = false;
        for pattern in patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                negate_builder.add(
                    Glob::new(negated)
                        .map_err(|e| Error::RegexInvalid { pattern: pattern.clone(), reason: e.to_string() })?,
                );
            } else {
                include_builder.add(
                    Glob::new(pattern)
                        .map_err(|e| Error::RegexInvalid { pattern: pattern.clone(), reason: e.to_string() })?,
                );
                has_include = true;
            }
        }
        for pattern in &opts.exclude {
            negate_builder.add(
                Glob::new(pattern)
                    .map_err(|e| Error::RegexInvalid { pattern: pattern.clone(), reason: e.to_string() })?,
            );
        }
        for pattern in DEFAULT_IGNORED_GLOBS {
            negate_builder.add(Glob::new(pattern).map_err(|e| Error::Internal(e.to_string()))?);
        }
        if !has_include {
            return Ok(Vec::new());
        }
        let includes = include_builder.build().map_err(|e| Error::Internal(e.to_string()))?;
        let negates = negate_builder.build().map_err(|e| Error::Internal(e.to_string()))?;

        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(self.guard.root())
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(self.guard.root()) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            if includes.is_match(relative) && !negates.is_match(relative) {
                matches.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Watch `path` for debounced change events, invoking `callback` with
    /// the changed path. Returns the debouncer; dropping it stops watching.
    pub fn watch(
        &self,
        path: &str,
        callback: WatchCallback,
    ) -> Result<notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>> {
        let resolved = self.guard.resolve(path)?;
        let mut debouncer = new_debouncer(Duration::from_millis(200), move |res: notify_debouncer_mini::DebounceEventResult| {
            if let Ok(events) = res {
                for event in events {
                    if matches!(event.kind, DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous) {
                        callback(event.path);
                    }
                }
            }
        })
        .map_err(|e| Error::Internal(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&resolved, RecursiveMode::Recursive)
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(debouncer)
    }
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux; stable across the platforms this crate targets.
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    -1
}
