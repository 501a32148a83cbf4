//! On-disk resumability markers.
//!
//! Each completed window leaves its raw reply in `window_{begin}_{end}.xml`
//! inside the checkpoint directory. On restart a window whose exact range is
//! on disk is skipped. Files whose range overlaps the window but differs
//! (left behind by a run with another budget) are stale and deleted before
//! the window is reprocessed.
//!
//! Writes go to `*.xml.tmp` first and are renamed into place, so an
//! interrupted run never leaves a half-written marker behind.

use crate::error::InciseError;
use crate::pipeline::group::PageRange;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static RE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^window_(\d+)_(\d+)\.xml$").unwrap());

/// Parse a marker file name back into its range.
pub fn parse_marker(name: &str) -> Option<PageRange> {
    let caps = RE_MARKER.captures(name)?;
    let begin = caps[1].parse().ok()?;
    let end = caps[2].parse().ok()?;
    (begin <= end).then(|| PageRange::new(begin, end))
}

pub fn marker_name(range: PageRange) -> String {
    format!("window_{}_{}.xml", range.begin, range.end)
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (and create if needed) a checkpoint directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, InciseError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| InciseError::CheckpointWrite {
                path: dir.clone(),
                source: e,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, range: PageRange) -> PathBuf {
        self.dir.join(marker_name(range))
    }

    /// All ranges currently on disk, sorted.
    pub async fn scan(&self) -> Result<Vec<PageRange>, InciseError> {
        let read_err = |e| InciseError::CheckpointRead {
            path: self.dir.clone(),
            source: e,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(read_err)?;
        let mut ranges = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            if let Some(range) = entry.file_name().to_str().and_then(parse_marker) {
                ranges.push(range);
            }
        }
        ranges.sort();
        Ok(ranges)
    }

    /// Stored reply for exactly `range`, if any.
    pub async fn lookup(&self, range: PageRange) -> Result<Option<String>, InciseError> {
        let path = self.path_for(range);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(InciseError::CheckpointRead { path, source: e }),
        }
    }

    /// Delete markers that overlap `range` without matching it exactly.
    pub async fn invalidate_overlapping(
        &self,
        range: PageRange,
    ) -> Result<Vec<PageRange>, InciseError> {
        let mut removed = Vec::new();
        for stale in self.scan().await? {
            if stale == range || !stale.overlaps(&range) {
                continue;
            }
            let path = self.path_for(stale);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(InciseError::CheckpointWrite { path, source: e }),
            }
            debug!("Removed stale checkpoint {} (overlaps {})", stale, range);
            removed.push(stale);
        }
        if !removed.is_empty() {
            info!(
                "Invalidated {} stale checkpoint(s) overlapping window {}",
                removed.len(),
                range
            );
        }
        Ok(removed)
    }

    /// Persist a reply atomically: write a temp file, then rename.
    pub async fn save(&self, range: PageRange, content: &str) -> Result<(), InciseError> {
        let path = self.path_for(range);
        let tmp_path = path.with_extension("xml.tmp");
        let write_err = |e| InciseError::CheckpointWrite {
            path: path.clone(),
            source: e,
        };
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}
