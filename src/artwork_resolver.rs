//! Resolves a detected track to its local file and publishes its cover.
//!
//! The path index is rebuilt at most once per resolution: djay often records
//! a play for a file it imported after our index was built, and one rebuild
//! catches that without letting a missing file stall the tick.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::cover_art::CoverArtReader;
use crate::media_library_db::MediaLibrarySource;
use crate::path_index::PathIndex;
use crate::protocol::TrackIdentity;

pub struct ArtworkResolver {
    source: Arc<dyn MediaLibrarySource>,
    index: PathIndex,
    reader: Option<Box<dyn CoverArtReader>>,
    cover_path: PathBuf,
}

impl ArtworkResolver {
    /// `reader = None` disables artwork entirely; `resolve` then never touches media files.
    pub fn new(
        source: Arc<dyn MediaLibrarySource>,
        index: PathIndex,
        reader: Option<Box<dyn CoverArtReader>>,
        cover_path: PathBuf,
    ) -> Self {
        Self {
            source,
            index,
            reader,
            cover_path,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    pub fn cover_path(&self) -> &Path {
        &self.cover_path
    }

    /// Rebuilds the path index, returning its new size.
    pub fn rebuild_index(&mut self) -> usize {
        self.index.build(self.source.as_ref())
    }

    fn existing_path(&self, identity: &TrackIdentity) -> Option<PathBuf> {
        self.index
            .lookup(identity)
            .filter(|path| path.exists())
            .map(Path::to_path_buf)
    }

    fn locate(&mut self, identity: &TrackIdentity) -> Option<PathBuf> {
        if let Some(path) = self.existing_path(identity) {
            return Some(path);
        }
        debug!(
            "No local file for {} - {} among {} indexed paths; rebuilding",
            identity.artist(),
            identity.title(),
            self.index.len()
        );
        self.rebuild_index();
        self.existing_path(identity)
    }

    /// Extracts the cover for `identity` into the cover file.
    ///
    /// Returns `true` only when fresh image bytes were written.
    pub fn resolve(&mut self, identity: &TrackIdentity) -> bool {
        if self.reader.is_none() {
            return false;
        }
        let Some(media_path) = self.locate(identity) else {
            return false;
        };
        let Some(reader) = self.reader.as_ref() else {
            return false;
        };
        let Some(image) = reader.read_cover(&media_path) else {
            debug!("No embedded cover in {}", media_path.display());
            return false;
        };

        match write_cover_atomic(&self.cover_path, &image) {
            Ok(()) => true,
            Err(err) => {
                warn!("{}", err);
                false
            }
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    fs::create_dir_all(parent)
        .map_err(|err| format!("failed to create cover dir {}: {}", parent.display(), err))
}

/// Replaces `target` so concurrent readers see either the old or the new image.
pub fn write_cover_atomic(target: &Path, bytes: &[u8]) -> Result<(), String> {
    ensure_parent_dir(target)?;
    let temp_path = target.with_extension("tmp");
    fs::write(&temp_path, bytes)
        .map_err(|err| format!("failed to write cover {}: {}", temp_path.display(), err))?;
    fs::rename(&temp_path, target).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        format!("failed to replace cover {}: {}", target.display(), err)
    })
}
