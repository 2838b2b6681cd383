//! Track identity to local media file index.
//!
//! Built from djay's media-locations collection, whose blobs carry a
//! `file:///` URI next to the usual artist/title pairs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::blob_decoder::decode_location;
use crate::config::PathStyle;
use crate::media_library_db::MediaLibrarySource;
use crate::protocol::TrackIdentity;

const FILE_URI_PREFIX: &str = "file:///";

/// Converts a library `file:///` URI into a filesystem path.
///
/// Percent-escapes are decoded first. Invalid UTF-8 after decoding is
/// replaced rather than rejected.
pub fn file_uri_to_path(uri: &str, style: PathStyle) -> PathBuf {
    let decoded = String::from_utf8_lossy(&urlencoding::decode_binary(uri.as_bytes())).into_owned();
    let without_scheme = decoded.strip_prefix(FILE_URI_PREFIX);

    match style.resolve() {
        PathStyle::Windows => {
            let raw = without_scheme.unwrap_or(decoded.as_str());
            PathBuf::from(raw.replace('/', "\\"))
        }
        _ => match without_scheme {
            Some(rest) => PathBuf::from(format!("/{rest}")),
            None => PathBuf::from(decoded),
        },
    }
}

/// In-memory `TrackIdentity -> path` map.
#[derive(Debug, Clone)]
pub struct PathIndex {
    collection: String,
    path_style: PathStyle,
    entries: HashMap<TrackIdentity, PathBuf>,
}

impl PathIndex {
    pub fn new(collection: impl Into<String>, path_style: PathStyle) -> Self {
        Self {
            collection: collection.into(),
            path_style,
            entries: HashMap::new(),
        }
    }

    /// Rebuilds the index from scratch and returns the number of entries.
    ///
    /// When the library cannot be read the previous entries stay in place and
    /// 0 is returned.
    pub fn build(&mut self, source: &dyn MediaLibrarySource) -> usize {
        let payloads = match source.payloads_in_collection(&self.collection) {
            Ok(payloads) => payloads,
            Err(err) => {
                warn!("Path index build failed: {}", err);
                return 0;
            }
        };

        let mut entries = HashMap::with_capacity(payloads.len());
        for payload in &payloads {
            let Some(located) = decode_location(payload) else {
                continue;
            };
            let identity = TrackIdentity::new(&located.artist, &located.title);
            entries.insert(identity, file_uri_to_path(&located.file_uri, self.path_style));
        }

        debug!(
            "Path index built: {} entries from {} rows",
            entries.len(),
            payloads.len()
        );
        self.entries = entries;
        self.entries.len()
    }

    pub fn lookup(&self, identity: &TrackIdentity) -> Option<&Path> {
        self.entries.get(identity).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
