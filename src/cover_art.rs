//! Embedded cover-art reader backed by `lofty`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::{TaggedFile, TaggedFileExt};
use lofty::picture::Picture;
use lofty::probe::Probe;
use log::debug;

/// Source of embedded artwork for a local media file.
pub trait CoverArtReader: Send {
    /// Returns the raw image bytes embedded in `path`, if any.
    fn read_cover(&self, path: &Path) -> Option<Vec<u8>>;
}

/// Reads ID3 `APIC`, FLAC/Vorbis `PICTURE`, MP4 `covr` and friends.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyCoverArtReader;

fn cover_options(parsing_mode: ParsingMode) -> ParseOptions {
    ParseOptions::new()
        .read_properties(false)
        .read_cover_art(true)
        .parsing_mode(parsing_mode)
}

/// Trusts the file extension and parses strictly enough to catch broken tags.
fn tags_by_extension(path: &Path) -> Result<TaggedFile, String> {
    Probe::open(path)
        .map_err(|err| format!("unrecognized extension: {err}"))?
        .options(cover_options(ParsingMode::BestAttempt))
        .read()
        .map_err(|err| format!("tag parse failed: {err}"))
}

/// Sniffs the container from its content; for files djay imported with a
/// misleading or missing extension.
fn tags_by_content(path: &Path) -> Result<TaggedFile, String> {
    let file = File::open(path).map_err(|err| format!("open failed: {err}"))?;
    Probe::new(BufReader::new(file))
        .options(cover_options(ParsingMode::Relaxed))
        .guess_file_type()
        .map_err(|err| format!("content sniff failed: {err}"))?
        .read()
        .map_err(|err| format!("relaxed tag parse failed: {err}"))
}

fn read_tagged_file(path: &Path) -> Option<TaggedFile> {
    let by_extension_err = match tags_by_extension(path) {
        Ok(tagged_file) => return Some(tagged_file),
        Err(err) => err,
    };
    match tags_by_content(path) {
        Ok(tagged_file) => Some(tagged_file),
        Err(by_content_err) => {
            debug!(
                "No readable tags in {} ({}; {})",
                path.display(),
                by_extension_err,
                by_content_err
            );
            None
        }
    }
}

/// Picks the first candidate declaring an `image/` MIME type, else the first one.
fn select_cover<'a>(candidates: &[(Option<&str>, &'a [u8])]) -> Option<&'a [u8]> {
    candidates
        .iter()
        .find(|(mime, _)| matches!(mime, Some(mime) if mime.starts_with("image/")))
        .or_else(|| candidates.first())
        .map(|(_, data)| *data)
}

impl CoverArtReader for LoftyCoverArtReader {
    fn read_cover(&self, path: &Path) -> Option<Vec<u8>> {
        let tagged_file = read_tagged_file(path)?;
        let primary_tag = tagged_file.primary_tag();
        let candidates: Vec<(Option<&str>, &[u8])> = primary_tag
            .into_iter()
            .chain(tagged_file.tags().iter())
            .flat_map(|tag| tag.pictures().iter())
            .filter(|picture: &&Picture| !picture.data().is_empty())
            .map(|picture: &Picture| {
                (
                    picture.mime_type().map(|mime| mime.as_str()),
                    picture.data(),
                )
            })
            .collect();

        select_cover(&candidates).map(<[u8]>::to_vec)
    }
}
