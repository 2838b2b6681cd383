//! Heuristic field recovery from djay's opaque record blobs.
//!
//! The blobs interleave length-prefixed strings with binary framing. Rather
//! than parse the framing, the decoder scans for runs of printable bytes and
//! relies on one positional convention: each value token sits immediately
//! before its key label. When a key label appears more than once, the last
//! occurrence wins.

use std::collections::HashMap;

use crate::protocol::{DecodedTrack, UNKNOWN_FIELD};

pub const KEY_ARTIST: &str = "artist";
pub const KEY_TITLE: &str = "title";
pub const KEY_ORIGIN_SOURCE_ID: &str = "originSourceID";

/// Every key label the decoder is ever asked for.
pub const RECOGNIZED_KEYS: [&str; 3] = [KEY_ARTIST, KEY_TITLE, KEY_ORIGIN_SOURCE_ID];

const FILE_URI_PREFIX: &str = "file:///";

/// Byte class used to split a blob into tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCharset {
    /// Letters, digits, whitespace and `_ . - ( ) & ' , [ ] ! ?`.
    Metadata,
    /// [`TokenCharset::Metadata`] plus `\ / : % +` so file URIs survive intact.
    Location,
}

impl TokenCharset {
    fn admits(self, byte: u8) -> bool {
        let metadata = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b' ' | b'\t'
                    | b'\n'
                    | b'\r'
                    | 0x0b
                    | 0x0c
                    | b'_'
                    | b'.'
                    | b'-'
                    | b'('
                    | b')'
                    | b'&'
                    | b'\''
                    | b','
                    | b'['
                    | b']'
                    | b'!'
                    | b'?'
            );
        match self {
            Self::Metadata => metadata,
            Self::Location => metadata || matches!(byte, b'\\' | b'/' | b':' | b'%' | b'+'),
        }
    }
}

/// A row from the media-locations collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTrack {
    pub artist: String,
    pub title: String,
    pub file_uri: String,
}

/// Splits `payload` into trimmed printable tokens longer than one character.
pub fn extract_tokens(payload: &[u8], charset: TokenCharset) -> Vec<String> {
    payload
        .split(|byte| !charset.admits(*byte))
        .filter(|run| !run.is_empty())
        .filter_map(|run| {
            let decoded = String::from_utf8_lossy(run);
            let token = decoded.trim();
            (token.chars().count() > 1).then(|| token.to_string())
        })
        .collect()
}

fn pair_values<'k>(tokens: &[String], keys: &[&'k str]) -> HashMap<&'k str, String> {
    let mut fields = HashMap::new();
    for (index, token) in tokens.iter().enumerate().skip(1) {
        if let Some(key) = keys.iter().find(|key| **key == token.as_str()) {
            fields.insert(*key, tokens[index - 1].clone());
        }
    }
    fields
}

/// Recovers the values of `keys` from `payload`.
///
/// Keys absent from the blob, or whose label is the very first token, are
/// missing from the result. An empty map means "not a record we understand".
pub fn decode_fields<'k>(
    payload: &[u8],
    keys: &[&'k str],
    charset: TokenCharset,
) -> HashMap<&'k str, String> {
    pair_values(&extract_tokens(payload, charset), keys)
}

/// Decodes a history-session blob. `None` when neither artist nor title was found.
pub fn decode_track(payload: &[u8]) -> Option<DecodedTrack> {
    let mut fields = decode_fields(payload, &RECOGNIZED_KEYS, TokenCharset::Metadata);
    let mut take = |key: &str| {
        fields
            .remove(key)
            .unwrap_or_else(|| UNKNOWN_FIELD.to_string())
    };
    let track = DecodedTrack {
        artist: take(KEY_ARTIST),
        title: take(KEY_TITLE),
        source_id: take(KEY_ORIGIN_SOURCE_ID),
    };

    if track.artist == UNKNOWN_FIELD && track.title == UNKNOWN_FIELD {
        return None;
    }
    Some(track)
}

/// Decodes a media-location blob. Requires artist, title and a `file:///` URI.
pub fn decode_location(payload: &[u8]) -> Option<LocatedTrack> {
    let tokens = extract_tokens(payload, TokenCharset::Location);
    let file_uri = tokens
        .iter()
        .rev()
        .find(|token| token.starts_with(FILE_URI_PREFIX))?
        .clone();
    let mut fields = pair_values(&tokens, &[KEY_ARTIST, KEY_TITLE]);

    Some(LocatedTrack {
        artist: fields.remove(KEY_ARTIST)?,
        title: fields.remove(KEY_TITLE)?,
        file_uri,
    })
}

/// Builds a blob the way djay frames its strings: a tag byte and a length
/// byte, both outside every charset, ahead of each string.
#[cfg(test)]
pub(crate) fn encode_fixture_blob(strings: &[&str]) -> Vec<u8> {
    let mut blob = vec![0x62, 0x70, 0x6c, 0x00, 0x00];
    for value in strings {
        blob.push(0x12);
        blob.push(0x80 | (value.len() as u8 & 0x7f));
        blob.extend_from_slice(value.as_bytes());
    }
    blob.push(0x00);
    blob
}

#[cfg(test)]
mod tests {
    use super::{
        decode_fields, decode_location, decode_track, encode_fixture_blob, extract_tokens,
        TokenCharset, KEY_ARTIST, KEY_TITLE,
    };

    #[test]
    fn test_extract_tokens_splits_on_framing_bytes() {
        let blob = encode_fixture_blob(&["Valid Artist", "artist", "Valid Title", "title"]);
        let tokens = extract_tokens(&blob, TokenCharset::Metadata);
        assert_eq!(
            tokens,
            vec!["bpl", "Valid Artist", "artist", "Valid Title", "title"]
        );
    }

    #[test]
    fn test_extract_tokens_drops_single_characters_and_trims() {
        let blob = b"\x00x\x01  padded  \x02ok\x03 \x04".to_vec();
        let tokens = extract_tokens(&blob, TokenCharset::Metadata);
        assert_eq!(tokens, vec!["padded", "ok"]);
    }

    #[test]
    fn test_decode_track_recovers_value_before_key() {
        let blob = encode_fixture_blob(&[
            "uuid-1234",
            "Valid Artist",
            "artist",
            "Valid Title",
            "title",
            "Spotify",
            "originSourceID",
        ]);
        let track = decode_track(&blob).expect("track should decode");
        assert_eq!(track.artist, "Valid Artist");
        assert_eq!(track.title, "Valid Title");
        assert_eq!(track.source_id, "Spotify");
    }

    #[test]
    fn test_decode_track_defaults_missing_fields_to_unknown() {
        let blob = encode_fixture_blob(&["Only Title", "title"]);
        let track = decode_track(&blob).expect("title alone is a signal");
        assert_eq!(track.artist, "Unknown");
        assert_eq!(track.source_id, "Unknown");
    }

    #[test]
    fn test_decode_track_without_keys_is_none() {
        let blob = encode_fixture_blob(&["some", "random", "strings"]);
        assert_eq!(decode_track(&blob), None);
        assert_eq!(decode_track(&[]), None);
        assert_eq!(decode_track(&[0xff, 0xfe, 0x00, 0x01]), None);
    }

    #[test]
    fn test_last_occurrence_of_a_key_wins() {
        let blob = encode_fixture_blob(&["First", "title", "Second", "title"]);
        let fields = decode_fields(&blob, &[KEY_TITLE], TokenCharset::Metadata);
        assert_eq!(fields.get(KEY_TITLE).map(String::as_str), Some("Second"));
    }

    #[test]
    fn test_key_as_first_token_has_no_value() {
        let blob = b"artist\x00Someone\x00".to_vec();
        let fields = decode_fields(&blob, &[KEY_ARTIST], TokenCharset::Metadata);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_metadata_charset_breaks_file_uris() {
        let blob = encode_fixture_blob(&["file:///C:/Music/a.mp3"]);
        let tokens = extract_tokens(&blob, TokenCharset::Metadata);
        assert!(tokens.iter().all(|token| !token.contains('/')));
    }

    #[test]
    fn test_decode_location_requires_all_three_fields() {
        let complete = encode_fixture_blob(&[
            "Some Artist",
            "artist",
            "Some Title",
            "title",
            "file:///Users/dj/Music/Some%20Title.mp3",
        ]);
        let located = decode_location(&complete).expect("location should decode");
        assert_eq!(located.artist, "Some Artist");
        assert_eq!(located.title, "Some Title");
        assert_eq!(located.file_uri, "file:///Users/dj/Music/Some%20Title.mp3");

        let missing_uri = encode_fixture_blob(&["Some Artist", "artist", "Some Title", "title"]);
        assert_eq!(decode_location(&missing_uri), None);

        let missing_artist = encode_fixture_blob(&["Some Title", "title", "file:///a/b.mp3"]);
        assert_eq!(decode_location(&missing_artist), None);
    }
}
