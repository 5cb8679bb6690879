//! Playlist model: master playlists, media playlists and their fragments.
//!
//! Parsing is strictly line oriented. A stream-info (`#EXT-X-STREAM-INF`)
//! or fragment-info (`#EXTINF`) tag is paired with the next non-blank line,
//! which carries the URL. Relative URLs are resolved against the URL of the
//! playlist being parsed.
//!
//! Media playlists are append-only: re-parsing a refreshed live playlist
//! only adds fragments whose sequence number is past the last one held.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use super::cast::{attr_name, cast_value, Attributes, Value};
use super::error::{HlsError, Result};

const MANIFEST_MARKER: &str = "#EXTM3U";
const STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const FRAGMENT_INF: &str = "#EXTINF:";
const ENDLIST: &str = "#EXT-X-ENDLIST";
const EXT_TAG: &str = "#EXT-X-";

/// Top-level manifest listing the available renditions.
#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    pub name: String,
    pub url: Url,
    /// Renditions in manifest order. Replaced wholesale on every parse.
    pub variants: Vec<MediaPlaylist>,
    pub attributes: Attributes,
    /// Set when the master URL answered with an HTTP error or could not be
    /// reached at all. Never cleared.
    pub bad_url: bool,
}

impl MasterPlaylist {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            variants: Vec::new(),
            attributes: Attributes::new(),
            bad_url: false,
        }
    }

    pub fn parse(&mut self, manifest: &str) -> Result<()> {
        let lines = manifest_lines(manifest)?;
        self.variants.clear();

        for (i, line) in lines.iter().enumerate() {
            if let Some(value) = line.strip_prefix(STREAM_INF) {
                let attributes = match cast_value(value) {
                    Value::Map(map) => Attributes::from(map),
                    _ => Attributes::new(),
                };
                let Some(name) = next_uri_line(&lines, i) else {
                    warn!(line = i + 1, "Stream info without a variant URL");
                    continue;
                };
                match self.url.join(name) {
                    Ok(url) => self
                        .variants
                        .push(MediaPlaylist::with_attributes(name, url, attributes)),
                    Err(e) => warn!("Skipping variant {name}: {e}"),
                }
            } else if line.starts_with(EXT_TAG) {
                let (key, value) = split_tag(line);
                self.attributes.set(key, value);
            }
        }

        debug!(
            url = %self.url,
            variants = self.variants.len(),
            "Parsed master playlist"
        );
        Ok(())
    }
}

/// One rendition: an ordered window of fragments.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub name: String,
    url: Arc<Url>,
    fragments: Vec<MediaFragment>,
    endlist: bool,
    pub attributes: Attributes,
}

impl MediaPlaylist {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self::with_attributes(name, url, Attributes::new())
    }

    pub fn with_attributes(name: impl Into<String>, url: Url, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            url: Arc::new(url),
            fragments: Vec::new(),
            endlist: false,
            attributes,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn fragments(&self) -> &[MediaFragment] {
        &self.fragments
    }

    /// `true` once an `#EXT-X-ENDLIST` has been seen (VOD).
    pub fn endlist(&self) -> bool {
        self.endlist
    }

    pub fn is_live(&self) -> bool {
        !self.endlist
    }

    /// Parse (or re-parse, for a live refresh) the playlist body.
    ///
    /// Fragments already held are never added twice: a fragment is appended
    /// only when its sequence number exceeds [`Self::last_sequence`].
    ///
    /// An attribute tag sitting between `#EXTINF` and its URL line makes
    /// that fragment be skipped; its sequence number is still consumed.
    pub fn parse(&mut self, manifest: &str) -> Result<()> {
        let lines = manifest_lines(manifest)?;
        let mut sequence: Option<i64> = None;
        let mut added = 0usize;

        for (i, line) in lines.iter().enumerate() {
            if let Some(value) = line.strip_prefix(FRAGMENT_INF) {
                let seq = *sequence.get_or_insert_with(|| {
                    self.attributes.media_sequence().unwrap_or(1)
                });
                sequence = Some(seq + 1);

                let Some(name) = next_line(&lines, i) else {
                    continue;
                };
                if name.starts_with('#') || seq <= self.last_sequence() {
                    continue;
                }

                let duration = cast_value(value)
                    .first()
                    .as_f64()
                    .or_else(|| self.attributes.target_duration())
                    .unwrap_or_default();

                match self.url.join(name) {
                    Ok(url) => {
                        self.fragments.push(MediaFragment {
                            name: name.to_string(),
                            url,
                            duration,
                            media_sequence: seq,
                            playlist_url: Arc::clone(&self.url),
                            content_length: None,
                        });
                        added += 1;
                    }
                    Err(e) => warn!("Skipping fragment {name}: {e}"),
                }
            } else if line.starts_with(ENDLIST) {
                self.endlist = true;
                break;
            } else if line.starts_with(EXT_TAG) {
                let (key, value) = split_tag(line);
                self.attributes.set(key, value);
            }
        }

        debug!(
            url = %self.url,
            added,
            first = self.first_sequence(),
            last = self.last_sequence(),
            endlist = self.endlist,
            "Parsed media playlist"
        );
        Ok(())
    }

    /// Sequence number of the first held fragment, `-1` when empty.
    pub fn first_sequence(&self) -> i64 {
        self.fragments.first().map_or(-1, |f| f.media_sequence)
    }

    /// Sequence number of the last held fragment, `-1` when empty.
    pub fn last_sequence(&self) -> i64 {
        self.fragments.last().map_or(-1, |f| f.media_sequence)
    }

    /// Look up the fragment with sequence number `seq`.
    ///
    /// The slot is computed as `seq - first_sequence()` clamped into the held
    /// window; if that slot holds a different sequence number (a gap, or
    /// `seq` outside the window) the lookup fails with
    /// [`HlsError::MissedFragment`].
    pub fn fragment(&self, seq: i64) -> Result<&MediaFragment> {
        let idx = self.fragment_index(seq)?;
        Ok(&self.fragments[idx])
    }

    /// Store the byte length the server reported for fragment `seq`
    /// (`None` when every download attempt failed).
    pub fn record_download(
        &mut self,
        seq: i64,
        content_length: Option<u64>,
    ) -> Result<&MediaFragment> {
        let idx = self.fragment_index(seq)?;
        let fragment = &mut self.fragments[idx];
        fragment.content_length = content_length;
        Ok(fragment)
    }

    fn fragment_index(&self, seq: i64) -> Result<usize> {
        let Some(last_idx) = self.fragments.len().checked_sub(1) else {
            return Err(HlsError::MissedFragment {
                wanted: seq,
                found: None,
            });
        };

        let idx = usize::try_from(seq - self.first_sequence())
            .unwrap_or(0)
            .min(last_idx);
        let found = self.fragments[idx].media_sequence;

        if found == seq {
            Ok(idx)
        } else {
            Err(HlsError::MissedFragment {
                wanted: seq,
                found: Some(found),
            })
        }
    }
}

/// One downloadable media segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFragment {
    pub name: String,
    pub url: Url,
    /// Declared playback duration in seconds.
    pub duration: f64,
    pub media_sequence: i64,
    /// URL of the owning playlist. Shared with the playlist, read-only.
    playlist_url: Arc<Url>,
    /// Byte length reported by the server, once downloaded.
    pub content_length: Option<u64>,
}

impl MediaFragment {
    pub fn playlist_url(&self) -> &Url {
        &self.playlist_url
    }
}

/// Split the body into lines and check the format marker.
fn manifest_lines(manifest: &str) -> Result<Vec<&str>> {
    let lines: Vec<&str> = manifest
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .collect();

    let first = lines
        .first()
        .map_or("", |l| l.trim_start_matches('\u{feff}'));
    if !first.starts_with(MANIFEST_MARKER) {
        return Err(HlsError::MalformedManifest {
            first_line: first.chars().take(64).collect(),
        });
    }
    Ok(lines)
}

/// Next non-blank line after `i`, trimmed.
fn next_line<'a>(lines: &[&'a str], i: usize) -> Option<&'a str> {
    lines[i + 1..]
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
}

/// Next non-blank line after `i`, provided it is a URI and not a tag.
fn next_uri_line<'a>(lines: &[&'a str], i: usize) -> Option<&'a str> {
    next_line(lines, i).filter(|l| !l.starts_with('#'))
}

/// `#EXT-X-TAG:value` → (`tag`, cast value); bare `#EXT-X-TAG` → flag.
fn split_tag(line: &str) -> (String, Value) {
    match line.split_once(':') {
        Some((key, value)) => (attr_name(key), cast_value(value)),
        None => (attr_name(line), Value::Flag),
    }
}
