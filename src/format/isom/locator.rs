//! Source locators: selector suffix parsing, locality and fingerprinting.
//!
//! A locator is `<path-or-url>[#selector]` where the selector is one of
//! `audio`, `video`, `text`, `trackID=<n>`, `ID=<n>` or a bare `<n>`.

use super::container::{ByteRange, MediaType};
use crate::utils::Crc32Mpeg2;
use url::Url;

const LOCAL_SCHEMES: [&str; 3] = ["file", "gmem", "isobmff"];

/// Which tracks of the container get a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSelection {
    All,
    /// Only the first track of this media type.
    FirstOfType(MediaType),
    /// Only the track with this ID.
    TrackId(u32),
}

/// A locator split into the path used to open the container and its selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLocator {
    pub open_url: String,
    pub selection: TrackSelection,
}

/// Parses the selector of `locator`, falling back to `display_url` when the
/// locator carries none.
///
/// The selector is only stripped from the returned path when it was found on
/// `locator` itself.
pub fn parse_locator(locator: &str, display_url: Option<&str>) -> ParsedLocator {
    if let Some(pos) = selector_start(locator) {
        return ParsedLocator {
            open_url: locator[..pos].to_string(),
            selection: parse_selector(&locator[pos + 1..]),
        };
    }

    let selection = display_url
        .and_then(|url| selector_start(url).map(|pos| parse_selector(&url[pos + 1..])))
        .unwrap_or(TrackSelection::All);

    ParsedLocator {
        open_url: locator.to_string(),
        selection,
    }
}

// The selector must follow the extension: a '#' before the last '.' is part of the path.
fn selector_start(locator: &str) -> Option<usize> {
    let dot = locator.rfind('.')?;
    locator[dot..].find('#').map(|pos| dot + pos)
}

fn parse_selector(selector: &str) -> TrackSelection {
    let lower = selector.to_ascii_lowercase();
    if lower.starts_with("audio") {
        TrackSelection::FirstOfType(MediaType::Audio)
    } else if lower.starts_with("video") {
        TrackSelection::FirstOfType(MediaType::Visual)
    } else if lower.starts_with("text") {
        TrackSelection::FirstOfType(MediaType::Text)
    } else if lower.starts_with("trackid=") {
        track_id_selection(&selector[8..])
    } else if lower.starts_with("id=") {
        track_id_selection(&selector[3..])
    } else {
        track_id_selection(selector)
    }
}

fn track_id_selection(digits: &str) -> TrackSelection {
    match leading_uint(digits) {
        0 => TrackSelection::All,
        id => TrackSelection::TrackId(id),
    }
}

fn leading_uint(s: &str) -> u32 {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

/// Returns true for locators the reader can open directly from storage.
///
/// Locators without `://` are local paths. Any other locator is local only
/// when its scheme is `file`, `gmem` or `isobmff`, so a path that embeds
/// `://` anywhere (`/data/clip.mp4?src=http://host`) counts as remote.
pub fn is_local(locator: &str) -> bool {
    if !locator.contains("://") {
        return true;
    }
    match Url::parse(locator) {
        Ok(url) => LOCAL_SCHEMES.contains(&url.scheme()),
        Err(_) => LOCAL_SCHEMES.iter().any(|scheme| {
            let prefix = format!("{}://", scheme);
            locator
                .as_bytes()
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
        }),
    }
}

/// Outcome of comparing a locator against the stored identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    Unchanged,
    Changed,
}

/// Fingerprint of the current source: checksum of the locator plus byte range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceIdentity {
    fingerprint: u32,
    range: ByteRange,
}

impl SourceIdentity {
    pub fn new(locator: &str, range: ByteRange) -> Self {
        Self {
            fingerprint: fingerprint(locator),
            range,
        }
    }

    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Stores the new identity and reports whether it differs from the old one.
    pub fn update(&mut self, locator: &str, range: ByteRange) -> IdentityChange {
        let next = SourceIdentity::new(locator, range);
        if next == *self {
            return IdentityChange::Unchanged;
        }
        *self = next;
        IdentityChange::Changed
    }
}

pub fn fingerprint(locator: &str) -> u32 {
    Crc32Mpeg2::checksum(locator.as_bytes())
}
