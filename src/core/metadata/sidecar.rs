//! JSON sidecars written next to media files by archive exports.
//!
//! Recognized names for `dir/name.ext`:
//! - `name.ext.json`
//! - `name.ext.supplemental-metadata.json`
//! - `stem.ext(N).json` when the media file is `stem(N).ext`

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Capture times found in a sidecar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarMetadata {
    pub photo_taken: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

impl SidecarMetadata {
    /// Best capture time: photo-taken, then creation
    pub fn capture_time(&self) -> Option<DateTime<Utc>> {
        self.photo_taken.or(self.created)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSidecar {
    #[serde(default)]
    photo_taken_time: Option<RawTime>,
    #[serde(default)]
    creation_time: Option<RawTime>,
}

#[derive(Deserialize)]
struct RawTime {
    #[serde(default)]
    timestamp: Option<RawTimestamp>,
}

/// Exports write the epoch seconds as a string; accept numbers too
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Number(i64),
}

impl RawTime {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let seconds = match self.timestamp.as_ref()? {
            RawTimestamp::Text(text) => text.trim().parse::<i64>().ok()?,
            RawTimestamp::Number(n) => *n,
        };
        DateTime::from_timestamp(seconds, 0)
    }
}

fn numbered_name() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?P<stem>.+)\((?P<n>\d+)\)\.(?P<ext>[^.]+)$").ok())
        .as_ref()
}

/// Candidate sidecar paths for a media file, most specific first
pub fn candidates(media: &Path) -> Vec<PathBuf> {
    let Some(name) = media.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let dir = media.parent().unwrap_or(Path::new(""));

    let mut paths = vec![
        dir.join(format!("{}.json", name)),
        dir.join(format!("{}.supplemental-metadata.json", name)),
    ];

    if let Some(captures) = numbered_name().and_then(|re| re.captures(name)) {
        paths.push(dir.join(format!(
            "{}.{}({}).json",
            &captures["stem"], &captures["ext"], &captures["n"]
        )));
    }

    paths
}

/// First existing sidecar for a media file
pub fn find_sidecar(media: &Path) -> Option<PathBuf> {
    candidates(media).into_iter().find(|p| p.is_file())
}

/// Parse a sidecar. Unreadable or malformed files yield `None`.
pub fn read_sidecar(path: &Path) -> Option<SidecarMetadata> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), "sidecar unreadable: {}", e);
            return None;
        }
    };

    let raw: RawSidecar = match serde_json::from_str(&text) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(path = %path.display(), "sidecar ignored: {}", e);
            return None;
        }
    };

    Some(SidecarMetadata {
        photo_taken: raw.photo_taken_time.as_ref().and_then(RawTime::to_datetime),
        created: raw.creation_time.as_ref().and_then(RawTime::to_datetime),
    })
}
