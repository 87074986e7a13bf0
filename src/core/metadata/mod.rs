//! # Metadata Module
//!
//! Capture time and dimensions from EXIF, with sidecar JSON and filesystem
//! time as fallbacks.
//!
//! ## Capture time precedence
//! 1. EXIF `DateTimeOriginal` (then `DateTime`)
//! 2. Sidecar `photoTakenTime`, then `creationTime`
//! 3. Filesystem modification time
//!
//! The source of the chosen time is kept on the record so the grouper can
//! decide whether a filesystem time is trustworthy enough for bursts.

pub mod sidecar;

pub use sidecar::{find_sidecar, read_sidecar, SidecarMetadata};

use crate::core::record::{Resolution, SourceStamp, TimestampSource};
use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// EXIF fields the pipeline uses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifSummary {
    pub date_taken: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ExifSummary {
    pub fn resolution(&self) -> Option<Resolution> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Resolution::new(w, h)),
            _ => None,
        }
    }
}

/// Read EXIF from a file. Missing or unreadable EXIF yields an empty summary.
pub fn read_exif(path: &Path) -> ExifSummary {
    let mut summary = ExifSummary::default();

    let Ok(file) = File::open(path) else {
        return summary;
    };
    let mut reader = BufReader::new(&file);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(_) => return summary,
    };

    summary.date_taken = [Tag::DateTimeOriginal, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
        .find_map(|field| parse_exif_datetime(&field.value));

    summary.width = exif
        .get_field(Tag::PixelXDimension, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::ImageWidth, In::PRIMARY))
        .and_then(|f| get_u32_value(&f.value));
    summary.height = exif
        .get_field(Tag::PixelYDimension, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::ImageLength, In::PRIMARY))
        .and_then(|f| get_u32_value(&f.value));

    summary
}

/// EXIF dates are `YYYY:MM:DD HH:MM:SS` with no zone; they are kept as UTC
fn parse_exif_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let Value::Ascii(ref parts) = value else {
        return None;
    };
    let text = std::str::from_utf8(parts.first()?).ok()?;
    let naive =
        NaiveDateTime::parse_from_str(text.trim_end_matches('\0').trim(), "%Y:%m:%d %H:%M:%S")
            .ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn get_u32_value(value: &Value) -> Option<u32> {
    match value {
        Value::Long(vec) => vec.first().copied(),
        Value::Short(vec) => vec.first().map(|v| *v as u32),
        _ => None,
    }
}

/// Pick the best available capture time
pub fn resolve_capture_time(
    exif: Option<DateTime<Utc>>,
    sidecar: Option<&SidecarMetadata>,
    stamp: &SourceStamp,
) -> Option<(DateTime<Utc>, TimestampSource)> {
    if let Some(at) = exif {
        return Some((at, TimestampSource::Exif));
    }
    if let Some(at) = sidecar.and_then(SidecarMetadata::capture_time) {
        return Some((at, TimestampSource::Sidecar));
    }
    stamp
        .modified_at()
        .map(|at| (at, TimestampSource::Filesystem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp() -> SourceStamp {
        SourceStamp {
            size: 1,
            modified_secs: 1_700_000_000,
            modified_nanos: 0,
        }
    }

    #[test]
    fn exif_beats_sidecar_and_filesystem() {
        let exif = Utc.with_ymd_and_hms(2020, 5, 1, 12, 0, 0).unwrap();
        let sidecar = SidecarMetadata {
            photo_taken: Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()),
            created: None,
        };

        let (at, source) = resolve_capture_time(Some(exif), Some(&sidecar), &stamp()).unwrap();
        assert_eq!(at, exif);
        assert_eq!(source, TimestampSource::Exif);
    }

    #[test]
    fn sidecar_beats_filesystem() {
        let taken = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let sidecar = SidecarMetadata {
            photo_taken: None,
            created: Some(taken),
        };

        let (at, source) = resolve_capture_time(None, Some(&sidecar), &stamp()).unwrap();
        assert_eq!(at, taken);
        assert_eq!(source, TimestampSource::Sidecar);
    }

    #[test]
    fn filesystem_time_is_last_resort() {
        let (at, source) = resolve_capture_time(None, None, &stamp()).unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
        assert_eq!(source, TimestampSource::Filesystem);
    }

    #[test]
    fn exif_datetime_parses() {
        let value = Value::Ascii(vec![b"2021:07:04 09:30:15".to_vec()]);
        let parsed = parse_exif_datetime(&value).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2021, 7, 4, 9, 30, 15).unwrap());
    }

    #[test]
    fn missing_file_has_no_exif() {
        let summary = read_exif(Path::new("/nonexistent/file.jpg"));
        assert_eq!(summary, ExifSummary::default());
        assert!(summary.resolution().is_none());
    }
}
