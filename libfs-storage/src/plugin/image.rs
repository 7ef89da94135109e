//! EXIF-based image plugin.
//!
//! Uses `little_exif`, a standalone EXIF reader/writer, since the plugin
//! needs both read and write access to the `DateTime` tag. Grounded on
//! `Libfs/plugins/exif.py`.

use std::collections::HashMap;
use std::path::Path;

use libfs_core::View;

use crate::error::{Result, StorageError};

const VIRT_TIME_KEYS: &[&str] = &["Year", "Month", "Day", "Hour", "Minute", "Second"];

pub struct ImagePlugin;

impl MetadataPlugin for ImagePlugin {
    fn valid_keys(&self) -> Vec<String> {
        let mut keys = vec!["Make".to_string(), "Model".to_string()];
        keys.extend(VIRT_TIME_KEYS.iter().map(|s| s.to_string()));
        keys
    }

    fn default_view(&self) -> View {
        View::new(
            vec![
                "Make".to_string(),
                "Model".to_string(),
                "Year".to_string(),
                "Month".to_string(),
                "Day".to_string(),
            ],
            "%{Hour}:%{Minute}:%{Second}.jpeg",
        )
    }

    #[cfg(feature = "exif")]
    fn read_metadata(&self, path: &Path) -> Result<HashMap<String, String>> {
        use little_exif::exif_tag::ExifTag;
        use little_exif::metadata::Metadata;

        let metadata = Metadata::new_from_path(path)
            .map_err(|e| StorageError::Plugin(e.to_string()))?;

        let mut out = HashMap::new();
        if let Some(ExifTag::Make(v)) = metadata.get_tag(&ExifTag::Make(String::new())).next() {
            out.insert("Make".to_string(), v.clone());
        }
        if let Some(ExifTag::Model(v)) = metadata.get_tag(&ExifTag::Model(String::new())).next() {
            out.insert("Model".to_string(), v.clone());
        }

        // Virtual time keys default to the epoch, then get overwritten by
        // whatever `DateTime` actually contains — mirrors `exif.py`'s
        // unconditional pre-seeding before parsing `DateTime`.
        out.insert("Year".to_string(), "1970".to_string());
        out.insert("Month".to_string(), "1".to_string());
        out.insert("Day".to_string(), "1".to_string());
        out.insert("Hour".to_string(), "0".to_string());
        out.insert("Minute".to_string(), "0".to_string());
        out.insert("Second".to_string(), "0".to_string());

        if let Some(ExifTag::DateTime(v)) =
            metadata.get_tag(&ExifTag::DateTime(String::new())).next()
        {
            if let Some((year, month, day, hour, minute, second)) = parse_exif_datetime(v) {
                out.insert("Year".to_string(), year.to_string());
                out.insert("Month".to_string(), month.to_string());
                out.insert("Day".to_string(), day.to_string());
                out.insert("Hour".to_string(), hour.to_string());
                out.insert("Minute".to_string(), minute.to_string());
                out.insert("Second".to_string(), second.to_string());
            }
        }
        Ok(out)
    }

    #[cfg(not(feature = "exif"))]
    fn read_metadata(&self, _path: &Path) -> Result<HashMap<String, String>> {
        Err(StorageError::Plugin("exif feature not enabled".into()))
    }

    #[cfg(feature = "exif")]
    fn write_metadata(&self, path: &Path, metadata: &HashMap<String, String>) -> Result<()> {
        use little_exif::exif_tag::ExifTag;
        use little_exif::metadata::Metadata;

        let mut exif = Metadata::new_from_path(path)
            .map_err(|e| StorageError::Plugin(e.to_string()))?;

        // Default to the source file's own ctime-derived calendar fields
        // for any virtual time key the caller omitted, exactly as
        // `exif.py::write_metadata`'s `given_time_kvs` fallback does.
        let ctime_fields = ctime_calendar_fields(path)?;
        let mut resolved = ctime_fields;
        for key in VIRT_TIME_KEYS {
            if let Some(v) = metadata.get(*key).and_then(|v| v.parse::<u32>().ok()) {
                match *key {
                    "Year" => resolved.0 = v,
                    "Month" => resolved.1 = v,
                    "Day" => resolved.2 = v,
                    "Hour" => resolved.3 = v,
                    "Minute" => resolved.4 = v,
                    "Second" => resolved.5 = v,
                    _ => unreachable!(),
                }
            }
        }
        let (year, month, day, hour, minute, second) = resolved;
        let date_time = format!("{year:04}:{month:02}:{day:02} {hour:02}:{minute:02}:{second:02}");
        exif.set_tag(ExifTag::DateTime(date_time));

        if let Some(make) = metadata.get("Make") {
            exif.set_tag(ExifTag::Make(make.clone()));
        }
        if let Some(model) = metadata.get("Model") {
            exif.set_tag(ExifTag::Model(model.clone()));
        }

        exif.write_to_file(path)
            .map_err(|e| StorageError::Plugin(e.to_string()))?;
        Ok(())
    }

    #[cfg(not(feature = "exif"))]
    fn write_metadata(&self, _path: &Path, _metadata: &HashMap<String, String>) -> Result<()> {
        Err(StorageError::Plugin("exif feature not enabled".into()))
    }

    fn is_valid_metadata(&self, key: &str, value: &str) -> bool {
        if !self.valid_keys().iter().any(|k| k == key) {
            return false;
        }
        if key == "Year" {
            return value.parse::<u32>().is_ok();
        }
        true
    }

    fn name(&self) -> &'static str {
        "image"
    }
}

use super::MetadataPlugin;

fn parse_exif_datetime(v: &str) -> Option<(u32, u32, u32, u32, u32, u32)> {
    // "YYYY:MM:DD HH:MM:SS"
    let (date, time) = v.split_once(' ')?;
    let mut date_parts = date.split(':');
    let year = date_parts.next()?.parse().ok()?;
    let month = date_parts.next()?.parse().ok()?;
    let day = date_parts.next()?.parse().ok()?;
    let mut time_parts = time.split(':');
    let hour = time_parts.next()?.parse().ok()?;
    let minute = time_parts.next()?.parse().ok()?;
    let second = time_parts.next()?.parse().ok()?;
    Some((year, month, day, hour, minute, second))
}

fn ctime_calendar_fields(path: &Path) -> Result<(u32, u32, u32, u32, u32, u32)> {
    use chrono::{DateTime, Datelike, Timelike, Utc};
    use std::time::UNIX_EPOCH;

    let meta = std::fs::metadata(path)?;
    let ctime = meta.created().or_else(|_| meta.modified())?;
    let secs = ctime
        .duration_since(UNIX_EPOCH)
        .map_err(|e| StorageError::Plugin(e.to_string()))?
        .as_secs() as i64;
    let dt: DateTime<Utc> = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StorageError::Plugin(format!("ctime {secs} out of range")))?;
    Ok((
        dt.year() as u32,
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_view_matches_expected_shape() {
        let plugin = ImagePlugin;
        let view = plugin.default_view();
        assert_eq!(view.dirtree, vec!["Make", "Model", "Year", "Month", "Day"]);
        assert_eq!(view.fn_gen, "%{Hour}:%{Minute}:%{Second}.jpeg");
    }

    #[test]
    fn parse_exif_datetime_splits_fields() {
        let parsed = parse_exif_datetime("2017:04:21 10:52:02").unwrap();
        assert_eq!(parsed, (2017, 4, 21, 10, 52, 2));
    }

    #[test]
    fn is_valid_metadata_requires_numeric_year() {
        let plugin = ImagePlugin;
        assert!(plugin.is_valid_metadata("Year", "2017"));
        assert!(!plugin.is_valid_metadata("Year", "not-a-year"));
    }
}
