//! Tag-based audio plugin.
//!
//! Uses `lofty` rather than `mutagenx`/ID3-only access, so the catalog can
//! hold tagged MP3/FLAC/OGG/M4A files uniformly instead of hard-coding
//! ID3v2. Grounded on `Libfs/plugins/id3.py`.

use std::collections::HashMap;
use std::path::Path;

use libfs_core::View;

use crate::error::Result;

use super::MetadataPlugin;

/// The fixed set of tag fields `lofty::Tag` exposes through typed
/// accessors — the Rust analogue of `id3.py::get_valid_keys`'s filtered
/// `EasyID3.valid_keys` (which drops any key containing `:`, `*` or a
/// space; lofty's accessor set has no such noise, so the filter is a
/// documented no-op rather than a dropped feature).
const VALID_KEYS: &[&str] = &[
    "title",
    "artist",
    "album",
    "album_artist",
    "genre",
    "year",
    "track_number",
    "track_total",
    "disc_number",
    "disc_total",
];

pub struct AudioPlugin;

impl MetadataPlugin for AudioPlugin {
    fn valid_keys(&self) -> Vec<String> {
        VALID_KEYS.iter().map(|s| s.to_string()).collect()
    }

    fn default_view(&self) -> View {
        View::new(
            vec![
                "genre".to_string(),
                "artist".to_string(),
                "year".to_string(),
                "album".to_string(),
            ],
            "%{track_number} -- %{title}.mp3",
        )
    }

    #[cfg(feature = "scanner")]
    fn read_metadata(&self, path: &Path) -> Result<HashMap<String, String>> {
        use lofty::prelude::*;
        use lofty::probe::Probe;

        let tagged_file = Probe::open(path)
            .map_err(|e| crate::error::StorageError::Plugin(e.to_string()))?
            .read()
            .map_err(|e| crate::error::StorageError::Plugin(e.to_string()))?;
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

        let mut out = HashMap::new();
        if let Some(tag) = tag {
            insert_opt(&mut out, "title", tag.title().map(|s| s.to_string()));
            insert_opt(&mut out, "artist", tag.artist().map(|s| s.to_string()));
            insert_opt(&mut out, "album", tag.album().map(|s| s.to_string()));
            insert_opt(&mut out, "genre", tag.genre().map(|s| s.to_string()));
            insert_opt(&mut out, "year", tag.year().map(|y| y.to_string()));
            insert_opt(
                &mut out,
                "track_number",
                tag.track().map(|t| t.to_string()),
            );
            insert_opt(
                &mut out,
                "track_total",
                tag.track_total().map(|t| t.to_string()),
            );
            insert_opt(&mut out, "disc_number", tag.disk().map(|d| d.to_string()));
            insert_opt(
                &mut out,
                "disc_total",
                tag.disk_total().map(|d| d.to_string()),
            );
            if let Some(album_artist) = tag
                .get_string(&lofty::tag::ItemKey::AlbumArtist)
                .map(|s| s.to_string())
            {
                out.insert("album_artist".to_string(), album_artist);
            }
        }
        Ok(out)
    }

    #[cfg(not(feature = "scanner"))]
    fn read_metadata(&self, _path: &Path) -> Result<HashMap<String, String>> {
        Err(crate::error::StorageError::Plugin(
            "scanner feature not enabled".into(),
        ))
    }

    #[cfg(feature = "scanner")]
    fn write_metadata(&self, path: &Path, metadata: &HashMap<String, String>) -> Result<()> {
        use lofty::prelude::*;
        use lofty::probe::Probe;

        let mut tagged_file = Probe::open(path)
            .map_err(|e| crate::error::StorageError::Plugin(e.to_string()))?
            .read()
            .map_err(|e| crate::error::StorageError::Plugin(e.to_string()))?;
        let tag = match tagged_file.primary_tag_mut() {
            Some(tag) => tag,
            None => {
                let tag_type = tagged_file.primary_tag_type();
                tagged_file.insert_tag(lofty::tag::Tag::new(tag_type));
                tagged_file.primary_tag_mut().expect("tag just inserted")
            }
        };

        if let Some(v) = metadata.get("title") {
            tag.set_title(v.clone());
        }
        if let Some(v) = metadata.get("artist") {
            tag.set_artist(v.clone());
        }
        if let Some(v) = metadata.get("album") {
            tag.set_album(v.clone());
        }
        if let Some(v) = metadata.get("genre") {
            tag.set_genre(v.clone());
        }
        if let Some(v) = metadata.get("year") {
            if let Ok(year) = v.parse::<u32>() {
                tag.set_year(year);
            }
        }
        if let Some(v) = metadata.get("track_number") {
            if let Ok(n) = v.parse::<u32>() {
                tag.set_track(n);
            }
        }

        tagged_file
            .save_to_path(path, lofty::config::WriteOptions::default())
            .map_err(|e| crate::error::StorageError::Plugin(e.to_string()))?;
        Ok(())
    }

    #[cfg(not(feature = "scanner"))]
    fn write_metadata(&self, _path: &Path, _metadata: &HashMap<String, String>) -> Result<()> {
        Err(crate::error::StorageError::Plugin(
            "scanner feature not enabled".into(),
        ))
    }

    fn is_valid_metadata(&self, key: &str, value: &str) -> bool {
        if !VALID_KEYS.contains(&key) {
            return false;
        }
        match key {
            // id3.py vetoes tracknumber against a closed GENRES table; lofty
            // files carry no such fixed vocabulary, so only non-emptiness
            // is checked here.
            "genre" => !value.is_empty(),
            "track_number" | "track_total" | "disc_number" | "disc_total" => {
                value.parse::<u32>().is_ok()
            }
            "year" => value.parse::<i32>().is_ok(),
            _ => true,
        }
    }

    fn name(&self) -> &'static str {
        "audio"
    }
}

fn insert_opt(out: &mut HashMap<String, String>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        out.insert(key.to_string(), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_view_matches_expected_shape() {
        let plugin = AudioPlugin;
        let view = plugin.default_view();
        assert_eq!(view.dirtree, vec!["genre", "artist", "year", "album"]);
        assert_eq!(view.fn_gen, "%{track_number} -- %{title}.mp3");
    }

    #[test]
    fn is_valid_metadata_rejects_non_numeric_track() {
        let plugin = AudioPlugin;
        assert!(!plugin.is_valid_metadata("track_number", "not-a-number"));
        assert!(plugin.is_valid_metadata("track_number", "7"));
    }

    #[test]
    fn is_valid_metadata_rejects_unknown_key() {
        let plugin = AudioPlugin;
        assert!(!plugin.is_valid_metadata("not_a_real_key", "anything"));
    }
}
