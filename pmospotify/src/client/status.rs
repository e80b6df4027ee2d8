//! Modèle de l'état du lecteur et décodage de la réponse `/status`.
//!
//! Le format JSON est celui de go-librespot, partiellement documenté :
//! tout champ absent prend une valeur par défaut plutôt que de faire
//! échouer le décodage.

use serde::Serialize;
use serde_json::Value;

const DEFAULT_VOLUME: i64 = 50;
const DEFAULT_VOLUME_STEPS: i64 = 64;

/// Morceau courant et état de lecture.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackMetadata {
    pub uri: String,
    pub name: String,
    /// Artistes séparés par `", "`.
    pub artist: String,
    pub album: String,
    pub artwork_url: String,
    pub duration_ms: i64,
    pub progress_ms: i64,
    pub is_playing: bool,
    /// 0 à 100.
    pub volume: i64,
    pub shuffle: bool,
    pub repeat_context: bool,
    pub repeat_track: bool,
    /// `YYYY-MM-DD` quand l'année est connue.
    pub release_date: String,
    pub track_number: i64,
    pub disc_number: i64,
}

/// Une réponse `/status` décodée.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub active: bool,
    pub track: TrackMetadata,
    pub device_id: String,
    pub device_name: String,
    pub username: String,
    pub device_type: String,
    pub play_origin: String,
    pub buffering: bool,
    pub volume_steps: i64,
}

impl PlayerStatus {
    pub fn from_json(data: &Value) -> Self {
        let mut track = match data.get("track") {
            Some(track) if track.as_object().is_some_and(|t| !t.is_empty()) => {
                TrackMetadata::from_json(track)
            }
            _ => TrackMetadata::default(),
        };

        // Champs de lecture portés par la racine du document
        track.is_playing = data.get("paused").and_then(Value::as_bool) == Some(false);
        track.volume = int_field(data, "volume").unwrap_or(DEFAULT_VOLUME);
        track.shuffle = bool_field(data, "shuffle_context");
        track.repeat_context = bool_field(data, "repeat_context");
        track.repeat_track = bool_field(data, "repeat_track");

        Self {
            active: data.get("stopped").and_then(Value::as_bool) == Some(false),
            track,
            device_id: str_field(data, "device_id"),
            device_name: str_field(data, "device_name"),
            username: str_field(data, "username"),
            device_type: str_field(data, "device_type"),
            play_origin: str_field(data, "play_origin"),
            buffering: bool_field(data, "buffering"),
            volume_steps: int_field(data, "volume_steps").unwrap_or(DEFAULT_VOLUME_STEPS),
        }
    }
}

impl TrackMetadata {
    fn from_json(track: &Value) -> Self {
        let mut artwork_url = str_field(track, "album_cover_url");
        if artwork_url.is_empty() {
            if let Some(images) = track.get("images").and_then(Value::as_array) {
                artwork_url = best_image(images);
            }
        }

        Self {
            uri: str_field(track, "uri"),
            name: str_field(track, "name"),
            artist: track.get("artist_names").map(format_artists).unwrap_or_default(),
            album: str_field(track, "album_name"),
            artwork_url,
            duration_ms: int_field(track, "duration").unwrap_or(0),
            progress_ms: int_field(track, "position").unwrap_or(0),
            release_date: normalize_release_date(&str_field(track, "release_date")),
            track_number: int_field(track, "track_number").unwrap_or(0),
            disc_number: int_field(track, "disc_number").unwrap_or(0),
            ..Self::default()
        }
    }
}

/// Convertit `"year:2010 month:4 day:12"` en `"2010-04-12"`.
///
/// Mois et jour valent 1 s'ils sont absents. Sans année, ou si une valeur
/// n'est pas un entier, la chaîne est rendue telle quelle.
pub fn normalize_release_date(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut year = 0u32;
    let mut month = 1u32;
    let mut day = 1u32;
    for token in raw.split_whitespace() {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let Ok(value) = value.parse::<u32>() else {
            return raw.to_string();
        };
        match key {
            "year" => year = value,
            "month" => month = value,
            "day" => day = value,
            _ => {}
        }
    }

    if year == 0 {
        return raw.to_string();
    }
    format!("{year:04}-{month:02}-{day:02}")
}

/// Joint les noms d'artistes non vides par `", "`.
///
/// Les éléments peuvent être des chaînes ou des objets `{"name": ...}`.
pub fn format_artists(artists: &Value) -> String {
    match artists {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.as_str()),
                Value::Object(record) => record.get("name").and_then(Value::as_str),
                _ => None,
            })
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(name) => name.clone(),
        _ => String::new(),
    }
}

/// URL de l'image de plus grande surface, ou chaîne vide.
pub fn best_image(images: &[Value]) -> String {
    images
        .iter()
        .max_by_key(|image| {
            let width = int_field(image, "width").unwrap_or(0);
            let height = int_field(image, "height").unwrap_or(0);
            width.saturating_mul(height)
        })
        .map(|image| str_field(image, "url"))
        .unwrap_or_default()
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn int_field(data: &Value, key: &str) -> Option<i64> {
    let value = data.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_release_date() {
        assert_eq!(normalize_release_date("year:2010 month:4 day:12"), "2010-04-12");
        assert_eq!(normalize_release_date("year:2020"), "2020-01-01");
        assert_eq!(normalize_release_date("month:3 year:1999"), "1999-03-01");
        assert_eq!(normalize_release_date(""), "");
        assert_eq!(normalize_release_date("garbage"), "garbage");
        assert_eq!(normalize_release_date("year:abc"), "year:abc");
        assert_eq!(normalize_release_date("month:4 day:2"), "month:4 day:2");
    }

    #[test]
    fn test_format_artists() {
        assert_eq!(format_artists(&json!([{"name": "A"}, "B", {"name": ""}])), "A, B");
        assert_eq!(format_artists(&json!(["Solo"])), "Solo");
        assert_eq!(format_artists(&json!([])), "");
        assert_eq!(format_artists(&json!(null)), "");
        assert_eq!(format_artists(&json!([{"id": 3}, 42, "C"])), "C");
    }

    #[test]
    fn test_best_image() {
        let images = json!([
            {"url": "small", "width": 64, "height": 64},
            {"url": "large", "width": 640, "height": 640},
            {"url": "medium", "width": 300, "height": 300},
        ]);
        assert_eq!(best_image(images.as_array().unwrap()), "large");
        assert_eq!(best_image(&[]), "");
    }

    #[test]
    fn test_parse_full_status() {
        let data = json!({
            "username": "alice",
            "device_id": "abc123",
            "device_type": "speaker",
            "device_name": "Kitchen",
            "play_origin": "go-librespot",
            "stopped": false,
            "paused": false,
            "buffering": true,
            "volume": 72,
            "volume_steps": 100,
            "repeat_context": true,
            "repeat_track": false,
            "shuffle_context": true,
            "track": {
                "uri": "spotify:track:1",
                "name": "Song",
                "artist_names": ["A", "B"],
                "album_name": "Album",
                "album_cover_url": "https://i.scdn.co/image/1",
                "position": 12345,
                "duration": 200000,
                "release_date": "year:2010 month:4 day:12",
                "track_number": 3,
                "disc_number": 1
            }
        });

        let status = PlayerStatus::from_json(&data);

        assert!(status.active);
        assert_eq!(status.username, "alice");
        assert_eq!(status.device_id, "abc123");
        assert_eq!(status.device_name, "Kitchen");
        assert!(status.buffering);
        assert_eq!(status.volume_steps, 100);

        let track = &status.track;
        assert!(track.is_playing);
        assert_eq!(track.volume, 72);
        assert!(track.shuffle);
        assert!(track.repeat_context);
        assert!(!track.repeat_track);
        assert_eq!(track.uri, "spotify:track:1");
        assert_eq!(track.artist, "A, B");
        assert_eq!(track.album, "Album");
        assert_eq!(track.artwork_url, "https://i.scdn.co/image/1");
        assert_eq!(track.progress_ms, 12345);
        assert_eq!(track.duration_ms, 200000);
        assert_eq!(track.release_date, "2010-04-12");
        assert_eq!(track.track_number, 3);
        assert_eq!(track.disc_number, 1);
    }

    #[test]
    fn test_parse_empty_status_defaults() {
        let status = PlayerStatus::from_json(&json!({}));

        assert!(!status.active);
        assert!(!status.track.is_playing);
        assert_eq!(status.track.volume, 50);
        assert_eq!(status.volume_steps, 64);
        assert_eq!(status.track.uri, "");
        assert_eq!(status.track.duration_ms, 0);
    }

    #[test]
    fn test_flags_only_false_counts() {
        // "stopped"/"paused" doivent valoir exactement false
        let status = PlayerStatus::from_json(&json!({"stopped": null, "paused": 0}));
        assert!(!status.active);
        assert!(!status.track.is_playing);
    }

    #[test]
    fn test_artwork_falls_back_to_images() {
        let data = json!({
            "track": {
                "uri": "spotify:track:2",
                "images": [
                    {"url": "a", "width": 10, "height": 10},
                    {"url": "b", "width": 20, "height": 20}
                ]
            }
        });
        assert_eq!(PlayerStatus::from_json(&data).track.artwork_url, "b");
    }
}
