use std::time::Duration;

use mockito::{Matcher, Server};
use pmospotify::LibrespotClient;
use serde_json::json;

fn client_for(server: &Server) -> LibrespotClient {
    LibrespotClient::new(&server.url(), Duration::from_secs(2))
}

fn status_body() -> String {
    json!({
        "device_id": "dev1",
        "device_name": "Kitchen",
        "stopped": false,
        "paused": true,
        "volume": 40,
        "track": {
            "uri": "spotify:track:abc",
            "name": "Song",
            "artist_names": [{"name": "A"}, "B", {"name": ""}],
            "album_name": "Album",
            "album_cover_url": "https://i.scdn.co/image/xyz",
            "duration": 180000,
            "position": 1000,
            "release_date": "year:2020"
        }
    })
    .to_string()
}

#[test]
fn test_get_status_parses_response() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(status_body())
        .create();

    let client = client_for(&server);
    let status = client.get_status().unwrap();

    mock.assert();
    assert!(status.active);
    assert!(!status.track.is_playing);
    assert_eq!(status.track.volume, 40);
    assert_eq!(status.track.artist, "A, B");
    assert_eq!(status.track.release_date, "2020-01-01");
    assert!(client.is_available());
}

#[test]
fn test_http_error_yields_none() {
    let mut server = Server::new();
    server.mock("GET", "/status").with_status(500).create();

    let client = client_for(&server);
    assert!(client.get_status().is_none());
    assert!(!client.is_available());
}

#[test]
fn test_invalid_json_yields_none() {
    let mut server = Server::new();
    server
        .mock("GET", "/status")
        .with_status(200)
        .with_body("{not json")
        .create();

    assert!(client_for(&server).get_status().is_none());
}

#[test]
fn test_cached_status_avoids_second_request() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/status")
        .with_status(200)
        .with_body(status_body())
        .expect(1)
        .create();

    let client = client_for(&server);
    let first = client.get_cached_status(Duration::from_secs(60)).unwrap();
    let second = client.get_cached_status(Duration::from_secs(60)).unwrap();

    mock.assert();
    assert_eq!(first, second);
}

#[test]
fn test_stale_cache_refetches() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/status")
        .with_status(200)
        .with_body(status_body())
        .expect(2)
        .create();

    let client = client_for(&server);
    client.get_status().unwrap();
    client.get_cached_status(Duration::ZERO).unwrap();

    mock.assert();
}

#[test]
fn test_cache_survives_failed_fetch_only_when_fresh() {
    let mut server = Server::new();
    server
        .mock("GET", "/status")
        .with_status(200)
        .with_body(status_body())
        .expect(1)
        .create();

    let client = client_for(&server);
    client.get_status().unwrap();
    server.reset();
    server.mock("GET", "/status").with_status(503).create();

    assert!(client.get_cached_status(Duration::from_secs(60)).is_some());
    assert!(client.get_cached_status(Duration::ZERO).is_none());
}

#[test]
fn test_simple_controls() {
    let mut server = Server::new();
    let paths = [
        "/player/resume",
        "/player/pause",
        "/player/playpause",
        "/player/next",
        "/player/prev",
    ];
    let mocks: Vec<_> = paths
        .iter()
        .map(|path| server.mock("POST", *path).with_status(200).create())
        .collect();

    let client = client_for(&server);
    assert!(client.resume());
    assert!(client.pause());
    assert!(client.play_pause());
    assert!(client.next_track());
    assert!(client.previous_track());

    for mock in mocks {
        mock.assert();
    }
}

#[test]
fn test_volume_is_clamped() {
    let mut server = Server::new();
    let high = server
        .mock("POST", "/player/volume")
        .match_body(Matcher::Json(json!({"volume": 100})))
        .with_status(200)
        .expect(2)
        .create();
    let low = server
        .mock("POST", "/player/volume")
        .match_body(Matcher::Json(json!({"volume": 0})))
        .with_status(200)
        .expect(2)
        .create();

    let client = client_for(&server);
    assert!(client.set_volume(150));
    assert!(client.set_volume(100));
    assert!(client.set_volume(-10));
    assert!(client.set_volume(0));

    high.assert();
    low.assert();
}

#[test]
fn test_seek_and_shuffle_bodies() {
    let mut server = Server::new();
    let seek = server
        .mock("POST", "/player/seek")
        .match_body(Matcher::Json(json!({"position": 42000})))
        .with_status(200)
        .create();
    let shuffle = server
        .mock("POST", "/player/shuffle_context")
        .match_body(Matcher::Json(json!({"shuffle_context": true})))
        .with_status(200)
        .create();

    let client = client_for(&server);
    assert!(client.seek(42000));
    assert!(client.set_shuffle(true));

    seek.assert();
    shuffle.assert();
}

#[test]
fn test_repeat_context_sets_both_flags() {
    let mut server = Server::new();
    let track_off = server
        .mock("POST", "/player/repeat_track")
        .match_body(Matcher::Json(json!({"repeat_track": false})))
        .with_status(200)
        .create();
    let context_on = server
        .mock("POST", "/player/repeat_context")
        .match_body(Matcher::Json(json!({"repeat_context": true})))
        .with_status(200)
        .create();

    assert!(client_for(&server).set_repeat("context"));

    track_off.assert();
    context_on.assert();
}

#[test]
fn test_repeat_fails_if_one_request_fails() {
    let mut server = Server::new();
    server
        .mock("POST", "/player/repeat_context")
        .with_status(200)
        .create();
    server
        .mock("POST", "/player/repeat_track")
        .with_status(500)
        .create();

    assert!(!client_for(&server).set_repeat("off"));
}

#[test]
fn test_invalid_repeat_sends_nothing() {
    let mut server = Server::new();
    let any = server.mock("POST", Matcher::Any).expect(0).create();

    assert!(!client_for(&server).set_repeat("invalid"));

    any.assert();
}

#[test]
fn test_play_uri_with_skip() {
    let mut server = Server::new();
    let with_skip = server
        .mock("POST", "/player/play")
        .match_body(Matcher::Json(json!({
            "uri": "spotify:album:1",
            "skip_to_uri": "spotify:track:2"
        })))
        .with_status(200)
        .create();
    let plain = server
        .mock("POST", "/player/play")
        .match_body(Matcher::Json(json!({"uri": "spotify:track:3"})))
        .with_status(200)
        .create();

    let client = client_for(&server);
    assert!(client.play_uri("spotify:album:1", Some("spotify:track:2")));
    assert!(client.play_uri("spotify:track:3", None));

    with_skip.assert();
    plain.assert();
}

#[test]
fn test_add_to_queue() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/player/add_to_queue")
        .match_body(Matcher::Json(json!({"uri": "spotify:track:9"})))
        .with_status(200)
        .create();

    assert!(client_for(&server).add_to_queue("spotify:track:9"));
    mock.assert();
}

#[test]
fn test_get_queue() {
    let mut server = Server::new();
    server
        .mock("GET", "/queue")
        .with_status(200)
        .with_body(json!({"tracks": [{"uri": "a"}, {"uri": "b"}]}).to_string())
        .create();

    let queue = client_for(&server).get_queue().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[1]["uri"], "b");
}

#[test]
fn test_get_queue_without_tracks_field() {
    let mut server = Server::new();
    server.mock("GET", "/queue").with_status(200).with_body("{}").create();

    assert_eq!(client_for(&server).get_queue(), Some(Vec::new()));
}

#[test]
fn test_get_queue_unavailable() {
    let mut server = Server::new();
    server.mock("GET", "/queue").with_status(404).create();

    assert_eq!(client_for(&server).get_queue(), None);
}
