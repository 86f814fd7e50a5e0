//! End-to-end tests for correlating camera emotions with the playing song

mod common;

use common::{eventually, TestClient, TestServer, VideoFeed, SPOTIFY_USER_ID, TRACK_A, TRACK_B};
use moodtrack_server::user::{
    SongEmotionRecord, SongEmotionStore, SpotifyToken, SpotifyTokenStore, UserStore,
};

fn user_id(server: &TestServer) -> usize {
    server
        .user_store
        .get_or_create_spotify_user(SPOTIFY_USER_ID, None, None)
        .unwrap()
}

fn rows(server: &TestServer) -> Vec<SongEmotionRecord> {
    server
        .user_store
        .get_user_song_emotions(user_id(server))
        .unwrap()
}

fn emotion_of(server: &TestServer, song_id: &str) -> Option<String> {
    rows(server)
        .into_iter()
        .find(|r| r.song_id == song_id)
        .map(|r| r.emotion)
}

/// Keeps consuming the feed until the user's active track has seen `label` `count` times
async fn observe_until(
    server: &TestServer,
    feed: &mut VideoFeed,
    track_id: &str,
    label: &str,
    count: u32,
) {
    let user_id = user_id(server);
    for _ in 0..500 {
        if let Some(state) = server.aggregator.active_state(user_id).await {
            if state.current_track.track_id.as_deref() == Some(track_id)
                && state.histogram.count(label) >= count
            {
                return;
            }
        }
        feed.read_frames(1).await;
    }
    panic!("{} was never observed {} times on {}", label, count, track_id);
}

#[tokio::test]
async fn test_track_change_persists_majority_emotion() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(Some(TRACK_A));
    server.upstream.feel(Some("happy"));
    assert_eq!(client.toggle_camera().await["camera_active"], true);

    let mut feed = client.video_feed().await;
    observe_until(&server, &mut feed, TRACK_A.0, "happy", 3).await;
    assert!(rows(&server).is_empty());

    server.upstream.play(Some(TRACK_B));
    server.upstream.feel(Some("sad"));
    observe_until(&server, &mut feed, TRACK_B.0, "sad", 1).await;

    let record = rows(&server)
        .into_iter()
        .find(|r| r.song_id == TRACK_A.0)
        .unwrap();
    assert_eq!(record.emotion, "happy");
    assert_eq!(record.song_name, TRACK_A.1);
    assert_eq!(record.artist_name, TRACK_A.2);
    assert_eq!(emotion_of(&server, TRACK_B.0), None);
}

#[tokio::test]
async fn test_disconnect_finalizes_current_song() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(Some(TRACK_A));
    server.upstream.feel(Some("surprise"));
    client.toggle_camera().await;

    let mut feed = client.video_feed().await;
    observe_until(&server, &mut feed, TRACK_A.0, "surprise", 2).await;
    drop(feed);

    eventually("song A to be persisted on disconnect", || {
        emotion_of(&server, TRACK_A.0).as_deref() == Some("surprise")
    })
    .await;
    eventually("active state to be released", || {
        !server.aggregator.has_active_state(user_id(&server))
    })
    .await;
}

#[tokio::test]
async fn test_camera_off_flushes_songs() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(Some(TRACK_A));
    server.upstream.feel(Some("angry"));
    client.toggle_camera().await;

    let mut feed = client.video_feed().await;
    observe_until(&server, &mut feed, TRACK_A.0, "angry", 2).await;

    let toggled = client.toggle_camera().await;
    assert_eq!(toggled["status"], "success");
    assert_eq!(toggled["camera_active"], false);
    assert_eq!(emotion_of(&server, TRACK_A.0).as_deref(), Some("angry"));

    // Placeholder frames keep flowing while the camera is off
    feed.read_frames(2).await;
}

#[tokio::test]
async fn test_replaying_a_song_overwrites_its_row() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(Some(TRACK_A));
    server.upstream.feel(Some("happy"));
    client.toggle_camera().await;
    let mut feed = client.video_feed().await;
    observe_until(&server, &mut feed, TRACK_A.0, "happy", 2).await;
    client.toggle_camera().await;
    assert_eq!(emotion_of(&server, TRACK_A.0).as_deref(), Some("happy"));

    server.upstream.feel(Some("neutral"));
    client.toggle_camera().await;
    observe_until(&server, &mut feed, TRACK_A.0, "neutral", 3).await;
    client.toggle_camera().await;

    let rows = rows(&server);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].emotion, "neutral");
}

#[tokio::test]
async fn test_nothing_playing_records_nothing() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(None);
    server.upstream.feel(Some("happy"));
    client.toggle_camera().await;

    let mut feed = client.video_feed().await;
    feed.read_frames(4).await;
    client.toggle_camera().await;
    drop(feed);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(rows(&server).is_empty());
}

#[tokio::test]
async fn test_anonymous_viewer_records_nothing() {
    let server = TestServer::spawn().await;
    let logged_in = TestClient::logged_in(&server).await;
    let anonymous = TestClient::new(server.base_url.clone());

    server.upstream.play(Some(TRACK_A));
    server.upstream.feel(Some("happy"));
    anonymous.toggle_camera().await;

    let mut feed = anonymous.video_feed().await;
    feed.read_frames(4).await;
    anonymous.toggle_camera().await;

    assert!(rows(&server).is_empty());
    assert_eq!(server.aggregator.active_user_count(), 0);
    drop(logged_in);
}

#[tokio::test]
async fn test_dashboard_lists_recorded_songs() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(Some(TRACK_A));
    server.upstream.feel(Some("happy"));
    client.toggle_camera().await;
    let mut feed = client.video_feed().await;
    observe_until(&server, &mut feed, TRACK_A.0, "happy", 2).await;
    client.toggle_camera().await;

    let dashboard = client.dashboard().await;
    let rows = dashboard.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["song_id"], TRACK_A.0);
    assert_eq!(rows[0]["song_name"], TRACK_A.1);
    assert_eq!(rows[0]["artist_name"], TRACK_A.2);
    assert_eq!(rows[0]["emotion"], "happy");
}

#[tokio::test]
async fn test_current_song_follows_player() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;

    server.upstream.play(None);
    let song = client.current_song().await;
    assert_eq!(song["song"], "N/A");
    assert_eq!(song["artist"], "N/A");
    assert!(song["id"].is_null());

    server.upstream.play(Some(TRACK_B));
    eventually_song(&client, TRACK_B.0).await;
    let song = client.current_song().await;
    assert_eq!(song["song"], TRACK_B.1);
    assert_eq!(song["artist"], TRACK_B.2);
}

async fn eventually_song(client: &TestClient, song_id: &str) {
    for _ in 0..100 {
        if client.current_song().await["id"] == song_id {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("current_song never reported {}", song_id);
}

#[tokio::test]
async fn test_expired_token_is_refreshed() {
    let server = TestServer::spawn().await;
    let client = TestClient::logged_in(&server).await;
    let user_id = user_id(&server);

    server
        .user_store
        .set_spotify_token(
            user_id,
            &SpotifyToken::expiring_in("stale".to_string(), "old-refresh".to_string(), 0),
        )
        .unwrap();
    // Let the cached snapshot from login expire
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    server.upstream.play(Some(TRACK_A));
    let song = client.current_song().await;
    assert_eq!(song["id"], TRACK_A.0);

    assert!(server
        .upstream
        .grant_types()
        .contains(&"refresh_token".to_string()));
    let token = server.user_store.get_spotify_token(user_id).unwrap().unwrap();
    assert!(!token.is_expired());
    assert_ne!(token.access_token, "stale");
}
