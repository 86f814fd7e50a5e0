//! HTTP client for end-to-end tests
//!
//! Keeps cookies like a browser and never follows redirects, so tests can assert on
//! every hop of the login flow.

use super::constants::*;
use super::server::TestServer;
use reqwest::{header, Response, StatusCode};
use std::time::Duration;

pub struct TestClient {
    pub base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Creates an anonymous client
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build reqwest client");
        Self { base_url, client }
    }

    /// Creates a client that went through the whole Spotify login flow
    pub async fn logged_in(server: &TestServer) -> Self {
        let client = Self::new(server.base_url.clone());
        let state = client.start_login().await;
        let response = client.callback(Some(AUTH_CODE), Some(&state)).await;
        assert_eq!(
            location(&response),
            "/",
            "Spotify login did not complete"
        );
        client
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn post(&self, path: &str) -> Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Calls /login and returns the CSRF state of the Spotify authorize redirect
    pub async fn start_login(&self) -> String {
        let response = self.get("/login").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let authorize_url = location(&response);
        reqwest::Url::parse(&authorize_url)
            .expect("Authorize url is not a url")
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .expect("Authorize url has no state")
    }

    pub async fn callback(&self, code: Option<&str>, state: Option<&str>) -> Response {
        let mut query = Vec::new();
        if let Some(code) = code {
            query.push(("code", code));
        }
        if let Some(state) = state {
            query.push(("state", state));
        }
        self.client
            .get(format!("{}/callback", self.base_url))
            .query(&query)
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn toggle_camera(&self) -> serde_json::Value {
        self.post("/camera/toggle")
            .await
            .json()
            .await
            .expect("Camera toggle did not answer JSON")
    }

    pub async fn current_song(&self) -> serde_json::Value {
        let response = self.get("/current_song").await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.expect("current_song did not answer JSON")
    }

    pub async fn dashboard(&self) -> serde_json::Value {
        let response = self.get("/dashboard").await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.expect("dashboard did not answer JSON")
    }

    pub async fn video_feed(&self) -> VideoFeed {
        let response = self.get("/video_feed").await;
        assert_eq!(response.status(), StatusCode::OK);
        VideoFeed {
            response,
            buffer: Vec::new(),
        }
    }
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("No Location header")
        .to_str()
        .expect("Location is not a string")
        .to_string()
}

/// An open `/video_feed` response. Dropping it disconnects the viewer.
pub struct VideoFeed {
    pub response: Response,
    buffer: Vec<u8>,
}

impl VideoFeed {
    /// Reads until `count` more multipart frames arrived
    pub async fn read_frames(&mut self, count: usize) {
        let boundary = b"--frame\r\n";
        let mut seen = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(EVENTUALLY_TIMEOUT_MS);
        while seen < count {
            let chunk = tokio::time::timeout_at(deadline, self.response.chunk())
                .await
                .expect("Timed out waiting for video frames")
                .expect("Video feed failed")
                .expect("Video feed ended");
            self.buffer.extend_from_slice(&chunk);
            while let Some(pos) = self
                .buffer
                .windows(boundary.len())
                .position(|w| w == boundary)
            {
                seen += 1;
                self.buffer.drain(..pos + boundary.len());
            }
        }
    }
}

/// Polls `check` until it returns true or the timeout expires
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while !check() {
        if start.elapsed() > Duration::from_millis(EVENTUALLY_TIMEOUT_MS) {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
