pub mod merge;
pub mod names;
pub mod payload;
pub mod ranking;
pub mod resources;
pub mod session;
pub mod snapshot;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use serde_json::{Value, json};

    use crate::session::{NetworkLocation, Session, StreamDecision};

    /// A WAN direct-play session on server 1 with a 4 Mbps bitrate.
    pub fn session(user: &str, title: &str) -> Session {
        Session {
            session_key: None,
            server_id: 1,
            server_name: "Plex 1".to_string(),
            user: user.to_string(),
            title: title.to_string(),
            parent_title: None,
            grandparent_title: None,
            media_type: "movie".to_string(),
            year: None,
            thumb: None,
            progress: 0,
            state: Some("playing".to_string()),
            bitrate_kbps: Some(4000),
            quality: "4.0 Mbps".to_string(),
            video_codec: Some("h264".to_string()),
            resolution: "1080p".to_string(),
            codec_label: "H264 1080p".to_string(),
            decision: StreamDecision::DirectPlay,
            location: NetworkLocation::Wan,
            player: "Test Player".to_string(),
            platform: "Web".to_string(),
        }
    }

    /// A `/status/sessions` payload with `n` movie sessions, one per user.
    pub fn sessions_payload(n: usize) -> Value {
        let metadata: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "sessionKey": i.to_string(),
                    "type": "movie",
                    "title": format!("Movie {i}"),
                    "thumb": format!("/library/metadata/{i}/thumb"),
                    "viewOffset": 1000,
                    "duration": 4000,
                    "User": {"title": format!("user{i}@example.com")},
                    "Player": {"title": "Browser", "platform": "Chrome", "local": false},
                    "Media": [{"bitrate": 2000, "videoCodec": "h264", "height": 1080,
                               "Part": [{"decision": "directplay"}]}]
                })
            })
            .collect();
        json!({"MediaContainer": {"size": n, "Metadata": metadata}})
    }
}
