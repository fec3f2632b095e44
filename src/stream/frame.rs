//! SSE frames and their axum encoding

use crate::event_log::StoredEvent;
use axum::response::sse::Event;
use serde_json::json;
use std::time::Duration;

pub const OVERFLOW_CODE: &str = "replay_overflow";

/// One unit written to the SSE body
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Reconnect delay advice, sent once at stream start
    Retry(Duration),
    /// A logged event in its wire envelope
    Event {
        id: i64,
        event_type: &'static str,
        data: String,
    },
    /// Replay limit hit; the client must reconnect from `last_sent_id`
    Overflow { limit: usize, last_sent_id: i64 },
    /// Replay done, live tail follows. Never persisted.
    ReplayComplete { last_event_id: i64 },
    Ping,
}

impl StreamFrame {
    pub fn event(event: &StoredEvent) -> Self {
        Self::Event {
            id: event.id(),
            event_type: event.event_type().as_str(),
            data: serde_json::to_string(&event.to_wire()).unwrap_or_default(),
        }
    }
}

impl From<StreamFrame> for Event {
    fn from(frame: StreamFrame) -> Self {
        match frame {
            StreamFrame::Retry(delay) => Event::default().retry(delay),
            StreamFrame::Event {
                id,
                event_type,
                data,
            } => Event::default()
                .id(id.to_string())
                .event(event_type)
                .data(data),
            StreamFrame::Overflow {
                limit,
                last_sent_id,
            } => {
                let data = json!({
                    "code": OVERFLOW_CODE,
                    "message": format!(
                        "More than {limit} events to replay; \
                         reconnect with Last-Event-ID {last_sent_id}"
                    ),
                    "last_sent_id": last_sent_id,
                });
                Event::default().event("error").data(data.to_string())
            }
            StreamFrame::ReplayComplete { last_event_id } => Event::default()
                .event("replay.complete")
                .data(json!({ "last_event_id": last_event_id }).to_string()),
            StreamFrame::Ping => Event::default().event("ping").data("{}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::sse::Sse;
    use axum::response::IntoResponse;
    use std::convert::Infallible;

    async fn encode(frames: Vec<StreamFrame>) -> String {
        let events = frames
            .into_iter()
            .map(|f| Ok::<_, Infallible>(Event::from(f)));
        let response = Sse::new(tokio_stream::iter(events)).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_encodings() {
        assert_eq!(
            encode(vec![StreamFrame::Retry(Duration::from_secs(3))]).await,
            "retry: 3000\n\n"
        );
        assert_eq!(
            encode(vec![StreamFrame::Ping]).await,
            "event: ping\ndata: {}\n\n"
        );
        assert_eq!(
            encode(vec![StreamFrame::ReplayComplete { last_event_id: 9 }]).await,
            "event: replay.complete\ndata: {\"last_event_id\":9}\n\n"
        );
        assert_eq!(
            encode(vec![StreamFrame::Event {
                id: 4,
                event_type: "lead.started",
                data: "{}".to_string()
            }])
            .await,
            "id: 4\nevent: lead.started\ndata: {}\n\n"
        );
    }

    #[tokio::test]
    async fn test_overflow_marker() {
        let text = encode(vec![StreamFrame::Overflow {
            limit: 500,
            last_sent_id: 812,
        }])
        .await;
        let data = text
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(parsed["code"], OVERFLOW_CODE);
        assert_eq!(parsed["last_sent_id"], 812);
        assert!(text.starts_with("event: error\n"));
    }
}
