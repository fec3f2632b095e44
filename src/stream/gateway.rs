//! Replay and live tail for one SSE connection

use super::frame::StreamFrame;
use crate::db::{ConversationContext, Database, DbResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Most events sent during replay before the overflow marker
    pub replay_limit: usize,
    /// Live tail ends after this long; clients reconnect with their cursor
    pub lifetime: Duration,
    pub poll_interval: Duration,
    pub retry: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            replay_limit: 500,
            lifetime: Duration::from_secs(60),
            poll_interval: Duration::from_secs(15),
            retry: Duration::from_secs(3),
        }
    }
}

/// Outcome of the replay phase
#[derive(Debug)]
pub struct Replay {
    pub frames: Vec<StreamFrame>,
    /// Cursor after replay; equals the request cursor when nothing was sent
    pub last_sent_id: i64,
    pub overflowed: bool,
}

#[derive(Clone)]
pub struct StreamGateway {
    db: Database,
    config: StreamConfig,
}

impl StreamGateway {
    pub fn new(db: Database, config: StreamConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Events strictly after `cursor`, ascending, capped at the replay limit.
    ///
    /// One extra row is fetched to detect overflow; when it exists the
    /// frames end with an overflow marker instead of `replay.complete`.
    pub fn replay(&self, ctx: &ConversationContext, cursor: i64) -> DbResult<Replay> {
        let limit = self.config.replay_limit;
        let mut events = self.db.events_after(
            &ctx.tenant_id,
            &ctx.conversation_id,
            cursor,
            limit + 1,
        )?;
        let overflowed = events.len() > limit;
        events.truncate(limit);

        let last_sent_id = events.last().map_or(cursor, |e| e.id());
        let mut frames: Vec<StreamFrame> = events.iter().map(StreamFrame::event).collect();
        if overflowed {
            frames.push(StreamFrame::Overflow {
                limit,
                last_sent_id,
            });
        } else {
            frames.push(StreamFrame::ReplayComplete {
                last_event_id: last_sent_id,
            });
        }

        Ok(Replay {
            frames,
            last_sent_id,
            overflowed,
        })
    }

    /// Replay plus one keepalive, as a finite frame sequence.
    ///
    /// Deterministic for a given log state, so proxies and tests see
    /// identical bytes for identical requests.
    pub fn single_pass(
        &self,
        ctx: &ConversationContext,
        cursor: i64,
    ) -> DbResult<Vec<StreamFrame>> {
        let replay = self.replay(ctx, cursor)?;
        let mut frames = Vec::with_capacity(replay.frames.len() + 2);
        frames.push(StreamFrame::Retry(self.config.retry));
        frames.extend(replay.frames);
        if !replay.overflowed {
            frames.push(StreamFrame::Ping);
        }
        Ok(frames)
    }

    /// Drive one live connection, writing frames into `tx`.
    ///
    /// Returns when the client goes away, the replay overflows, the
    /// lifetime elapses, or the database fails.
    pub async fn run(
        self,
        ctx: ConversationContext,
        cursor: i64,
        tx: mpsc::Sender<StreamFrame>,
    ) -> DbResult<()> {
        let deadline = Instant::now() + self.config.lifetime;

        if tx.send(StreamFrame::Retry(self.config.retry)).await.is_err() {
            return Ok(());
        }

        let replay = self.replay(&ctx, cursor)?;
        let overflowed = replay.overflowed;
        let mut last_sent_id = replay.last_sent_id;
        for frame in replay.frames {
            if tx.send(frame).await.is_err() {
                return Ok(());
            }
        }
        if overflowed {
            tracing::info!(
                conv_id = %ctx.conversation_id,
                last_sent_id,
                "Replay overflow; closing stream"
            );
            return Ok(());
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(conv_id = %ctx.conversation_id, "Stream lifetime reached");
                return Ok(());
            }
            let wait = self.config.poll_interval.min(deadline - now);

            tokio::select! {
                () = tx.closed() => {
                    tracing::debug!(conv_id = %ctx.conversation_id, "Client disconnected");
                    return Ok(());
                }
                () = tokio::time::sleep(wait) => {}
            }

            if tx.send(StreamFrame::Ping).await.is_err() {
                return Ok(());
            }

            let events = self.db.events_after(
                &ctx.tenant_id,
                &ctx.conversation_id,
                last_sent_id,
                self.config.replay_limit,
            )?;
            for event in &events {
                if tx.send(StreamFrame::event(event)).await.is_err() {
                    return Ok(());
                }
                last_sent_id = event.id();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::Recorder;
    use crate::state_machine::EventType;
    use serde_json::json;

    fn setup(config: StreamConfig) -> (Recorder, StreamGateway, ConversationContext) {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("acme", "Acme").unwrap();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        let gateway = StreamGateway::new(db.clone(), config);
        (
            Recorder::new(db),
            gateway,
            ConversationContext::new("acme", "conv-1"),
        )
    }

    fn say(recorder: &Recorder, ctx: &ConversationContext, n: usize) {
        recorder
            .record(
                ctx,
                EventType::UserMessageCreated,
                json!({ "text": format!("message {n}") }),
                Some(&format!("m-{n}")),
                None,
            )
            .unwrap();
    }

    fn carries(frame: &StreamFrame, text: &str) -> bool {
        matches!(frame, StreamFrame::Event { data, .. } if data.contains(text))
    }

    fn event_ids(frames: &[StreamFrame]) -> Vec<i64> {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Event { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_replay_overflow_stops_at_limit() {
        let (recorder, gateway, ctx) = setup(StreamConfig::default());
        for n in 0..501 {
            say(&recorder, &ctx, n);
        }

        let replay = gateway.replay(&ctx, 0).unwrap();
        let ids = event_ids(&replay.frames);
        assert_eq!(ids.len(), 500);
        assert!(replay.overflowed);
        assert_eq!(replay.last_sent_id, ids[499]);
        assert_eq!(
            replay.frames.last(),
            Some(&StreamFrame::Overflow {
                limit: 500,
                last_sent_id: ids[499]
            })
        );

        // Resuming from the overflow cursor delivers the remainder
        let rest = gateway.replay(&ctx, replay.last_sent_id).unwrap();
        assert_eq!(event_ids(&rest.frames).len(), 1);
        assert!(!rest.overflowed);
    }

    #[test]
    fn test_replay_after_cursor_is_ascending() {
        let (recorder, gateway, ctx) = setup(StreamConfig::default());
        for n in 0..6 {
            say(&recorder, &ctx, n);
        }
        let all = event_ids(&gateway.replay(&ctx, 0).unwrap().frames);
        let k = all[2];

        let after = event_ids(&gateway.replay(&ctx, k).unwrap().frames);
        assert_eq!(after, all[3..].to_vec());
        assert!(after.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_replay_complete_carries_cursor() {
        let (_recorder, gateway, ctx) = setup(StreamConfig::default());
        let replay = gateway.replay(&ctx, 17).unwrap();
        assert_eq!(
            replay.frames,
            vec![StreamFrame::ReplayComplete { last_event_id: 17 }]
        );
    }

    #[test]
    fn test_replay_is_scoped_to_conversation() {
        let (recorder, gateway, ctx) = setup(StreamConfig::default());
        recorder
            .db()
            .create_conversation("conv-2", "acme", "hash-2")
            .unwrap();
        let other = ConversationContext::new("acme", "conv-2");
        say(&recorder, &ctx, 1);
        say(&recorder, &other, 2);

        assert_eq!(event_ids(&gateway.replay(&ctx, 0).unwrap().frames).len(), 1);

        let wrong_tenant = ConversationContext::new("other", "conv-1");
        assert!(event_ids(&gateway.replay(&wrong_tenant, 0).unwrap().frames).is_empty());
    }

    #[test]
    fn test_single_pass_is_deterministic() {
        let (recorder, gateway, ctx) = setup(StreamConfig::default());
        for n in 0..3 {
            say(&recorder, &ctx, n);
        }
        let first = gateway.single_pass(&ctx, 0).unwrap();
        let second = gateway.single_pass(&ctx, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
        assert_eq!(first[0], StreamFrame::Retry(Duration::from_secs(3)));
        assert!(matches!(first[4], StreamFrame::ReplayComplete { .. }));
        assert_eq!(first[5], StreamFrame::Ping);
    }

    #[tokio::test]
    async fn test_live_tail_delivers_new_events() {
        let config = StreamConfig {
            lifetime: Duration::from_millis(400),
            poll_interval: Duration::from_millis(20),
            ..StreamConfig::default()
        };
        let (recorder, gateway, ctx) = setup(config);
        say(&recorder, &ctx, 0);

        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(gateway.run(ctx.clone(), 0, tx));

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            let done = matches!(frame, StreamFrame::ReplayComplete { .. });
            frames.push(frame);
            if done {
                break;
            }
        }
        assert!(matches!(frames[0], StreamFrame::Retry(_)));
        assert!(carries(&frames[1], "message 0"));

        say(&recorder, &ctx, 1);
        let mut tail = Vec::new();
        while let Some(frame) = rx.recv().await {
            tail.push(frame);
        }
        handle.await.unwrap().unwrap();

        assert!(tail.iter().any(|f| carries(f, "message 1")));
        assert!(tail.contains(&StreamFrame::Ping));
        assert!(!tail.iter().any(|f| carries(f, "message 0")));
    }

    #[tokio::test]
    async fn test_live_tail_ends_on_disconnect() {
        let config = StreamConfig {
            lifetime: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(3600),
            ..StreamConfig::default()
        };
        let (_recorder, gateway, ctx) = setup(config);

        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(gateway.run(ctx, 0, tx));
        // retry + replay.complete
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stream task should end when the client leaves")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_live_stream_closes_after_overflow() {
        let config = StreamConfig {
            replay_limit: 2,
            ..StreamConfig::default()
        };
        let (recorder, gateway, ctx) = setup(config);
        for n in 0..3 {
            say(&recorder, &ctx, n);
        }

        let (tx, mut rx) = mpsc::channel(64);
        gateway.run(ctx, 0, tx).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 4);
        assert!(matches!(
            frames[3],
            StreamFrame::Overflow { last_sent_id, .. } if last_sent_id > 0
        ));
    }
}
