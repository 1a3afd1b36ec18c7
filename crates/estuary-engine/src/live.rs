//! Live-delivery primitives (spec §4.6): the long-poll wait queue, the SSE
//! client registry, and the hibernation-safe WebSocket set. All three are
//! owned by the stream's actor and driven from its append path.

use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// One frame of live delivery: either a data message or a control frame
/// carrying offset/cursor bookkeeping (spec §4.5 "Read (SSE)").
#[derive(Debug, Clone)]
pub enum LiveFrame {
    Data { payload: Vec<u8>, base64: bool },
    Control(ControlFrame),
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlFrame {
    #[serde(rename = "streamNextOffset")]
    pub stream_next_offset: String,
    #[serde(rename = "streamCursor", skip_serializing_if = "Option::is_none")]
    pub stream_cursor: Option<String>,
    #[serde(rename = "streamWriteTimestamp", skip_serializing_if = "Option::is_none")]
    pub stream_write_timestamp: Option<i64>,
    #[serde(rename = "streamClosed", skip_serializing_if = "Option::is_none")]
    pub stream_closed: Option<bool>,
    #[serde(rename = "upToDate", skip_serializing_if = "Option::is_none")]
    pub up_to_date: Option<bool>,
}

/// A pending long-poll request, parked until the next append or its
/// deadline, whichever comes first.
pub struct LongPollWaiter {
    pub deadline: Instant,
    pub notify: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct LongPollQueue {
    waiters: Vec<LongPollWaiter>,
}

impl LongPollQueue {
    pub fn register(&mut self, deadline: Instant) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(LongPollWaiter {
            deadline,
            notify: tx,
        });
        rx
    }

    /// Wake every waiter: a new append always unblocks everyone parked at
    /// the tail, since a single-stream actor only registers waiters there.
    pub fn wake_all(&mut self) {
        for w in self.waiters.drain(..) {
            let _ = w.notify.send(());
        }
    }

    /// Drop waiters whose deadline has passed (they time out on their own
    /// via `tokio::time::timeout`, but this prevents unbounded growth from
    /// cancelled requests that never got removed).
    pub fn sweep_expired(&mut self, now: Instant) {
        self.waiters.retain(|w| w.deadline > now);
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Per-client back-pressure threshold before the SSE registry drops a slow
/// reader (spec §4.6: "non-blocking back-pressure").
const SSE_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct SseRegistry {
    clients: DashMap<Uuid, mpsc::Sender<LiveFrame>>,
}

impl SseRegistry {
    pub fn register(&self) -> (Uuid, mpsc::Receiver<LiveFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
        self.clients.insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: &Uuid) {
        self.clients.remove(id);
    }

    /// Fan out one frame to every client; a client whose buffer is full is
    /// dropped rather than allowed to block the append path.
    pub fn broadcast(&self, frame: LiveFrame) {
        let mut stale = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().try_send(frame.clone()).is_err() {
                stale.push(*entry.key());
            }
        }
        for id in stale {
            self.clients.remove(&id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Hibernation-safe WebSocket set. The actor holds only an opaque sender;
/// the real socket write loop lives in the edge/server layer so the actor
/// itself never blocks on network I/O (spec §4.6, design note in §9).
#[derive(Default)]
pub struct WsRegistry {
    clients: DashMap<Uuid, mpsc::Sender<LiveFrame>>,
}

impl WsRegistry {
    pub fn attach(&self, sender: mpsc::Sender<LiveFrame>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(id, sender);
        id
    }

    pub fn detach(&self, id: &Uuid) {
        self.clients.remove(id);
    }

    pub fn broadcast(&self, frame: LiveFrame) {
        let mut stale = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().try_send(frame.clone()).is_err() {
                stale.push(*entry.key());
            }
        }
        for id in stale {
            self.clients.remove(&id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn long_poll_wakes_all_waiters_on_append() {
        let mut q = LongPollQueue::default();
        let r1 = q.register(Instant::now() + Duration::from_secs(30));
        let r2 = q.register(Instant::now() + Duration::from_secs(30));
        assert_eq!(q.len(), 2);

        q.wake_all();
        assert!(q.is_empty());
        assert!(r1.await.is_ok());
        assert!(r2.await.is_ok());
    }

    #[tokio::test]
    async fn sse_registry_fans_out_and_drops_stale_clients() {
        let reg = SseRegistry::default();
        let (id, mut rx) = reg.register();
        reg.broadcast(LiveFrame::Data {
            payload: b"hi".to_vec(),
            base64: false,
        });
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, LiveFrame::Data { .. }));

        reg.unregister(&id);
        assert_eq!(reg.client_count(), 0);
    }
}
