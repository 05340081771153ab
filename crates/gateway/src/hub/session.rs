//! Per-connection stream session: one snapshot, then updates and keepalives.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use shared::{DeviceId, Snapshot, StreamFrame};
use tokio::time::Instant;

use super::{Hub, HubError, Subscription};

/// One item of a session's output.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFrame {
    Frame(StreamFrame),
    /// Nothing was sent for a whole idle period.
    Keepalive,
}

/// Turns one hub subscription into an ordered frame sequence for one client.
///
/// The subscription is released when the session is dropped, which is what
/// happens when the client disconnects or a write fails.
pub struct StreamSession {
    subscription: Subscription,
    filter: Option<DeviceId>,
    idle_timeout: Duration,
    pending_snapshot: Option<Snapshot>,
}

impl StreamSession {
    /// Subscribe and capture the initial snapshot. With `filter`, only that
    /// device appears in the snapshot and in updates.
    pub fn open(
        hub: &Arc<Hub>,
        capacity: usize,
        idle_timeout: Duration,
        filter: Option<DeviceId>,
    ) -> Result<Self, HubError> {
        let (subscription, mut snapshot) = hub.subscribe_with_snapshot(capacity)?;
        if let Some(id) = &filter {
            let key = id.key();
            snapshot.retain(|k, _| *k == key);
        }
        Ok(Self {
            subscription,
            filter,
            idle_timeout,
            pending_snapshot: Some(snapshot),
        })
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Next frame. The first call yields the snapshot; afterwards this waits
    /// for a matching update and yields a keepalive if none arrives within the
    /// idle timeout.
    pub async fn next_frame(&mut self) -> SessionFrame {
        if let Some(snapshot) = self.pending_snapshot.take() {
            return SessionFrame::Frame(StreamFrame::Snapshot(snapshot));
        }
        let deadline = Instant::now() + self.idle_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.subscription.recv()).await {
                Ok(event) => {
                    if self.filter.as_ref().is_some_and(|id| *id != event.identity) {
                        continue;
                    }
                    return SessionFrame::Frame(StreamFrame::Update(event));
                }
                Err(_) => return SessionFrame::Keepalive,
            }
        }
    }

    /// Endless frame stream; ends only when dropped.
    pub fn into_stream(self) -> impl Stream<Item = SessionFrame> + Send {
        let mut session = self;
        async_stream::stream! {
            loop {
                yield session.next_frame().await;
            }
        }
    }
}
