use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{
    channel::ChannelError,
    message::{IpcMessage, MessageId},
};

pub(crate) type Responder = oneshot::Sender<Result<IpcMessage, ChannelError>>;

struct PendingResponse {
    respond_to: Responder,
    deadline: Option<(Instant, Duration)>,
}

/// Requests awaiting a reply, keyed by the id of the outgoing message
#[derive(Default)]
pub(crate) struct RequestStore {
    pending: HashMap<MessageId, PendingResponse>,
}

impl RequestStore {
    pub(crate) fn insert(&mut self, id: MessageId, respond_to: Responder, timeout: Option<Duration>) {
        let deadline = timeout.map(|t| (Instant::now() + t, t));
        self.pending.insert(
            id,
            PendingResponse {
                respond_to,
                deadline,
            },
        );
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Complete the request `id` with `message`, returning whether one was waiting
    pub(crate) fn resolve(&mut self, id: &str, message: IpcMessage) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        if pending.respond_to.send(Ok(message)).is_err() {
            tracing::debug!(%id, "requester went away before the reply arrived");
        }
        true
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|p| p.deadline.map(|(at, _)| at))
            .min()
    }

    /// Fail every request whose deadline has passed
    pub(crate) fn expire(&mut self, now: Instant) {
        let expired: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| matches!(p.deadline, Some((at, _)) if at <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(pending) = self.pending.remove(&id) {
                let after = pending.deadline.map(|(_, t)| t).unwrap_or_default();
                tracing::warn!(%id, ?after, "request timed out");
                let _ = pending
                    .respond_to
                    .send(Err(ChannelError::Timeout { id, after }));
            }
        }
    }

    /// Fail every outstanding request because the channel went away
    pub(crate) fn close_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.respond_to.send(Err(ChannelError::Closed));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[tokio::test]
    async fn resolves_matching_request() {
        let mut store = RequestStore::default();
        let (tx, rx) = oneshot::channel();
        store.insert("1".to_string(), tx, None);

        assert!(!store.resolve("2", IpcMessage::new("x", "9", Value::Null)));
        assert!(store.resolve("1", IpcMessage::new("x", "10", Value::Null)));
        assert_eq!(store.len(), 0);

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.id, "10");
    }

    #[tokio::test(start_paused = true)]
    async fn expires_only_overdue_requests() {
        let mut store = RequestStore::default();
        let (fast_tx, fast_rx) = oneshot::channel();
        let (slow_tx, _slow_rx) = oneshot::channel();
        let (forever_tx, _forever_rx) = oneshot::channel();
        store.insert("1".to_string(), fast_tx, Some(Duration::from_millis(100)));
        store.insert("2".to_string(), slow_tx, Some(Duration::from_secs(5)));
        store.insert("3".to_string(), forever_tx, None);

        let first = store.next_deadline().unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        store.expire(Instant::now());

        assert!(first <= Instant::now());
        assert_eq!(store.len(), 2);
        assert!(matches!(
            fast_rx.await.unwrap(),
            Err(ChannelError::Timeout { ref id, .. }) if id == "1"
        ));
    }

    #[tokio::test]
    async fn close_all_fails_everything() {
        let mut store = RequestStore::default();
        let (tx, rx) = oneshot::channel();
        store.insert("1".to_string(), tx, None);

        store.close_all();

        assert_eq!(rx.await.unwrap(), Err(ChannelError::Closed));
    }
}
