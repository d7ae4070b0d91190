use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::adapter::RequestId;
use crate::error::SessionError;
use crate::message::Message;

/// What flows on a per-request channel: decoded messages, or the error that
/// ends the request.
pub type StreamItem = Result<Message, SessionError>;

/// Maps request ids to their per-request channels.
///
/// A channel is single-consumer (the [`MessageStream`](super::MessageStream)
/// iterator) and multi-producer in principle, though in practice only the
/// session writes. Dropping the sender is the sole termination signal; a
/// message for an id with no entry is logged and dropped, never a crash —
/// that only happens when the CLI keeps talking after a request's terminal.
pub(crate) struct RequestRouter {
    channels: HashMap<RequestId, mpsc::UnboundedSender<StreamItem>>,
}

impl RequestRouter {
    pub fn new() -> Self {
        RequestRouter {
            channels: HashMap::new(),
        }
    }

    pub fn register(&mut self, request: RequestId) -> mpsc::UnboundedReceiver<StreamItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(request, tx);
        rx
    }

    pub fn contains(&self, request: RequestId) -> bool {
        self.channels.contains_key(&request)
    }

    /// Deliver one item; returns false when the request is unknown.
    pub fn deliver(&mut self, request: RequestId, item: StreamItem) -> bool {
        match self.channels.get(&request) {
            Some(tx) => {
                // A send error means the consumer is gone; the entry will be
                // cleaned up by the cancel path.
                let _ = tx.send(item);
                true
            }
            None => {
                tracing::debug!(%request, "dropping event for unknown request");
                false
            }
        }
    }

    /// Close a channel, ending its consumer's stream after it drains.
    pub fn close(&mut self, request: RequestId) -> bool {
        self.channels.remove(&request).is_some()
    }

    /// Fail every open request with `error` and close it.
    pub fn fail_all(&mut self, error: &SessionError) {
        for (_, tx) in self.channels.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Close every open request without an error.
    pub fn close_all(&mut self) {
        self.channels.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let mut router = RequestRouter::new();
        let id = RequestId::mint();
        let mut rx = router.register(id);
        for text in ["a", "b", "c"] {
            router.deliver(id, Err(SessionError::InvalidOption(text.into())));
        }
        router.close(id);
        let mut seen = Vec::new();
        while let Some(item) = rx.recv().await {
            let Err(SessionError::InvalidOption(text)) = item else {
                panic!("unexpected item");
            };
            seen.push(text);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn unknown_request_is_reported() {
        let mut router = RequestRouter::new();
        assert!(!router.deliver(RequestId::mint(), Err(SessionError::Timeout)));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let mut router = RequestRouter::new();
        let id = RequestId::mint();
        let mut rx = router.register(id);
        assert!(router.close(id));
        assert!(rx.recv().await.is_none());
        // Produces after close are dropped.
        assert!(!router.deliver(id, Err(SessionError::Timeout)));
    }

    #[tokio::test]
    async fn fail_all_errors_every_channel() {
        let mut router = RequestRouter::new();
        let a = RequestId::mint();
        let b = RequestId::mint();
        let mut rx_a = router.register(a);
        let mut rx_b = router.register(b);
        router.fail_all(&SessionError::AdapterExit("gone".into()));
        assert!(matches!(
            rx_a.recv().await,
            Some(Err(SessionError::AdapterExit(_)))
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(Err(SessionError::AdapterExit(_)))
        ));
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
        assert!(router.is_empty());
    }
}
