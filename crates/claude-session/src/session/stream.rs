use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::adapter::RequestId;
use crate::session::router::StreamItem;
use crate::session::SessionCommand;

/// The lazy per-request message sequence returned by
/// [`Session::stream`](crate::Session::stream).
///
/// Yields every message of the request in arrival order; errors (timeout,
/// interrupt, transport failures) arrive as `Err` items so laziness never
/// silently truncates the conversation. The stream ends when the session
/// closes the request's channel — after the terminal `Result`, a
/// cancellation, or an error.
///
/// Dropping the stream cancels the request: the session dequeues it and, if
/// it is the one in flight, interrupts the CLI.
pub struct MessageStream {
    request: RequestId,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    finished: bool,
}

impl MessageStream {
    pub(crate) fn new(
        request: RequestId,
        rx: mpsc::UnboundedReceiver<StreamItem>,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        MessageStream {
            request,
            rx,
            commands,
            finished: false,
        }
    }

    /// The opaque id of the underlying request; usable with
    /// [`Session::interrupt_request`](crate::Session::interrupt_request).
    pub fn request_id(&self) -> RequestId {
        self.request
    }
}

impl Stream for MessageStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if !self.finished {
            // Best effort: the session may already be gone.
            let _ = self.commands.send(SessionCommand::Cancel(self.request));
        }
    }
}
