//! The supervised session: authoritative owner of one conversation.
//!
//! A [`Session`] is a thin handle onto an actor task. The actor owns the
//! adapter, the request table, the cached resume id, and the queue of
//! not-yet-accepted queries; it processes one command or one adapter event
//! to completion before the next, and it never blocks on the adapter —
//! every adapter interaction is a fire-and-forget send plus inbound event
//! handling.

use std::collections::VecDeque;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::adapter::stdio::StdioAdapter;
use crate::adapter::{
    Adapter, AdapterEvent, AdapterEventSender, AdapterStatus, DoneReason, Health,
    QuerySubmission, RequestId,
};
use crate::error::SessionError;
use crate::message::Message;
use crate::options::{Prompt, QueryOverrides, SessionOptions};

mod router;
mod stream;

pub use router::StreamItem;
pub use stream::MessageStream;

use router::RequestRouter;

pub(crate) enum SessionCommand {
    Submit {
        prompt: Prompt,
        overrides: QueryOverrides,
        reply: oneshot::Sender<(RequestId, mpsc::UnboundedReceiver<StreamItem>)>,
    },
    Cancel(RequestId),
    Interrupt {
        target: Option<RequestId>,
    },
    ClearSession,
    GetSessionId {
        reply: oneshot::Sender<Option<String>>,
    },
    Health {
        reply: oneshot::Sender<Health>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running session.
///
/// The session provisions its adapter lazily on the first query. It lives
/// until [`Session::stop`] or until the handle and every outstanding
/// [`MessageStream`] are dropped.
pub struct Session {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl Session {
    /// Open a session over the default stdio adapter.
    pub fn open(options: SessionOptions) -> Result<Self, SessionError> {
        Self::open_with_adapter(options, Box::new(StdioAdapter::new()))
    }

    /// Open a session over a caller-supplied adapter (e.g. a
    /// [`ScriptedAdapter`](crate::adapter::scripted::ScriptedAdapter)).
    pub fn open_with_adapter(
        options: SessionOptions,
        adapter: Box<dyn Adapter>,
    ) -> Result<Self, SessionError> {
        options.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let actor = SessionActor {
            options,
            adapter,
            state: AdapterState::Unstarted,
            seen_ready: false,
            router: RequestRouter::new(),
            session_id: None,
            pending: VecDeque::new(),
            events_tx,
            timer_tx,
        };
        tokio::spawn(actor.run(commands_rx, events_rx, timer_rx));
        Ok(Session {
            commands: commands_tx,
        })
    }

    /// Submit a query and stream its messages lazily.
    pub async fn stream(
        &self,
        prompt: impl Into<Prompt>,
        overrides: QueryOverrides,
    ) -> Result<MessageStream, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Submit {
                prompt: prompt.into(),
                overrides,
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        let (request, channel) = rx.await.map_err(|_| SessionError::Closed)?;
        Ok(MessageStream::new(request, channel, self.commands.clone()))
    }

    /// Submit a query and wait for its final result text.
    ///
    /// A CLI-reported failure (`Result { is_error: true }`) comes back as
    /// [`SessionError::Claude`].
    pub async fn send(
        &self,
        prompt: impl Into<Prompt>,
        overrides: QueryOverrides,
    ) -> Result<String, SessionError> {
        let mut stream = self.stream(prompt, overrides).await?;
        while let Some(item) = stream.next().await {
            if let Message::Result(result) = item? {
                if result.is_error {
                    return Err(SessionError::Claude {
                        subtype: result.subtype.as_str().to_owned(),
                        message: result.error_detail(),
                        details: result.structured_output.clone(),
                    });
                }
                return Ok(result.result.unwrap_or_default());
            }
        }
        Err(SessionError::Closed)
    }

    /// Interrupt whatever query is currently in flight at the adapter.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Interrupt { target: None })
            .map_err(|_| SessionError::Closed)
    }

    /// Interrupt (or dequeue) one specific request.
    pub async fn interrupt_request(&self, request: RequestId) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Interrupt {
                target: Some(request),
            })
            .map_err(|_| SessionError::Closed)
    }

    /// The cached resume id, if any message carried one yet.
    pub async fn session_id(&self) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::GetSessionId { reply })
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Drop the cached resume id; the next query starts a fresh
    /// conversation.
    pub async fn clear_session(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::ClearSession)
            .map_err(|_| SessionError::Closed)
    }

    pub async fn health(&self) -> Health {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Health { reply }).is_err() {
            return Health::Unhealthy("session stopped".into());
        }
        rx.await
            .unwrap_or_else(|_| Health::Unhealthy("session stopped".into()))
    }

    /// Graceful shutdown: stops the adapter and closes every open request
    /// channel.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Stop { reply })
            .map_err(|_| SessionError::Closed)?;
        let _ = rx.await;
        Ok(())
    }
}

// ─── Actor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum AdapterState {
    Unstarted,
    Provisioning,
    Ready,
    /// Provisioning failed; sticky until the session is replaced.
    Failed(String),
}

struct PendingQuery {
    request: RequestId,
    prompt: Prompt,
    overrides: QueryOverrides,
}

struct SessionActor {
    options: SessionOptions,
    adapter: Box<dyn Adapter>,
    state: AdapterState,
    seen_ready: bool,
    router: RequestRouter,
    session_id: Option<String>,
    /// FIFO of queries the adapter has not accepted yet.
    pending: VecDeque<PendingQuery>,
    events_tx: AdapterEventSender,
    timer_tx: mpsc::UnboundedSender<RequestId>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
        mut events_rx: mpsc::UnboundedReceiver<AdapterEvent>,
        mut timer_rx: mpsc::UnboundedReceiver<RequestId>,
    ) {
        loop {
            tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            break;
                        }
                    }
                    // Every handle (session + streams) is gone.
                    None => break,
                },
                event = events_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event).await;
                    }
                },
                timed_out = timer_rx.recv() => {
                    if let Some(request) = timed_out {
                        self.handle_timeout(request).await;
                    }
                },
            }
        }
        let _ = self.adapter.stop().await;
        self.router.close_all();
    }

    /// Returns true when the actor should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Submit {
                prompt,
                overrides,
                reply,
            } => {
                self.handle_submit(prompt, overrides, reply).await;
            }
            SessionCommand::Cancel(request) => {
                self.handle_cancel(request).await;
            }
            SessionCommand::Interrupt { target } => match target {
                None => {
                    let _ = self.adapter.interrupt().await;
                }
                Some(request) => {
                    if let Some(pos) = self.pending.iter().position(|p| p.request == request) {
                        self.pending.remove(pos);
                        self.fail_request(request, SessionError::Interrupted);
                    } else if self.router.contains(request) {
                        // In flight or queued at the adapter. The channel
                        // stays open so an interrupt-result can still land.
                        let _ = self.adapter.cancel(request).await;
                    }
                }
            },
            SessionCommand::ClearSession => {
                self.session_id = None;
            }
            SessionCommand::GetSessionId { reply } => {
                let _ = reply.send(self.session_id.clone());
            }
            SessionCommand::Health { reply } => {
                let _ = reply.send(self.adapter.health());
            }
            SessionCommand::Stop { reply } => {
                let _ = self.adapter.stop().await;
                self.pending.clear();
                self.router.close_all();
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    async fn handle_submit(
        &mut self,
        prompt: Prompt,
        overrides: QueryOverrides,
        reply: oneshot::Sender<(RequestId, mpsc::UnboundedReceiver<StreamItem>)>,
    ) {
        let request = RequestId::mint();
        let channel = self.router.register(request);
        let _ = reply.send((request, channel));
        tracing::debug!(%request, "query submitted");

        // The per-query clock starts at submission.
        let timeout = overrides.timeout.unwrap_or(self.options.timeout);
        let timer_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_tx.send(request);
        });

        match self.state.clone() {
            AdapterState::Failed(reason) => {
                self.fail_request(request, SessionError::ProvisioningFailed(reason));
                return;
            }
            AdapterState::Unstarted => {
                let started = self
                    .adapter
                    .start(
                        self.events_tx.clone(),
                        &self.options,
                        self.session_id.clone(),
                    )
                    .await;
                if let Err(e) = started {
                    self.state = AdapterState::Failed(e.to_string());
                    self.fail_request(request, e);
                    return;
                }
                self.state = AdapterState::Provisioning;
            }
            AdapterState::Provisioning | AdapterState::Ready => {}
        }

        self.pending.push_back(PendingQuery {
            request,
            prompt,
            overrides,
        });
        self.flush_pending().await;
    }

    async fn handle_cancel(&mut self, request: RequestId) {
        if let Some(pos) = self.pending.iter().position(|p| p.request == request) {
            self.pending.remove(pos);
            self.router.close(request);
            return;
        }
        if self.router.close(request) {
            // Dequeue at the adapter; interrupt if it is the one in flight.
            let _ = self.adapter.cancel(request).await;
        }
    }

    async fn handle_timeout(&mut self, request: RequestId) {
        if let Some(pos) = self.pending.iter().position(|p| p.request == request) {
            self.pending.remove(pos);
            self.fail_request(request, SessionError::Timeout);
            return;
        }
        if self.router.contains(request) {
            tracing::warn!(%request, "query timed out");
            self.router.deliver(request, Err(SessionError::Timeout));
            self.router.close(request);
            let _ = self.adapter.cancel(request).await;
        }
    }

    async fn handle_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Message { request, message } => {
                // The last-observed session id is authoritative; the CLI may
                // mint a new one after compaction.
                if let Some(sid) = message.session_id() {
                    if self.session_id.as_deref() != Some(sid) {
                        tracing::debug!(session_id = sid, "caching resume id");
                        self.session_id = Some(sid.to_owned());
                    }
                }
                self.router.deliver(request, Ok(message));
            }
            AdapterEvent::Done { request, reason } => {
                match reason {
                    DoneReason::Completed | DoneReason::Cancelled => {
                        self.router.close(request);
                    }
                    DoneReason::Error(error) => {
                        if self.router.contains(request) {
                            self.router.deliver(request, Err(error));
                            self.router.close(request);
                        }
                    }
                }
                // The adapter freed a slot.
                self.flush_pending().await;
            }
            AdapterEvent::Error { request, error } => {
                // Non-terminal: surface it, keep the channel open.
                self.router.deliver(request, Err(error));
            }
            AdapterEvent::Status(status) => self.handle_status(status).await,
        }
    }

    async fn handle_status(&mut self, status: AdapterStatus) {
        match status {
            AdapterStatus::Provisioning => {
                self.state = AdapterState::Provisioning;
            }
            AdapterStatus::Ready => {
                self.state = AdapterState::Ready;
                self.seen_ready = true;
                self.flush_pending().await;
            }
            AdapterStatus::Failed(reason) => {
                if self.seen_ready {
                    // The subprocess died after a successful provision; the
                    // next submission restarts the adapter.
                    tracing::warn!(reason = %reason, "adapter failed; will restart on next query");
                    self.state = AdapterState::Unstarted;
                    self.seen_ready = false;
                    self.fail_pending(SessionError::AdapterExit(reason));
                } else {
                    tracing::error!(reason = %reason, "adapter provisioning failed");
                    self.state = AdapterState::Failed(reason.clone());
                    self.fail_pending(SessionError::ProvisioningFailed(reason));
                }
            }
        }
    }

    /// Hand queued queries to the adapter until it pushes back.
    async fn flush_pending(&mut self) {
        if self.state != AdapterState::Ready {
            return;
        }
        while let Some(front) = self.pending.front() {
            let submission = QuerySubmission {
                request: front.request,
                prompt: front.prompt.clone(),
                session_id: self.session_id.clone(),
                overrides: front.overrides.clone(),
            };
            match self.adapter.send_query(submission).await {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(SessionError::Busy) | Err(SessionError::NotReady) => break,
                Err(SessionError::ProvisioningFailed(reason)) => {
                    self.state = AdapterState::Failed(reason.clone());
                    self.fail_pending(SessionError::ProvisioningFailed(reason));
                    break;
                }
                Err(error) => {
                    if let Some(front) = self.pending.pop_front() {
                        self.fail_request(front.request, error);
                    }
                }
            }
        }
    }

    fn fail_request(&mut self, request: RequestId, error: SessionError) {
        self.router.deliver(request, Err(error));
        self.router.close(request);
    }

    fn fail_pending(&mut self, error: SessionError) {
        while let Some(p) = self.pending.pop_front() {
            self.fail_request(p.request, error.clone());
        }
    }
}
