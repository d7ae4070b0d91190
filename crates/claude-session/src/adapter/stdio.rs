//! Default adapter: drives the real CLI over stdio.
//!
//! The handle the session holds is thin; the work happens in a sibling task
//! that owns the subprocess, its pipes, the scratch workspace, and the FIFO
//! of submitted queries. The task serializes queries (the CLI is strictly
//! one-request-at-a-time), attributes decoded stdout frames to the
//! currently-owning request, and turns process death into terminal events
//! for everything still outstanding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot};

use crate::adapter::{
    input_frame, Adapter, AdapterEvent, AdapterEventSender, AdapterStatus, DoneReason, Health,
    QuerySubmission, RequestId,
};
use crate::decode;
use crate::error::SessionError;
use crate::framer::LineFramer;
use crate::options::SessionOptions;

/// Build the CLI argument vector.
///
/// `--resume` must precede every other flag; the fixed stream-json arguments
/// follow, then the conditional options and any opaque passthrough flags.
pub fn build_argv(options: &SessionOptions, resume: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if let Some(id) = resume {
        args.push("--resume".into());
        args.push(id.into());
    }
    for fixed in [
        "--output-format",
        "stream-json",
        "--verbose",
        "--print",
        "--input-format",
        "stream-json",
    ] {
        args.push(fixed.into());
    }
    if let Some(model) = &options.model {
        args.push("--model".into());
        args.push(model.clone());
    }
    if let Some(prompt) = &options.system_prompt {
        args.push("--system-prompt".into());
        args.push(prompt.clone());
    }
    if !options.allowed_tools.is_empty() {
        args.push("--allowedTools".into());
        args.push(options.allowed_tools.join(","));
    }
    for dir in &options.add_dirs {
        args.push("--add-dir".into());
        args.push(dir.display().to_string());
    }
    if options.permission_mode != crate::message::PermissionMode::Default {
        args.push("--permission-mode".into());
        args.push(options.permission_mode.as_str().into());
    }
    if let Some(mcp) = &options.mcp_config {
        args.push("--mcp-config".into());
        args.push(mcp.clone());
    }
    if options.include_partial_messages {
        args.push("--include-partial-messages".into());
    }
    args.extend(options.extra_args.iter().cloned());
    args
}

enum Command {
    Send(QuerySubmission),
    Cancel(RequestId),
    Interrupt,
    Stop(oneshot::Sender<()>),
}

#[derive(Debug)]
struct Shared {
    status: AdapterStatus,
    stopped: bool,
    outstanding: usize,
}

/// The handle half of the stdio adapter. See the module docs for the split
/// between handle and task.
pub struct StdioAdapter {
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    shared: Arc<Mutex<Shared>>,
    queue_limit: usize,
}

impl StdioAdapter {
    pub fn new() -> Self {
        StdioAdapter {
            cmd_tx: None,
            shared: Arc::new(Mutex::new(Shared {
                status: AdapterStatus::Provisioning,
                stopped: false,
                outstanding: 0,
            })),
            queue_limit: 64,
        }
    }
}

impl Default for StdioAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for StdioAdapter {
    async fn start(
        &mut self,
        events: AdapterEventSender,
        options: &SessionOptions,
        resume: Option<String>,
    ) -> Result<(), SessionError> {
        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            shared.status = AdapterStatus::Provisioning;
            shared.stopped = false;
            shared.outstanding = 0;
        }
        self.queue_limit = options.queue_limit;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.cmd_tx = Some(cmd_tx);
        tokio::spawn(run(
            options.clone(),
            resume,
            events,
            cmd_rx,
            Arc::clone(&self.shared),
        ));
        Ok(())
    }

    async fn send_query(&mut self, submission: QuerySubmission) -> Result<(), SessionError> {
        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            if shared.stopped {
                return Err(SessionError::Closed);
            }
            match &shared.status {
                AdapterStatus::Provisioning => return Err(SessionError::NotReady),
                AdapterStatus::Failed(reason) => {
                    return Err(SessionError::ProvisioningFailed(reason.clone()))
                }
                AdapterStatus::Ready => {}
            }
            if shared.outstanding >= self.queue_limit {
                return Err(SessionError::Busy);
            }
            shared.outstanding += 1;
        }
        self.cmd_tx
            .as_ref()
            .ok_or_else(|| SessionError::AdapterExit("adapter was never started".into()))?
            .send(Command::Send(submission))
            .map_err(|_| SessionError::AdapterExit("adapter task is gone".into()))
    }

    async fn cancel(&mut self, request: RequestId) -> Result<(), SessionError> {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(Command::Cancel(request));
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), SessionError> {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(Command::Interrupt);
        }
        Ok(())
    }

    fn health(&self) -> Health {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.stopped {
            return Health::Unhealthy("stopped".into());
        }
        match &shared.status {
            AdapterStatus::Ready => Health::Healthy,
            AdapterStatus::Provisioning => Health::Degraded,
            AdapterStatus::Failed(reason) => Health::Unhealthy(reason.clone()),
        }
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if let Some(tx) = self.cmd_tx.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(Command::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).stopped = true;
        Ok(())
    }
}

// ─── The adapter task ─────────────────────────────────────────────────────

async fn run(
    options: SessionOptions,
    resume: Option<String>,
    events: AdapterEventSender,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Mutex<Shared>>,
) {
    let _ = events.send(AdapterEvent::Status(AdapterStatus::Provisioning));

    // Scratch workspace; removed when this task ends, stop or crash alike.
    let workspace = match TempDir::new() {
        Ok(dir) => dir,
        Err(e) => {
            let reason = format!("could not create workspace: {e}");
            provision_failed(reason, events, cmd_rx, shared).await;
            return;
        }
    };

    let argv = build_argv(&options, resume.as_deref());
    tracing::debug!(binary = %options.binary.display(), ?argv, "spawning CLI");

    let mut cmd = ProcessCommand::new(&options.binary);
    cmd.args(&argv)
        .current_dir(options.cwd.as_deref().unwrap_or_else(|| workspace.path()))
        .envs(&options.env)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    // The CLI refuses to run nested inside another session.
    cmd.env_remove("CLAUDECODE");

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let error = classify_spawn_error(&options, &e);
            provision_failed(error.to_string(), events, cmd_rx, shared).await;
            return;
        }
    };

    let (stdin, mut stdout, stderr) = match (
        child.stdin.take(),
        child.stdout.take(),
        child.stderr.take(),
    ) {
        (Some(i), Some(o), Some(e)) => (i, o, e),
        _ => {
            let _ = child.start_kill();
            provision_failed("stdio pipes not captured".into(), events, cmd_rx, shared).await;
            return;
        }
    };

    // Stderr is out-of-band diagnostics only.
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.is_empty() {
                tracing::debug!(stderr = %line, "CLI stderr");
            }
        }
    });

    set_status(&shared, AdapterStatus::Ready);
    let _ = events.send(AdapterEvent::Status(AdapterStatus::Ready));

    let mut driver = Driver {
        events,
        shared,
        child,
        stdin,
        framer: LineFramer::new().with_max_line_size(options.max_line_size),
        queue: VecDeque::new(),
        in_flight: None,
        grace: None,
        options,
    };
    let mut read_buf = [0u8; 8192];

    loop {
        let grace = driver.grace;
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(sub)) => {
                    driver.queue.push_back(sub);
                    if driver.pump().await.is_err() {
                        break;
                    }
                }
                Some(Command::Cancel(request)) => driver.handle_cancel(request),
                Some(Command::Interrupt) => driver.interrupt_in_flight(),
                Some(Command::Stop(ack)) => {
                    driver.shutdown().await;
                    let _ = ack.send(());
                    return;
                }
                None => {
                    // Session dropped the handle; take the subprocess down.
                    let _ = driver.child.start_kill();
                    return;
                }
            },
            read = stdout.read(&mut read_buf) => match read {
                Ok(0) => {
                    driver.handle_eof().await;
                    break;
                }
                Ok(n) => {
                    if driver.consume_bytes(&read_buf[..n]).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    driver
                        .fail_all(SessionError::SubprocessExit(format!("stdout read: {e}")))
                        .await;
                    break;
                }
            },
            _ = async {
                match grace {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                tracing::warn!("interrupt grace period elapsed; killing subprocess");
                let _ = driver.child.start_kill();
                driver.grace = None;
            }
        }
    }

    // Keep draining commands until the handle goes away so late cancels and
    // stops get an answer instead of hanging.
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Send(sub) => driver.finish_request(
                sub.request,
                DoneReason::Error(SessionError::SubprocessExit("subprocess is gone".into())),
            ),
            Command::Stop(ack) => {
                let _ = ack.send(());
                return;
            }
            Command::Cancel(_) | Command::Interrupt => {}
        }
    }
    drop(workspace);
}

struct Driver {
    events: AdapterEventSender,
    shared: Arc<Mutex<Shared>>,
    child: Child,
    stdin: ChildStdin,
    framer: LineFramer,
    queue: VecDeque<QuerySubmission>,
    in_flight: Option<RequestId>,
    grace: Option<tokio::time::Instant>,
    options: SessionOptions,
}

impl Driver {
    /// Feed freshly-read stdout bytes through the framer and decoder.
    /// A framer failure is fatal for the subprocess; a decode failure drops
    /// the line and continues.
    async fn consume_bytes(&mut self, bytes: &[u8]) -> Result<(), ()> {
        let lines = match self.framer.feed(bytes) {
            Ok(lines) => lines,
            Err(e) => {
                self.fail_all(SessionError::Framer(e)).await;
                return Err(());
            }
        };
        for line in lines {
            if self.handle_line(&line).await.is_err() {
                return Err(());
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), ()> {
        let message = match decode::decode_line(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, line = %truncate(line), "dropping undecodable line");
                return Ok(());
            }
        };
        let Some(request) = self.in_flight else {
            tracing::warn!(
                message_type = message.type_name(),
                "dropping message with no owning request"
            );
            return Ok(());
        };
        let terminal = message.is_terminal();
        let _ = self.events.send(AdapterEvent::Message { request, message });
        if terminal {
            self.grace = None;
            self.in_flight = None;
            self.finish_request(request, DoneReason::Completed);
            if self.pump().await.is_err() {
                return Err(());
            }
        }
        Ok(())
    }

    /// Start the next queued query if nothing is in flight: one NDJSON user
    /// frame on stdin, then the subprocess owns the output until a terminal.
    async fn pump(&mut self) -> Result<(), ()> {
        if self.in_flight.is_some() {
            return Ok(());
        }
        let Some(sub) = self.queue.pop_front() else {
            return Ok(());
        };
        let session_id = sub
            .overrides
            .session_id
            .as_deref()
            .or(sub.session_id.as_deref());
        let frame = input_frame(
            &sub.prompt,
            session_id,
            sub.overrides.parent_tool_use_id.as_deref(),
        );
        let mut line = frame.to_string();
        line.push('\n');
        tracing::debug!(request = %sub.request, "writing query frame");
        if let Err(e) = self.write_frame(line.as_bytes()).await {
            let error = SessionError::WriteFailed(e.to_string());
            self.finish_request(sub.request, DoneReason::Error(error.clone()));
            self.fail_all(error).await;
            return Err(());
        }
        self.in_flight = Some(sub.request);
        Ok(())
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(bytes).await?;
        self.stdin.flush().await
    }

    fn handle_cancel(&mut self, request: RequestId) {
        if self.in_flight == Some(request) {
            self.interrupt_in_flight();
            return;
        }
        if let Some(pos) = self.queue.iter().position(|s| s.request == request) {
            self.queue.remove(pos);
            self.finish_request(request, DoneReason::Cancelled);
        }
    }

    fn interrupt_in_flight(&mut self) {
        if self.in_flight.is_none() {
            return;
        }
        send_interrupt(&mut self.child);
        // The CLI is expected to answer with a Result or exit; if neither
        // happens within the grace period the subprocess is killed.
        self.grace = Some(tokio::time::Instant::now() + self.options.grace_period());
    }

    async fn handle_eof(&mut self) {
        match self.framer.finish() {
            Ok(Some(line)) => {
                let _ = self.handle_line(&line).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "discarding partial line at EOF"),
        }
        let status = match self.child.wait().await {
            Ok(status) => format!("{status}"),
            Err(e) => format!("wait failed: {e}"),
        };
        let interrupted = self.grace.is_some();
        if let Some(request) = self.in_flight.take() {
            let reason = if interrupted {
                SessionError::Interrupted
            } else {
                SessionError::SubprocessExit(status.clone())
            };
            self.finish_request(request, DoneReason::Error(reason));
        }
        while let Some(sub) = self.queue.pop_front() {
            self.finish_request(
                sub.request,
                DoneReason::Error(SessionError::SubprocessExit(status.clone())),
            );
        }
        let reason = format!("subprocess exited ({status})");
        set_status(&self.shared, AdapterStatus::Failed(reason.clone()));
        let _ = self
            .events
            .send(AdapterEvent::Status(AdapterStatus::Failed(reason)));
    }

    /// Transport-level failure: kill the subprocess and fail everything.
    async fn fail_all(&mut self, error: SessionError) {
        tracing::error!(error = %error, "transport failure; aborting all requests");
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        if let Some(request) = self.in_flight.take() {
            self.finish_request(request, DoneReason::Error(error.clone()));
        }
        while let Some(sub) = self.queue.pop_front() {
            self.finish_request(sub.request, DoneReason::Error(error.clone()));
        }
        set_status(&self.shared, AdapterStatus::Failed(error.to_string()));
        let _ = self
            .events
            .send(AdapterEvent::Status(AdapterStatus::Failed(error.to_string())));
    }

    async fn shutdown(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        if let Some(request) = self.in_flight.take() {
            self.finish_request(request, DoneReason::Cancelled);
        }
        while let Some(sub) = self.queue.pop_front() {
            self.finish_request(sub.request, DoneReason::Cancelled);
        }
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.stopped = true;
    }

    fn finish_request(&self, request: RequestId, reason: DoneReason) {
        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            shared.outstanding = shared.outstanding.saturating_sub(1);
        }
        let _ = self.events.send(AdapterEvent::Done { request, reason });
    }
}

async fn provision_failed(
    reason: String,
    events: AdapterEventSender,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Mutex<Shared>>,
) {
    tracing::error!(reason = %reason, "adapter provisioning failed");
    set_status(&shared, AdapterStatus::Failed(reason.clone()));
    let _ = events.send(AdapterEvent::Status(AdapterStatus::Failed(reason.clone())));
    // Answer anything that raced in before the status flipped.
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Send(sub) => {
                {
                    let mut shared = shared.lock().unwrap_or_else(|e| e.into_inner());
                    shared.outstanding = shared.outstanding.saturating_sub(1);
                }
                let _ = events.send(AdapterEvent::Done {
                    request: sub.request,
                    reason: DoneReason::Error(SessionError::ProvisioningFailed(reason.clone())),
                });
            }
            Command::Stop(ack) => {
                let _ = ack.send(());
                return;
            }
            Command::Cancel(_) | Command::Interrupt => {}
        }
    }
}

fn set_status(shared: &Arc<Mutex<Shared>>, status: AdapterStatus) {
    shared.lock().unwrap_or_else(|e| e.into_inner()).status = status;
}

fn classify_spawn_error(options: &SessionOptions, e: &std::io::Error) -> SessionError {
    let binary = options.binary.display();
    match e.kind() {
        std::io::ErrorKind::NotFound => SessionError::CliNotFound(binary.to_string()),
        std::io::ErrorKind::PermissionDenied => {
            SessionError::InvalidBinary(format!("{binary}: {e}"))
        }
        _ => SessionError::ProvisioningFailed(format!("spawn {binary}: {e}")),
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SIGINT, same as ^C at the CLI's own terminal.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) {
    let _ = child.start_kill();
}

fn truncate(line: &str) -> String {
    const MAX: usize = 200;
    if line.chars().count() > MAX {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}…")
    } else {
        line.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PermissionMode;
    use std::path::PathBuf;

    #[test]
    fn argv_starts_with_fixed_stream_json_flags() {
        let argv = build_argv(&SessionOptions::default(), None);
        assert_eq!(
            argv,
            vec![
                "--output-format",
                "stream-json",
                "--verbose",
                "--print",
                "--input-format",
                "stream-json"
            ]
        );
    }

    #[test]
    fn resume_precedes_every_other_flag() {
        let options = SessionOptions {
            model: Some("claude-sonnet-4-6".into()),
            ..Default::default()
        };
        let argv = build_argv(&options, Some("sess-B"));
        assert_eq!(argv[0], "--resume");
        assert_eq!(argv[1], "sess-B");
        assert_eq!(argv[2], "--output-format");
    }

    #[test]
    fn conditional_flags_are_passed_through() {
        let options = SessionOptions {
            model: Some("m1".into()),
            system_prompt: Some("be brief".into()),
            allowed_tools: vec!["Read".into(), "Bash".into()],
            add_dirs: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            permission_mode: PermissionMode::AcceptEdits,
            mcp_config: Some("{\"mcpServers\":{}}".into()),
            include_partial_messages: true,
            extra_args: vec!["--debug".into()],
            ..Default::default()
        };
        let argv = build_argv(&options, None);
        let joined = argv.join(" ");
        assert!(joined.contains("--model m1"));
        assert!(joined.contains("--system-prompt be brief"));
        assert!(joined.contains("--allowedTools Read,Bash"));
        assert!(joined.contains("--add-dir /a"));
        assert!(joined.contains("--add-dir /b"));
        assert!(joined.contains("--permission-mode acceptEdits"));
        assert!(joined.contains("--mcp-config"));
        assert!(joined.contains("--include-partial-messages"));
        assert!(joined.ends_with("--debug"));
    }

    #[test]
    fn default_permission_mode_adds_no_flag() {
        let argv = build_argv(&SessionOptions::default(), None);
        assert!(!argv.iter().any(|a| a == "--permission-mode"));
    }
}
