//! Byte relay between a client connection and a remote shell.
//!
//! Each session owns one [`Relay`] that runs inside the session's task. The
//! rest of the bridge talks to it through a cloneable [`RelayHandle`]: input
//! and resize requests are queued in order and applied by the relay loop, so
//! the shell channel itself is never shared.
//!
//! Stdout and stderr are forwarded as `data` messages in the order each
//! stream produces them. No ordering is promised between the two streams.

use protocol::{ServerMessage, TerminalSize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ssh::{ShellChannel, ShellEvent, SshError};

/// Sender half of a client connection's outbound message queue.
pub type OutboundSender = mpsc::Sender<ServerMessage>;

/// Commands applied to the shell by the relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Write(Vec<u8>),
    Resize(TerminalSize),
}

/// Creates a connected handle/inbox pair.
///
/// The handle can be stored on a session before the shell exists; commands
/// sent before [`Relay::attach`] wait in the queue.
pub fn channel(capacity: usize) -> (RelayHandle, RelayInbox) {
    let (tx, rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();
    (
        RelayHandle {
            commands: tx,
            cancel: cancel.clone(),
        },
        RelayInbox {
            commands: rx,
            cancel,
        },
    )
}

/// Cloneable control handle for a running relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<ShellCommand>,
    cancel: CancellationToken,
}

impl RelayHandle {
    /// Queues bytes for the shell's stdin.
    ///
    /// Returns `false` if the relay has stopped; the bytes are dropped.
    pub async fn write(&self, data: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.commands.send(ShellCommand::Write(data)).await.is_ok()
    }

    /// Queues a window-size change.
    ///
    /// Non-positive dimensions are ignored and `None` is returned; the shell
    /// never sees them.
    pub async fn resize(&self, rows: i64, cols: i64) -> Option<TerminalSize> {
        let Some(size) = TerminalSize::from_dimensions(rows, cols) else {
            debug!(rows, cols, "Ignoring resize with invalid dimensions");
            return None;
        };
        if self.is_closed() {
            return None;
        }
        self.commands
            .send(ShellCommand::Resize(size))
            .await
            .ok()
            .map(|_| size)
    }

    /// Asks the relay loop to stop and close the shell.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.commands.is_closed()
    }
}

/// Receiving half consumed by [`Relay::attach`].
#[derive(Debug)]
pub struct RelayInbox {
    commands: mpsc::Receiver<ShellCommand>,
    cancel: CancellationToken,
}

/// Why a relay loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// [`RelayHandle::close`] was called or every handle was dropped.
    LocalClose,
    /// The remote shell closed its channel.
    RemoteClose { exit_status: Option<u32> },
    /// Writing to the shell failed.
    StreamError(SshError),
    /// The client's outbound queue is gone.
    ClientGone,
}

/// Incremental UTF-8 decoder for one output stream.
///
/// A multi-byte character split across two chunks is held back until the
/// rest arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete trailing sequence.
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left, replacing an incomplete tail.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Pumps bytes between one shell and one client.
pub struct Relay<S: ShellChannel> {
    session_id: String,
    shell: S,
    inbox: RelayInbox,
    outbound: OutboundSender,
    log_io: bool,
    stdout: Utf8Decoder,
    stderr: Utf8Decoder,
    exit_status: Option<u32>,
}

impl<S: ShellChannel> Relay<S> {
    /// Binds a shell to the inbox created by [`channel`] and the client's
    /// outbound queue.
    pub fn attach(
        session_id: impl Into<String>,
        shell: S,
        inbox: RelayInbox,
        outbound: OutboundSender,
        log_io: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            shell,
            inbox,
            outbound,
            log_io,
            stdout: Utf8Decoder::default(),
            stderr: Utf8Decoder::default(),
            exit_status: None,
        }
    }

    /// Runs until the session ends, then closes the shell.
    ///
    /// Every shell write and every outbound send also watches the cancel
    /// token, so a stalled remote or client cannot hold the handles open
    /// past teardown.
    pub async fn run(mut self) -> RelayExit {
        let exit = loop {
            // Unbiased: a flood of output must not starve input such as ^C,
            // and a long paste must not starve output.
            tokio::select! {
                _ = self.inbox.cancel.cancelled() => break RelayExit::LocalClose,

                command = self.inbox.commands.recv() => match command {
                    Some(ShellCommand::Write(data)) => {
                        if self.log_io {
                            debug!(
                                session_id = %self.session_id,
                                input = %String::from_utf8_lossy(&data),
                                "Shell input"
                            );
                        }
                        let written = tokio::select! {
                            biased;
                            _ = self.inbox.cancel.cancelled() => break RelayExit::LocalClose,
                            result = self.shell.write(&data) => result,
                        };
                        if let Err(e) = written {
                            break RelayExit::StreamError(e);
                        }
                    }
                    Some(ShellCommand::Resize(size)) => {
                        let resized = tokio::select! {
                            biased;
                            _ = self.inbox.cancel.cancelled() => break RelayExit::LocalClose,
                            result = self.shell.resize(size) => result,
                        };
                        if let Err(e) = resized {
                            break RelayExit::StreamError(e);
                        }
                        debug!(
                            session_id = %self.session_id,
                            rows = size.rows,
                            cols = size.cols,
                            "Terminal resized"
                        );
                    }
                    None => break RelayExit::LocalClose,
                },

                event = self.shell.next_event() => match event {
                    Some(ShellEvent::Stdout(bytes)) => {
                        let text = self.stdout.decode(&bytes);
                        let sent = tokio::select! {
                            biased;
                            _ = self.inbox.cancel.cancelled() => break RelayExit::LocalClose,
                            sent = forward(&self.outbound, &self.session_id, self.log_io, text, "stdout") => sent,
                        };
                        if !sent {
                            break RelayExit::ClientGone;
                        }
                    }
                    Some(ShellEvent::Stderr(bytes)) => {
                        let text = self.stderr.decode(&bytes);
                        let sent = tokio::select! {
                            biased;
                            _ = self.inbox.cancel.cancelled() => break RelayExit::LocalClose,
                            sent = forward(&self.outbound, &self.session_id, self.log_io, text, "stderr") => sent,
                        };
                        if !sent {
                            break RelayExit::ClientGone;
                        }
                    }
                    Some(ShellEvent::Exit(status)) => {
                        info!(session_id = %self.session_id, exit_status = status, "Remote shell exited");
                        self.exit_status = Some(status);
                    }
                    Some(ShellEvent::Eof) => {
                        debug!(session_id = %self.session_id, "Remote shell sent EOF");
                    }
                    None => {
                        let stdout = self.stdout.finish();
                        let stderr = self.stderr.finish();
                        forward(&self.outbound, &self.session_id, self.log_io, stdout, "stdout").await;
                        forward(&self.outbound, &self.session_id, self.log_io, stderr, "stderr").await;
                        break RelayExit::RemoteClose {
                            exit_status: self.exit_status,
                        };
                    }
                },
            }
        };

        self.shell.close().await;
        if let RelayExit::StreamError(ref e) = exit {
            warn!(session_id = %self.session_id, error = %e, "Shell stream failed");
        }
        exit
    }
}

/// Sends decoded output to the client. Returns `false` once the client is gone.
async fn forward(
    outbound: &OutboundSender,
    session_id: &str,
    log_io: bool,
    text: String,
    stream: &'static str,
) -> bool {
    if text.is_empty() {
        return true;
    }
    if log_io {
        debug!(session_id, stream, output = %text, "Shell output");
    }
    outbound.send(ServerMessage::Data(text)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::{MockShell, Script};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn outbound() -> (OutboundSender, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(16)
    }

    async fn next_data(rx: &mut mpsc::Receiver<ServerMessage>) -> String {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(ServerMessage::Data(text))) => text,
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let mut decoder = Utf8Decoder::default();
        let euro = "€".as_bytes();

        assert_eq!(decoder.decode(&[b'a', euro[0], euro[1]]), "a");
        assert_eq!(decoder.decode(&[euro[2], b'b']), "€b");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xff, b'y']), "x\u{FFFD}y");
    }

    #[test]
    fn test_decoder_finish_flushes_incomplete_tail() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[0xe2, 0x82]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_resize_rejects_non_positive() {
        let (handle, mut inbox) = channel(4);

        assert_eq!(handle.resize(0, 80).await, None);
        assert_eq!(handle.resize(24, -1).await, None);
        assert!(inbox.commands.try_recv().is_err());

        assert_eq!(
            handle.resize(40, 120).await,
            Some(TerminalSize { rows: 40, cols: 120 })
        );
        assert_eq!(
            inbox.commands.try_recv().unwrap(),
            ShellCommand::Resize(TerminalSize { rows: 40, cols: 120 })
        );
    }

    #[tokio::test]
    async fn test_write_after_close_is_dropped() {
        let (handle, mut inbox) = channel(4);
        handle.close();

        assert!(handle.is_closed());
        assert!(!handle.write(b"ls\n".to_vec()).await);
        assert!(inbox.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_forwards_output_and_input() {
        let (shell, script, trace) = MockShell::new(false);
        let (handle, inbox) = channel(8);
        let (tx, mut rx) = outbound();

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());

        script
            .send(Script::Event(ShellEvent::Stdout(b"$ ".to_vec())))
            .unwrap();
        assert_eq!(next_data(&mut rx).await, "$ ");

        script
            .send(Script::Event(ShellEvent::Stderr(b"warning\n".to_vec())))
            .unwrap();
        assert_eq!(next_data(&mut rx).await, "warning\n");

        assert!(handle.write(b"pwd\n".to_vec()).await);
        assert!(handle.resize(30, 100).await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.close();
        assert_eq!(task.await.unwrap(), RelayExit::LocalClose);

        assert_eq!(trace.writes(), vec![b"pwd\n".to_vec()]);
        assert_eq!(trace.sizes(), vec![TerminalSize { rows: 30, cols: 100 }]);
        assert!(trace.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_relay_reports_remote_close_with_exit_status() {
        let (shell, script, trace) = MockShell::new(false);
        let (_handle, inbox) = channel(8);
        let (tx, _rx) = outbound();

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());

        script.send(Script::Event(ShellEvent::Exit(3))).unwrap();
        script.send(Script::Event(ShellEvent::Eof)).unwrap();
        script.send(Script::Close).unwrap();

        assert_eq!(
            task.await.unwrap(),
            RelayExit::RemoteClose {
                exit_status: Some(3)
            }
        );
        assert!(trace.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_relay_write_failure_is_stream_error() {
        let (shell, _script, trace) = MockShell::new(false);
        trace.fail_writes.store(true, Ordering::SeqCst);
        let (handle, inbox) = channel(8);
        let (tx, _rx) = outbound();

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());
        handle.write(b"x".to_vec()).await;

        assert!(matches!(
            task.await.unwrap(),
            RelayExit::StreamError(SshError::Stream(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_stops_when_client_gone() {
        let (shell, script, _trace) = MockShell::new(false);
        let (_handle, inbox) = channel(8);
        let (tx, rx) = outbound();
        drop(rx);

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());
        script
            .send(Script::Event(ShellEvent::Stdout(b"late".to_vec())))
            .unwrap();

        assert_eq!(task.await.unwrap(), RelayExit::ClientGone);
    }

    #[tokio::test]
    async fn test_relay_applies_writes_in_order() {
        let (shell, _script, trace) = MockShell::new(false);
        let (handle, inbox) = channel(8);
        let (tx, _rx) = outbound();

        for chunk in ["a", "b", "c"] {
            assert!(handle.write(chunk.as_bytes().to_vec()).await);
        }

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.close();
        task.await.unwrap();

        assert_eq!(
            trace.writes(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_close_interrupts_stalled_write() {
        let (shell, _script, trace) = MockShell::new(false);
        trace.stall_writes.store(true, Ordering::SeqCst);
        let (handle, inbox) = channel(8);
        let (tx, _rx) = outbound();

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());
        assert!(handle.write(b"large paste".to_vec()).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.close();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay stuck in a stalled write")
            .unwrap();

        assert_eq!(exit, RelayExit::LocalClose);
        assert!(trace.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_interrupts_blocked_output() {
        let (shell, script, trace) = MockShell::new(false);
        let (handle, inbox) = channel(8);
        // A client that never reads: the outbound queue is already full.
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(ServerMessage::Close).unwrap();

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());
        script
            .send(Script::Event(ShellEvent::Stdout(b"output".to_vec())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.close();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay stuck sending output")
            .unwrap();

        assert_eq!(exit, RelayExit::LocalClose);
        assert!(trace.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_output_is_not_starved_by_queued_input() {
        let (shell, script, trace) = MockShell::new(false);
        let (handle, inbox) = channel(64);
        // Full outbound queue: the relay parks on the first output it reads.
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(ServerMessage::Close).unwrap();

        for _ in 0..64 {
            assert!(handle.write(b"x".to_vec()).await);
        }
        script
            .send(Script::Event(ShellEvent::Stdout(b"prompt".to_vec())))
            .unwrap();

        let task = tokio::spawn(Relay::attach("s1", shell, inbox, tx, false).run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Output was read while input was still queued.
        assert!(trace.writes().len() < 64);

        assert_eq!(rx.recv().await, Some(ServerMessage::Close));
        assert_eq!(next_data(&mut rx).await, "prompt");
        handle.close();
        task.await.unwrap();
    }

    /// A shell that is `Send` but not `Sync`, like a channel with interior state.
    struct SendOnlyShell(std::cell::Cell<bool>);

    #[async_trait::async_trait]
    impl ShellChannel for SendOnlyShell {
        async fn next_event(&mut self) -> Option<ShellEvent> {
            None
        }

        async fn write(&mut self, _data: &[u8]) -> Result<(), SshError> {
            Ok(())
        }

        async fn resize(&mut self, _size: TerminalSize) -> Result<(), SshError> {
            Ok(())
        }

        async fn close(&mut self) {
            self.0.set(true);
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_relay_runs_on_send_only_shell() {
        let (_handle, inbox) = channel(1);
        let (tx, _rx) = outbound();

        let run = Relay::attach("s1", SendOnlyShell(std::cell::Cell::new(false)), inbox, tx, false).run();
        assert_send(&run);

        let exit = tokio::spawn(run).await.unwrap();
        assert_eq!(exit, RelayExit::RemoteClose { exit_status: None });
    }
}
