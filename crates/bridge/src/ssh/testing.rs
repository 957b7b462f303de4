//! Scripted connector and shell for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use protocol::{Credential, Target, TerminalSize};
use tokio::sync::mpsc;

use super::{ConnectOptions, ShellChannel, ShellEvent, SshClient, SshConnector, SshError};

/// Instructions fed to a [`MockShell`].
#[derive(Debug)]
pub(crate) enum Script {
    Event(ShellEvent),
    Close,
}

/// Shared view of what a [`MockShell`] has been asked to do.
#[derive(Debug, Clone, Default)]
pub(crate) struct ShellTrace {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    sizes: Arc<Mutex<Vec<TerminalSize>>>,
    pub closed: Arc<AtomicBool>,
    pub fail_writes: Arc<AtomicBool>,
    /// Writes never complete, like a remote that stops reading stdin.
    pub stall_writes: Arc<AtomicBool>,
}

impl ShellTrace {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn sizes(&self) -> Vec<TerminalSize> {
        self.sizes.lock().unwrap().clone()
    }
}

pub(crate) struct MockShell {
    script: mpsc::UnboundedReceiver<Script>,
    echo: Option<mpsc::UnboundedSender<Script>>,
    trace: ShellTrace,
    done: bool,
}

impl MockShell {
    /// A shell driven by the returned sender. With `echo`, every write is
    /// also emitted as stdout.
    pub fn new(echo: bool) -> (Self, mpsc::UnboundedSender<Script>, ShellTrace) {
        let (tx, rx) = mpsc::unbounded_channel();
        let trace = ShellTrace::default();
        let shell = Self {
            script: rx,
            echo: echo.then(|| tx.clone()),
            trace: trace.clone(),
            done: false,
        };
        (shell, tx, trace)
    }
}

#[async_trait]
impl ShellChannel for MockShell {
    async fn next_event(&mut self) -> Option<ShellEvent> {
        if self.done {
            return None;
        }
        match self.script.recv().await {
            Some(Script::Event(event)) => Some(event),
            Some(Script::Close) | None => {
                self.done = true;
                None
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), SshError> {
        if self.trace.fail_writes.load(Ordering::SeqCst) {
            return Err(SshError::Stream("broken pipe".to_string()));
        }
        if self.trace.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.trace.writes.lock().unwrap().push(data.to_vec());
        if let Some(echo) = &self.echo {
            let _ = echo.send(Script::Event(ShellEvent::Stdout(data.to_vec())));
        }
        Ok(())
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), SshError> {
        self.trace.sizes.lock().unwrap().push(size);
        Ok(())
    }

    async fn close(&mut self) {
        self.trace.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct MockClient {
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl SshClient for MockClient {
    async fn disconnect(&mut self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector whose outcome is fixed at construction.
#[derive(Default)]
pub(crate) struct MockConnector {
    connect_error: Option<SshError>,
    shell_error: Option<SshError>,
    connect_delay: Duration,
    echo: bool,
    shells: Mutex<Vec<(mpsc::UnboundedSender<Script>, ShellTrace)>>,
    opened_sizes: Mutex<Vec<TerminalSize>>,
    pub connects: AtomicUsize,
    pub disconnects: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Succeeds and opens echoing shells.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn failing_connect(error: SshError) -> Self {
        Self {
            connect_error: Some(error),
            ..Self::default()
        }
    }

    pub fn failing_shell(error: SshError) -> Self {
        Self {
            shell_error: Some(error),
            ..Self::default()
        }
    }

    /// Succeeds after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            echo: true,
            ..Self::default()
        }
    }

    /// Script sender and trace of the `index`th opened shell.
    pub fn shell(&self, index: usize) -> (mpsc::UnboundedSender<Script>, ShellTrace) {
        self.shells.lock().unwrap()[index].clone()
    }

    pub fn shell_count(&self) -> usize {
        self.shells.lock().unwrap().len()
    }

    pub fn opened_sizes(&self) -> Vec<TerminalSize> {
        self.opened_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SshConnector for MockConnector {
    type Client = MockClient;
    type Shell = MockShell;

    async fn connect(
        &self,
        _target: &Target,
        _credential: &Credential,
        _options: &ConnectOptions,
    ) -> Result<MockClient, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        match &self.connect_error {
            Some(error) => Err(error.clone()),
            None => Ok(MockClient {
                disconnects: Arc::clone(&self.disconnects),
            }),
        }
    }

    async fn open_shell(
        &self,
        _client: &mut MockClient,
        size: TerminalSize,
        _term_type: &str,
    ) -> Result<MockShell, SshError> {
        if let Some(error) = &self.shell_error {
            return Err(error.clone());
        }
        let (shell, script, trace) = MockShell::new(self.echo);
        self.shells.lock().unwrap().push((script, trace));
        self.opened_sizes.lock().unwrap().push(size);
        Ok(shell)
    }
}
