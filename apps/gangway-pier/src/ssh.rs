//! SSH shell sessions.
//!
//! One pump task owns the channel: shell output flows out through a channel
//! that backs the relay's endpoint reader, while stdin writes, window changes
//! and stdin-EOF arrive over a command queue, which also keeps them in order
//! relative to each other.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gangway_relay::{EndpointReader, EndpointWriter, ResizeTarget, WindowSize};
use russh::client::{self, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{AuthMethod, SshConfig};
use crate::error::SetupError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const TERM: &str = "linux";
/// Modes requested for the remote PTY: local echo, 14.4 kbaud both ways.
const PTY_MODES: [(Pty, u32); 3] = [
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14_400),
    (Pty::TTY_OP_OSPEED, 14_400),
];

struct PierHandler;

#[async_trait]
impl client::Handler for PierHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not verified; the pier trusts the network it proxies
        // into.
        warn!("accepting ssh host key without verification");
        Ok(true)
    }
}

enum ShellCommand {
    Write(Bytes),
    Resize(WindowSize),
    CloseStdin,
}

/// A started shell on a remote host, exposed as relay endpoint halves.
pub struct ShellSession {
    commands: mpsc::UnboundedSender<ShellCommand>,
    output: Option<ShellOutput>,
    pump: JoinHandle<()>,
    handle: client::Handle<PierHandler>,
}

impl ShellSession {
    /// Dial the target, authenticate, and start a shell on a fresh PTY with
    /// the given geometry.
    pub async fn connect(
        config: &SshConfig,
        host: &str,
        size: WindowSize,
    ) -> Result<Self, SetupError> {
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:22")
        };

        let ssh_config = Arc::new(client::Config::default());
        let mut handle = timeout(
            CONNECT_TIMEOUT,
            client::connect(ssh_config, addr.as_str(), PierHandler),
        )
        .await
        .map_err(|_| SetupError::DialTimeout { addr: addr.clone() })?
        .map_err(|source| SetupError::Dial {
            addr: addr.clone(),
            source,
        })?;

        let authenticated = match &config.auth {
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(config.user.as_str(), password.as_str())
                    .await?
            }
            AuthMethod::Key(key) => {
                handle
                    .authenticate_publickey(config.user.as_str(), Arc::clone(key))
                    .await?
            }
            AuthMethod::None => handle.authenticate_none(config.user.as_str()).await?,
        };
        if !authenticated {
            return Err(SetupError::AuthenticationRejected {
                user: config.user.clone(),
                addr,
            });
        }

        let mut channel = handle.channel_open_session().await?;
        channel
            .request_pty(
                true,
                TERM,
                u32::from(size.cols),
                u32::from(size.rows),
                0,
                0,
                &PTY_MODES,
            )
            .await?;
        wait_for_reply(&mut channel, "pty", &addr).await?;
        channel.request_shell(true).await?;
        wait_for_reply(&mut channel, "shell", &addr).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_channel(channel, command_rx, output_tx));

        Ok(Self {
            commands: command_tx,
            output: Some(ShellOutput { chunks: output_rx }),
            pump,
            handle,
        })
    }

    pub fn take_output(&mut self) -> ShellOutput {
        self.output.take().expect("shell output already taken")
    }

    pub fn stdin(&self) -> ShellInput {
        ShellInput {
            commands: self.commands.clone(),
        }
    }

    pub fn resize_target(&self) -> ShellResize {
        ShellResize {
            commands: self.commands.clone(),
        }
    }

    /// Tear the session down. Dropping the command queue stops the pump, and
    /// the disconnect releases anything still blocked on channel I/O.
    pub async fn close(self) {
        let ShellSession {
            commands,
            output,
            pump,
            mut handle,
        } = self;
        drop(commands);
        drop(output);
        let _ = handle
            .disconnect(Disconnect::ByApplication, "session closed", "")
            .await;
        let mut pump = pump;
        if timeout(SHUTDOWN_GRACE, &mut pump).await.is_err() {
            warn!("shell pump did not stop in time; aborting");
            pump.abort();
            let _ = pump.await;
        }
    }
}

async fn wait_for_reply(
    channel: &mut Channel<Msg>,
    request: &'static str,
    addr: &str,
) -> Result<(), SetupError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(SetupError::RequestRejected {
                    request,
                    addr: addr.to_string(),
                })
            }
            Some(other) => {
                debug!(message = ?other, "ignoring channel message while awaiting reply");
            }
            None => return Err(SetupError::ChannelClosed),
        }
    }
}

enum Step {
    Shell(Option<ChannelMsg>),
    Relay(Option<ShellCommand>),
}

async fn pump_channel(
    mut channel: Channel<Msg>,
    mut commands: mpsc::UnboundedReceiver<ShellCommand>,
    output: mpsc::UnboundedSender<io::Result<Bytes>>,
) {
    loop {
        let step = {
            let wait = channel.wait();
            tokio::pin!(wait);
            tokio::select! {
                message = &mut wait => Step::Shell(message),
                command = commands.recv() => Step::Relay(command),
            }
        };
        match step {
            Step::Shell(Some(ChannelMsg::Data { data })) => {
                if output.send(Ok(Bytes::copy_from_slice(&data))).is_err() {
                    break;
                }
            }
            // With a PTY the shell's stderr is already merged; extended data
            // still gets forwarded in case the server sends any.
            Step::Shell(Some(ChannelMsg::ExtendedData { data, .. })) => {
                if output.send(Ok(Bytes::copy_from_slice(&data))).is_err() {
                    break;
                }
            }
            Step::Shell(Some(ChannelMsg::ExitStatus { exit_status })) => {
                debug!(exit_status, "shell exited");
            }
            Step::Shell(Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None) => break,
            Step::Shell(Some(_)) => {}
            Step::Relay(Some(ShellCommand::Write(payload))) => {
                if let Err(err) = channel.data(&payload[..]).await {
                    let _ = output.send(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        err.to_string(),
                    )));
                    break;
                }
            }
            Step::Relay(Some(ShellCommand::Resize(size))) => {
                if let Err(err) = channel
                    .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
                    .await
                {
                    warn!(%size, error = %err, "window change rejected");
                }
            }
            Step::Relay(Some(ShellCommand::CloseStdin)) => {
                let _ = channel.eof().await;
            }
            Step::Relay(None) => {
                let _ = channel.close().await;
                break;
            }
        }
    }
    // Dropping `output` is the end-of-stream signal for the endpoint reader.
}

/// Shell output as the relay's endpoint reader.
pub struct ShellOutput {
    chunks: mpsc::UnboundedReceiver<io::Result<Bytes>>,
}

#[async_trait]
impl EndpointReader for ShellOutput {
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.chunks.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Shell stdin as the relay's endpoint writer.
pub struct ShellInput {
    commands: mpsc::UnboundedSender<ShellCommand>,
}

#[async_trait]
impl EndpointWriter for ShellInput {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.commands
            .send(ShellCommand::Write(Bytes::copy_from_slice(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "shell session ended"))
    }

    async fn close(&mut self) -> io::Result<()> {
        let _ = self.commands.send(ShellCommand::CloseStdin);
        Ok(())
    }
}

/// Window geometry consumer backed by the shell's PTY.
pub struct ShellResize {
    commands: mpsc::UnboundedSender<ShellCommand>,
}

impl ResizeTarget for ShellResize {
    fn apply(&self, size: WindowSize) -> io::Result<()> {
        self.commands
            .send(ShellCommand::Resize(size))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "shell session ended"))
    }
}
