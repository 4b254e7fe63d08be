//! Persistent TCP control link to the power agent running on the PC.
//!
//! The wire protocol is deliberately bare: a command is written as raw UTF-8
//! with no delimiter, and the reply is whatever arrives in a single read of at
//! most [`READ_BUFFER_SIZE`] bytes.  Replies longer than one read are
//! truncated.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use onoffpc_config::LinkConfig;

/// Returned by [`RemoteLink::send`] whenever the command could not be
/// delivered or no reply arrived.
pub const FAILURE_REPLY: &str = "Failed to send the command.";

pub const READ_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub host: String,
    pub port: u16,
    /// Pause between failed connection attempts.  Constant, no growth.
    pub reconnect_delay: Duration,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// How long to wait for the agent's reply after a command is flushed.
    pub read_timeout: Duration,
}

impl LinkSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&LinkConfig> for LinkSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        }
    }
}

#[derive(Debug, Error)]
enum ExchangeError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("agent closed the connection")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One long-lived connection to the agent.
///
/// All socket work (connect attempts and command exchanges) happens inside a
/// single async mutex, so at most one attempt or one command is on the wire at
/// a time.  The connection state is published on a `watch` channel and can be
/// read without waiting for that mutex.
pub struct RemoteLink {
    settings: LinkSettings,
    stream: Mutex<Option<TcpStream>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl RemoteLink {
    pub fn new(settings: LinkSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            stream: Mutex::new(None),
            state_tx,
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Keeps trying until a connection is open.  Never gives up.
    pub async fn connect(&self) {
        loop {
            {
                let mut slot = self.stream.lock().await;
                if self.attempt(&mut slot).await {
                    return;
                }
            }
            tokio::time::sleep(self.settings.reconnect_delay).await;
        }
    }

    /// One bounded connection attempt; `true` if the link is (now) open.
    pub async fn try_connect(&self) -> bool {
        let mut slot = self.stream.lock().await;
        self.attempt(&mut slot).await
    }

    /// Spawns the background task that reconnects whenever the link drops.
    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let link = Arc::clone(self);
        let mut state_rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                link.connect().await;
                // Park until the link is anything but connected.  A missed
                // `Disconnected` or an abandoned attempt still wakes us.
                if state_rx
                    .wait_for(|state| !state.is_connected())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    }

    /// Sends `command` and returns the agent's reply, or [`FAILURE_REPLY`].
    ///
    /// If the link is down, one connection attempt is made first; when that
    /// fails the call returns immediately and reconnection is left to the
    /// supervisor.  A send is therefore bounded by one connect timeout plus
    /// one read timeout.
    pub async fn send(&self, command: &str) -> String {
        let mut slot = self.stream.lock().await;
        if !self.attempt(&mut slot).await {
            return FAILURE_REPLY.to_string();
        }
        let Some(mut stream) = slot.take() else {
            return FAILURE_REPLY.to_string();
        };

        // The stream stays out of the slot while the exchange runs.  If this
        // future is dropped midway the half-used socket goes with it and the
        // guard marks the link disconnected.
        let guard = DisconnectGuard { link: self };
        info!(command, "sending command to agent");
        match self.exchange(&mut stream, command).await {
            Ok(reply) => {
                *slot = Some(stream);
                guard.defuse();
                info!(command, reply = %reply, "agent replied");
                reply
            }
            Err(err) => {
                warn!(command, %err, "command failed; dropping connection");
                FAILURE_REPLY.to_string()
            }
        }
    }

    async fn attempt(&self, slot: &mut Option<TcpStream>) -> bool {
        if slot.is_some() {
            if !self.is_connected() {
                self.set_state(ConnectionState::Connected);
            }
            return true;
        }

        let address = self.settings.address();
        info!(%address, "connecting to agent");
        self.set_state(ConnectionState::Connecting);
        // Failed or abandoned attempts fall back to `Disconnected` on drop.
        let guard = DisconnectGuard { link: self };
        let connect = TcpStream::connect((self.settings.host.as_str(), self.settings.port));
        match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                *slot = Some(stream);
                guard.defuse();
                self.set_state(ConnectionState::Connected);
                info!(%address, "connected to agent");
                true
            }
            Ok(Err(err)) => {
                warn!(%address, %err, retry_in = ?self.settings.reconnect_delay, "agent connection failed");
                false
            }
            Err(_) => {
                warn!(%address, timeout = ?self.settings.connect_timeout, "agent connection timed out");
                false
            }
        }
    }

    async fn exchange(&self, stream: &mut TcpStream, command: &str) -> Result<String, ExchangeError> {
        stream.write_all(command.as_bytes()).await?;
        stream.flush().await?;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let read = tokio::time::timeout(self.settings.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| ExchangeError::Timeout(self.settings.read_timeout))??;
        if read == 0 {
            return Err(ExchangeError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf[..read]).into_owned())
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

struct DisconnectGuard<'a> {
    link: &'a RemoteLink,
}

impl DisconnectGuard<'_> {
    fn defuse(self) {
        std::mem::forget(self);
    }
}

impl Drop for DisconnectGuard<'_> {
    fn drop(&mut self) {
        self.link.set_state(ConnectionState::Disconnected);
    }
}
