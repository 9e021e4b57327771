//! Interactive telnet client that drives the OLT command shell.
//!
//! The client behaves like an operator at a terminal: it waits for the
//! login prompts, answers them, elevates to privileged mode, and then sends
//! one command at a time, reading until the shell prompt comes back. All
//! waits poll the stream in short slices under a fixed ceiling; when the
//! ceiling runs out the caller gets a timeout with whatever text arrived.
//!
//! A client owns one shell cursor. It is never shared between concurrent
//! callers and never reconnects on its own.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const WAIT_CEILING: Duration = Duration::from_secs(5);
const DRAIN_WAIT: Duration = Duration::from_millis(50);
const COMMAND_SETTLE: Duration = Duration::from_millis(100);
const INTER_COMMAND_DELAY: Duration = Duration::from_millis(100);
const CLOSE_GRACE: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DRAIN_READS: usize = 20;

const USERNAME_PROMPT: &str = "Username:";
const PASSWORD_PROMPT: &str = "Password:";
const MORE_MARKER: &str = "--More--";
/// Text the shell prints when credentials are rejected.
const LOGIN_FAILURE_MARKERS: [&str; 4] = [
    "Bad password",
    "bad password",
    "Login incorrect",
    "Authentication failed",
];

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Anything the client can hold a shell session over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelnetConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub enable_password: String,
    /// Hostname the shell prints in its prompts.
    pub hostname: String,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 23,
            username: "zte".to_string(),
            password: "zte".to_string(),
            enable_password: "zxr10".to_string(),
            hostname: "ZXAN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    AwaitingUsername,
    AwaitingPassword,
    Authenticated,
    InEnableMode,
    InConfigMode,
    Closed,
}

/// Shell prompts, most specific first.
#[derive(Debug, Clone)]
struct Prompts {
    config_if: String,
    config: String,
    privileged: String,
    user: String,
}

impl Prompts {
    fn new(hostname: &str) -> Self {
        Self {
            config_if: format!("{hostname}(config-if)#"),
            config: format!("{hostname}(config)#"),
            privileged: format!("{hostname}#"),
            user: format!("{hostname}>"),
        }
    }

    fn all(&self) -> [&str; 4] {
        [&self.config_if, &self.config, &self.privileged, &self.user]
    }

    /// State implied by the prompt at `index` of [`Prompts::all`].
    fn state_at(index: usize) -> SessionState {
        match index {
            0 | 1 => SessionState::InConfigMode,
            2 => SessionState::InEnableMode,
            _ => SessionState::Authenticated,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FilterState {
    #[default]
    Data,
    Command,
    Negotiation(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Separates telnet protocol bytes from shell text.
///
/// Every option the peer offers or requests is refused. NUL padding and
/// backspaces are dropped from the text.
#[derive(Debug, Default)]
struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    fn feed(&mut self, input: &[u8], text: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (FilterState::Data, IAC) => FilterState::Command,
                (FilterState::Data, 0x00 | 0x08) => FilterState::Data,
                (FilterState::Data, b) => {
                    text.push(b);
                    FilterState::Data
                }
                (FilterState::Command, IAC) => {
                    text.push(IAC);
                    FilterState::Data
                }
                (FilterState::Command, cmd @ (WILL | WONT | DO | DONT)) => {
                    FilterState::Negotiation(cmd)
                }
                (FilterState::Command, SB) => FilterState::Subnegotiation,
                (FilterState::Command, _) => FilterState::Data,
                (FilterState::Negotiation(cmd), option) => {
                    match cmd {
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        _ => {}
                    }
                    FilterState::Data
                }
                (FilterState::Subnegotiation, IAC) => FilterState::SubnegotiationIac,
                (FilterState::Subnegotiation, _) => FilterState::Subnegotiation,
                (FilterState::SubnegotiationIac, SE) => FilterState::Data,
                (FilterState::SubnegotiationIac, _) => FilterState::Subnegotiation,
            };
        }
    }
}

fn has_control_sequence(line: &str) -> bool {
    line.chars().any(|c| c.is_control() && c != '\t')
}

/// `HOST#`, `HOST>` or `HOST(mode)#`. Other lines ending in `#` or `>`,
/// such as `!</if-intf>` section markers, are output.
fn is_prompt_line(line: &str, hostname: &str) -> bool {
    let Some(rest) = line.strip_prefix(hostname) else {
        return false;
    };
    let Some(mode) = rest.strip_suffix('#').or_else(|| rest.strip_suffix('>')) else {
        return false;
    };
    mode.is_empty() || (mode.len() > 2 && mode.starts_with('(') && mode.ends_with(')'))
}

/// Strips the shell noise around a command's output: blank lines, the
/// echoed command, prompt lines and lines carrying control sequences.
pub fn clean_output(raw: &str, command: &str, hostname: &str) -> String {
    let command = command.trim();
    raw.split('\n')
        .map(|line| line.trim_end_matches('\r').trim_end())
        .filter(|line| !line.trim().is_empty())
        .filter(|line| {
            let trimmed = line.trim();
            trimmed != command && !(trimmed.starts_with(hostname) && trimmed.ends_with(command))
        })
        .filter(|line| !is_prompt_line(line.trim(), hostname))
        .filter(|line| !has_control_sequence(line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct TelnetClient {
    config: TelnetConfig,
    prompts: Prompts,
    stream: Option<Box<dyn Transport>>,
    filter: TelnetFilter,
    state: SessionState,
}

impl std::fmt::Debug for TelnetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetClient")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state)
            .finish()
    }
}

impl TelnetClient {
    pub fn new(config: TelnetConfig) -> Self {
        let prompts = Prompts::new(&config.hostname);
        Self {
            config,
            prompts,
            stream: None,
            filter: TelnetFilter::default(),
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
            && matches!(
                self.state,
                SessionState::Authenticated
                    | SessionState::InEnableMode
                    | SessionState::InConfigMode
            )
    }

    /// Opens the TCP connection and logs in.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                let host = &self.config.host;
                GatewayError::Connection(format!("{host}: telnet connect timed out"))
            })?
            .map_err(|e| GatewayError::Connection(format!("{}: {e}", self.config.host)))?;
        self.connect_with(Box::new(stream)).await
    }

    /// Logs in over an already open transport.
    ///
    /// On failure the transport is closed and the client is left
    /// disconnected; a new login has to start from scratch.
    pub async fn connect_with(&mut self, stream: Box<dyn Transport>) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(GatewayError::Connection("client is closed".to_string()));
        }
        self.stream = Some(stream);
        self.filter = TelnetFilter::default();
        self.transition(SessionState::AwaitingUsername);

        match self.login().await {
            Ok(()) => {
                info!(host = %self.config.host, state = ?self.state, "telnet session ready");
                Ok(())
            }
            Err(e) => {
                if let Some(mut stream) = self.stream.take() {
                    let _ = stream.shutdown().await;
                }
                self.transition(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn login(&mut self) -> Result<()> {
        self.read_until(&[USERNAME_PROMPT], "username prompt").await?;
        let username = self.config.username.clone();
        self.send_line(&username).await?;
        self.read_until(&[PASSWORD_PROMPT], "password prompt").await?;
        self.transition(SessionState::AwaitingPassword);

        let password = self.config.password.clone();
        self.send_line(&password).await?;
        let prompts = self.prompts.clone();
        let mut markers = vec![prompts.privileged.as_str(), prompts.user.as_str()];
        markers.extend(LOGIN_FAILURE_MARKERS);
        markers.push(USERNAME_PROMPT);
        let (_, matched) = self.read_until(&markers, "shell prompt").await?;
        match matched {
            0 => {
                self.transition(SessionState::InEnableMode);
                return Ok(());
            }
            1 => self.transition(SessionState::Authenticated),
            _ => {
                return Err(GatewayError::Authentication(format!(
                    "{} rejected the credentials for {}",
                    self.config.host, self.config.username
                )));
            }
        }

        self.send_line("enable").await?;
        self.read_until(&[PASSWORD_PROMPT], "enable password prompt")
            .await?;
        let enable_password = self.config.enable_password.clone();
        self.send_line(&enable_password).await?;
        let mut markers = vec![prompts.privileged.as_str()];
        markers.extend(LOGIN_FAILURE_MARKERS);
        markers.extend(["%Error", prompts.user.as_str()]);
        let (_, matched) = self.read_until(&markers, "privileged prompt").await?;
        if matched != 0 {
            return Err(GatewayError::Authentication(format!(
                "{} rejected the enable password",
                self.config.host
            )));
        }
        self.transition(SessionState::InEnableMode);
        Ok(())
    }

    /// Runs one command and returns its cleaned output.
    pub async fn execute(&mut self, cancel: &CancellationToken, command: &str) -> Result<String> {
        if !self.is_connected() {
            return Err(GatewayError::Connection(
                "telnet session is not logged in".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(GatewayError::Timeout {
                waiting_for: "caller deadline".to_string(),
                partial: String::new(),
            });
        }

        self.drain().await;
        if let Err(e) = self.send_line(command).await {
            self.stream = None;
            self.transition(SessionState::Disconnected);
            return Err(e);
        }
        sleep(COMMAND_SETTLE).await;

        let prompts = self.prompts.clone();
        match self.read_until(&prompts.all(), "command prompt").await {
            Ok((raw, matched)) => {
                self.transition(Prompts::state_at(matched));
                Ok(clean_output(&raw, command, &self.config.hostname))
            }
            Err(GatewayError::Timeout {
                waiting_for,
                partial,
            }) => Err(GatewayError::Timeout {
                waiting_for,
                partial: clean_output(&partial, command, &self.config.hostname),
            }),
            Err(e) => {
                if matches!(e, GatewayError::Connection(_) | GatewayError::Io(_)) {
                    self.stream = None;
                    self.transition(SessionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    /// Runs commands one after another. A failing command yields an
    /// `ERROR: ...` entry instead of stopping the batch.
    pub async fn execute_multiple(
        &mut self,
        cancel: &CancellationToken,
        commands: &[String],
    ) -> Result<IndexMap<String, String>> {
        if !self.is_connected() {
            return Err(GatewayError::Connection(
                "telnet session is not logged in".to_string(),
            ));
        }
        let mut outputs = IndexMap::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                sleep(INTER_COMMAND_DELAY).await;
            }
            let output = match self.execute(cancel, command).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(command = %command, error = %e, "command failed");
                    format!("ERROR: {e}")
                }
            };
            outputs.insert(command.clone(), output);
        }
        Ok(outputs)
    }

    /// Leaves the shell and closes the transport. The client cannot be
    /// reused afterwards.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.write_all(b"exit\r\n").await;
            let _ = stream.flush().await;
            sleep(CLOSE_GRACE).await;
            let _ = stream.shutdown().await;
        }
        self.transition(SessionState::Closed);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "telnet state change");
            self.state = next;
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GatewayError::Connection("telnet transport is closed".to_string()))?;
        stream.write_all(format!("{line}\r\n").as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// One read of at most `wait`. `None` when nothing arrived in time.
    async fn read_chunk(&mut self, wait: Duration) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| GatewayError::Connection("telnet transport is closed".to_string()))?;
        let mut buf = [0u8; 4096];
        let len = match timeout(wait, stream.read(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(read) => read?,
        };
        if len == 0 {
            return Err(GatewayError::Connection(
                "telnet connection closed by peer".to_string(),
            ));
        }

        let mut text = Vec::with_capacity(len);
        let mut replies = Vec::new();
        self.filter.feed(&buf[..len], &mut text, &mut replies);
        if !replies.is_empty() {
            stream.write_all(&replies).await?;
            stream.flush().await?;
        }
        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }

    /// Discards whatever the shell printed since the last command.
    async fn drain(&mut self) {
        for _ in 0..MAX_DRAIN_READS {
            match self.read_chunk(DRAIN_WAIT).await {
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
    }

    /// Accumulates text until one of `markers` shows up. Returns the text
    /// and the index of the marker that matched.
    async fn read_until(
        &mut self,
        markers: &[&str],
        waiting_for: &str,
    ) -> Result<(String, usize)> {
        let started = Instant::now();
        let mut buffer = String::new();
        loop {
            if let Some(chunk) = self.read_chunk(POLL_INTERVAL).await? {
                buffer.push_str(&chunk);
                if buffer.trim_end().ends_with(MORE_MARKER) {
                    let keep = buffer.trim_end().len() - MORE_MARKER.len();
                    buffer.truncate(keep);
                    let stream = self.stream.as_mut().ok_or_else(|| {
                        GatewayError::Connection("telnet transport is closed".to_string())
                    })?;
                    stream.write_all(b" ").await?;
                    stream.flush().await?;
                }
            }
            if let Some(matched) = markers.iter().position(|m| buffer.contains(m)) {
                return Ok((buffer, matched));
            }
            if started.elapsed() >= WAIT_CEILING {
                return Err(GatewayError::Timeout {
                    waiting_for: waiting_for.to_string(),
                    partial: buffer,
                });
            }
        }
    }
}
