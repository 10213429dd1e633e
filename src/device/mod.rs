use async_trait::async_trait;
use std::fmt;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::{LgConfig, LocationProfile};
use crate::error::{ConfigError, TransportError};
use crate::models::DeviceType;

/// Everything needed to open a session on a location's device
#[derive(Clone)]
pub struct DeviceTarget {
    pub hostname: String,
    pub device_type: DeviceType,
    pub username: String,
    pub password: String,
}

impl DeviceTarget {
    pub fn for_location(cfg: &LgConfig, location: &LocationProfile) -> Result<Self, ConfigError> {
        let creds = cfg.credentials(location.authentication.as_deref()).ok_or_else(|| {
            ConfigError::Invalid(format!("No credentials available for location {}", location.code))
        })?;

        Ok(Self {
            hostname: location.device.clone(),
            device_type: location.device_type,
            username: creds.username.clone(),
            password: creds.password.clone(),
        })
    }
}

impl fmt::Debug for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTarget")
            .field("hostname", &self.hostname)
            .field("device_type", &self.device_type)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Runs CLI text on a device over an authenticated session.
/// Multiple commands share one session; their outputs are joined with newlines.
#[async_trait]
pub trait SessionExecutor: Send + Sync {
    async fn run(
        &self,
        target: &DeviceTarget,
        commands: &[String],
        timeout: Duration,
    ) -> Result<String, TransportError>;
}

/// SessionExecutor over SSH, using the blocking ssh2 crate on the blocking pool
pub struct SshExecutor {
    port: u16,
}

impl SshExecutor {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(22)
    }
}

#[async_trait]
impl SessionExecutor for SshExecutor {
    async fn run(
        &self,
        target: &DeviceTarget,
        commands: &[String],
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let target = target.clone();
        let commands = commands.to_vec();
        let port = self.port;

        // A timed-out blocking task is not cancelled; it stops at the same deadline
        let task = tokio::task::spawn_blocking(move || ssh_run_commands(&target, port, &commands, timeout));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TransportError::Worker(e.to_string())),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Time left before `deadline`, None once it has passed
fn remaining(deadline: Instant, now: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(now)
        .filter(|left| !left.is_zero())
}

/// libssh2 treats 0 as "no timeout", so round up to at least 1ms
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

/// Create an SSH session and authenticate with password, then keyboard-interactive.
/// Every blocking step is bounded by what is left of `deadline`.
/// Blocking: call from spawn_blocking.
fn ssh_connect(
    target: &DeviceTarget,
    port: u16,
    deadline: Instant,
    timeout: Duration,
) -> Result<ssh2::Session, TransportError> {
    let left = remaining(deadline, Instant::now()).ok_or(TransportError::Timeout(timeout))?;
    let addr = (target.hostname.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect(format!("cannot resolve {}: {}", target.hostname, e)))?
        .next()
        .ok_or_else(|| TransportError::Connect(format!("no address for {}", target.hostname)))?;

    let tcp = TcpStream::connect_timeout(&addr, left)
        .map_err(|e| TransportError::Connect(format!("TCP connection to {} failed: {}", addr, e)))?;
    let left = remaining(deadline, Instant::now()).ok_or(TransportError::Timeout(timeout))?;
    tcp.set_read_timeout(Some(left)).ok();
    tcp.set_write_timeout(Some(left)).ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| TransportError::Connect(format!("failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_millis(left));
    session
        .handshake()
        .map_err(|e| TransportError::Connect(format!("SSH handshake failed: {}", e)))?;

    match session.userauth_password(&target.username, &target.password) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    // Arista EOS and similar only offer keyboard-interactive
    let mut prompter = PasswordPrompt {
        password: target.password.clone(),
    };
    let _ = session.userauth_keyboard_interactive(&target.username, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(TransportError::Auth(format!(
            "all methods exhausted for {}@{}",
            target.username, target.hostname
        )))
    }
}

fn ssh_exec(session: &ssh2::Session, command: &str) -> Result<String, TransportError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| TransportError::Exec(format!("failed to open channel: {}", e)))?;

    channel
        .exec(command)
        .map_err(|e| TransportError::Exec(format!("failed to execute '{}': {}", command, e)))?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .map_err(|e| TransportError::Exec(format!("failed to read output: {}", e)))?;

    channel
        .wait_close()
        .map_err(|e| TransportError::Exec(format!("failed to close channel: {}", e)))?;

    Ok(output)
}

/// Connect once and run every command on the same session.
///
/// `timeout` covers the whole run, connection included. Before each command
/// the session timeout is cut down to the time left, so the worker never
/// outlives the deadline by more than one blocking call.
fn ssh_run_commands(
    target: &DeviceTarget,
    port: u16,
    commands: &[String],
    timeout: Duration,
) -> Result<String, TransportError> {
    let deadline = Instant::now() + timeout;
    let session = ssh_connect(target, port, deadline, timeout)?;

    let mut outputs = Vec::with_capacity(commands.len());
    for command in commands {
        let Some(left) = remaining(deadline, Instant::now()) else {
            tracing::debug!("Deadline reached on {} before '{}'", target.hostname, command);
            return Err(TransportError::Timeout(timeout));
        };
        session.set_timeout(timeout_millis(left));
        tracing::debug!("Running '{}' on {}", command, target.hostname);
        outputs.push(ssh_exec(&session, command)?);
    }

    Ok(outputs.join("\n"))
}
