// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote shell sessions to administrative endpoints.
//!
//! - In production a [`Session`] is an [`SshSession`].
//! - Under test, `fakes::FakeSession` answers commands from a script.

use crate::error::Error;
use slog::{debug, error, info, Logger};
use ssh2::ErrorCode;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// libssh2 session error codes
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;

/// Connection failures, as reported by the connectivity probe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("timed out")]
    Timeout,
    #[error("unreachable - address family not supported by protocol")]
    AddressFamilyUnsupported,
    #[error("unreachable")]
    HostUnreachable,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::EAFNOSUPPORT) => return LinkError::AddressFamilyUnsupported,
            Some(libc::EHOSTUNREACH) | Some(libc::ENETUNREACH) => {
                return LinkError::HostUnreachable
            }
            _ => {}
        }
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            io::ErrorKind::ConnectionRefused => LinkError::ConnectionRefused,
            _ => LinkError::Other(e.to_string()),
        }
    }
}

impl From<ssh2::Error> for LinkError {
    fn from(e: ssh2::Error) -> Self {
        match e.code() {
            ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED) => {
                LinkError::AuthenticationFailed
            }
            ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => LinkError::Timeout,
            _ => LinkError::Other(e.to_string()),
        }
    }
}

/// Where and as whom to open a session.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub user: String,
    pub password: Option<String>,
    pub port: u16,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Endpoint {
            host: host.into(),
            user: user.into(),
            password: None,
            port: DEFAULT_SSH_PORT,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn socket_addr(&self) -> Result<SocketAddr, LinkError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                LinkError::Other(format!("{}: no address found", self.host))
            })
    }
}

/// A live shell session on an administrative endpoint.
///
/// Sessions run one command at a time and return only what the command wrote
/// to standard output, minus the trailing newline. The remote tools expose no
/// exit status worth trusting, so detecting failures is left to the caller.
pub trait Session: Send {
    fn execute(&mut self, command: &str) -> Result<String, Error>;
}

pub struct SshSession {
    session: ssh2::Session,
}

impl SshSession {
    pub fn connect(endpoint: &Endpoint) -> Result<Self, LinkError> {
        let addr = endpoint.socket_addr()?;
        let tcp = TcpStream::connect_timeout(&addr, endpoint.timeout)?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(endpoint.timeout));
        session.handshake()?;
        // commands such as a partition activation may run for a while
        session.set_timeout(0);

        let password = endpoint.password.as_deref().unwrap_or_default();
        session.userauth_password(&endpoint.user, password)?;
        if !session.authenticated() {
            return Err(LinkError::AuthenticationFailed);
        }

        Ok(SshSession { session })
    }
}

impl Session for SshSession {
    fn execute(&mut self, command: &str) -> Result<String, Error> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;
        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.send_eof()?;
        channel.wait_eof()?;
        channel.wait_close()?;
        Ok(chomp(output))
    }
}

/// libssh2 takes its timeout as a `u32` of milliseconds; longer durations
/// saturate.
pub(crate) fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

pub(crate) fn chomp(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    s
}

/// Check that `endpoint` accepts a session and runs `command`.
///
/// Failures are logged with a line describing the kind of failure and
/// reported as `false`, never as an error.
pub fn probe(endpoint: &Endpoint, command: &str, log: &Logger) -> bool {
    Gateway::connect(endpoint, command, log.clone())
        .map(|g| g.is_reachable())
        .unwrap_or(false)
}

fn log_link_failure(endpoint: &Endpoint, e: &Error, log: &Logger) {
    match e {
        Error::Link(LinkError::Timeout) => {
            error!(log, "timed out connecting to {}", endpoint.host)
        }
        Error::Link(
            l @ (LinkError::ConnectionRefused | LinkError::AuthenticationFailed),
        ) => error!(
            log,
            "ssh link: {} {} for {}", endpoint.host, l, endpoint.user
        ),
        Error::Link(l) => error!(log, "ssh link: {} {}", endpoint.host, l),
        _ => error!(log, "ssh link: {}: {}", endpoint.host, e),
    }
}

/// A named endpoint owning the one session every command to it goes through.
pub struct Gateway {
    pub name: String,
    reachable: bool,
    session: Mutex<Box<dyn Session>>,
    pub log: Logger,
}

impl Gateway {
    /// Open the session commands will be issued on and run `probe_command`
    /// over it.
    ///
    /// A session that cannot be opened is an error. A session that opens but
    /// fails the probe command still yields a gateway, reported as not
    /// reachable.
    pub fn connect(
        endpoint: &Endpoint,
        probe_command: &str,
        log: Logger,
    ) -> Result<Self, Error> {
        let session = SshSession::connect(endpoint).map_err(|e| {
            let e = Error::from(e);
            log_link_failure(endpoint, &e, &log);
            e
        })?;
        info!(log, "connected to {} as {}", endpoint.host, endpoint.user);
        Ok(Gateway::probed(
            endpoint.host.clone(),
            Box::new(session),
            probe_command,
            log,
        ))
    }

    /// Wrap an open session, taking its health from one run of
    /// `probe_command`.
    pub fn probed(
        name: impl Into<String>,
        mut session: Box<dyn Session>,
        probe_command: &str,
        log: Logger,
    ) -> Self {
        let name = name.into();
        let reachable = match session.execute(probe_command) {
            Ok(_) => {
                debug!(log, "link to {} is up", name);
                true
            }
            Err(e) => {
                error!(log, "probe of {} failed: {}", name, e);
                false
            }
        };
        Gateway {
            name,
            reachable,
            session: Mutex::new(session),
            log,
        }
    }

    pub fn with_session(
        name: impl Into<String>,
        session: Box<dyn Session>,
        log: Logger,
    ) -> Self {
        Gateway {
            name: name.into(),
            reachable: true,
            session: Mutex::new(session),
            log,
        }
    }

    /// Result of the connectivity probe taken when the gateway was set up.
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Run `command` and return its standard output.
    pub fn run_command(&self, command: &str) -> Result<String, Error> {
        debug!(self.log, "command on {} => {}", self.name, command);
        let mut session = self.lock();
        session.execute(command)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Session>> {
        // a panic mid-command leaves nothing in the session worth protecting
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
