use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use suppaftp::NativeTlsConnector;
use suppaftp::NativeTlsFtpStream;

use super::ftp_like::{FtpLike, SuppaAdapter, map_ftp_error, map_io_error};
use crate::error::{RemoteError, RemoteErrorKind, SyncError};
use crate::util::{RetryPolicy, retry_operation};

/// Session flavours tried during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Plain,
    /// `AUTH TLS` upgrade of a plain control connection.
    ExplicitTls,
    /// TLS from the first byte (usually port 990).
    ImplicitTls,
}

impl ProtocolVariant {
    pub fn is_tls(self) -> bool {
        !matches!(self, ProtocolVariant::Plain)
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProtocolVariant::Plain => "ftp",
            ProtocolVariant::ExplicitTls => "ftps-explicit",
            ProtocolVariant::ImplicitTls => "ftps-implicit",
        })
    }
}

#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Endpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opens unauthenticated sessions for a given protocol variant.
pub trait Connector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        variant: ProtocolVariant,
    ) -> Result<Box<dyn FtpLike>, RemoteError>;
}

/// Why a connect/login attempt failed, as far as protocol negotiation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Server policy demands TLS ("Policy requires SSL.").
    PolicyRequiresSecure,
    /// Empty error text; typical for implicit-TLS-only servers hit in plain mode.
    BlankSignature,
    /// "530 Non-anonymous sessions must use encryption."
    NonAnonymousInsecure,
    Generic,
}

/// What the manager does after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Use this variant from the next attempt on.
    Switch(ProtocolVariant),
    /// Reconnect with explicit TLS right now, without waiting for the next attempt.
    ReconnectSecureNow,
    /// Quit the stale session if any and retry with the same variant.
    CloseAndRetry,
}

pub fn classify_failure(err: &RemoteError) -> FailureReason {
    let msg = err.message.trim();
    if msg.is_empty() {
        return FailureReason::BlankSignature;
    }
    let lower = msg.to_ascii_lowercase();
    if lower.contains("policy requires ssl") {
        FailureReason::PolicyRequiresSecure
    } else if lower.contains("530 non-anonymous")
        || (err.code == Some(530) && lower.contains("non-anonymous"))
    {
        FailureReason::NonAnonymousInsecure
    } else {
        FailureReason::Generic
    }
}

pub fn next_step(reason: FailureReason) -> NextStep {
    match reason {
        FailureReason::PolicyRequiresSecure => NextStep::Switch(ProtocolVariant::ExplicitTls),
        FailureReason::BlankSignature => NextStep::Switch(ProtocolVariant::ImplicitTls),
        FailureReason::NonAnonymousInsecure => NextStep::ReconnectSecureNow,
        FailureReason::Generic => NextStep::CloseAndRetry,
    }
}

/// A failed attempt, with the half-open session when connect succeeded but login did not.
struct LoginFailure {
    error: RemoteError,
    stale: Option<Box<dyn FtpLike>>,
}

fn attempt_login(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    variant: ProtocolVariant,
) -> Result<Box<dyn FtpLike>, LoginFailure> {
    let mut sess = connector
        .connect(endpoint, variant)
        .map_err(|error| LoginFailure { error, stale: None })?;
    if let Err(error) = sess.login(&endpoint.username, &endpoint.password) {
        return Err(LoginFailure { error, stale: Some(sess) });
    }
    if variant.is_tls()
        && let Err(error) = sess.protect_data_channel()
    {
        return Err(LoginFailure { error, stale: Some(sess) });
    }
    Ok(sess)
}

fn quit_stale(stale: Option<Box<dyn FtpLike>>) {
    if let Some(mut sess) = stale
        && let Err(e) = sess.quit()
    {
        tracing::debug!(error = %e, "closing stale session failed");
    }
}

/// Owns the single live session of a run: negotiation, retry and one-shot
/// reconnect on disconnect.
pub struct ConnectionManager {
    endpoint: Endpoint,
    connector: Box<dyn Connector>,
    policy: RetryPolicy,
    sleeper: Box<dyn FnMut(Duration)>,
    variant: ProtocolVariant,
    session: Option<Box<dyn FtpLike>>,
    reconnects: u32,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint, connector: Box<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
            policy: RetryPolicy::default(),
            sleeper: Box::new(std::thread::sleep),
            variant: ProtocolVariant::Plain,
            session: None,
            reconnects: 0,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the backoff sleep (tests record waits instead of blocking).
    pub fn with_sleeper(mut self, sleeper: impl FnMut(Duration) + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Number of transparent reconnects performed after a disconnect.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Connect and log in, negotiating the protocol variant and retrying with
    /// linear backoff. Fails only once every attempt is spent.
    pub fn connect(&mut self) -> Result<(), SyncError> {
        let Self { endpoint, connector, policy, sleeper, variant, session, .. } = self;
        if let Some(mut old) = session.take() {
            let _ = old.quit();
        }
        let addr = endpoint.addr();
        let connected = retry_operation(policy, &mut **sleeper, |attempt| {
            tracing::info!(addr = %addr, variant = %variant, attempt = attempt + 1, "creating new connection");
            let failure = match attempt_login(connector.as_ref(), endpoint, *variant) {
                Ok(sess) => return Ok(sess),
                Err(f) => f,
            };
            let reason = classify_failure(&failure.error);
            tracing::debug!(?reason, error = %failure.error, "connection attempt failed");
            match next_step(reason) {
                NextStep::Switch(next) => {
                    tracing::info!(from = %variant, to = %next, "switching protocol variant");
                    quit_stale(failure.stale);
                    *variant = next;
                }
                NextStep::ReconnectSecureNow => {
                    quit_stale(failure.stale);
                    *variant = ProtocolVariant::ExplicitTls;
                    tracing::info!("server refuses insecure login, reconnecting with explicit TLS");
                    return attempt_login(connector.as_ref(), endpoint, *variant).map_err(|f| {
                        quit_stale(f.stale);
                        f.error
                    });
                }
                NextStep::CloseAndRetry => quit_stale(failure.stale),
            }
            Err(failure.error)
        });
        match connected {
            Ok(sess) => {
                *session = Some(sess);
                tracing::info!(addr = %addr, variant = %variant, "connection successful");
                Ok(())
            }
            Err(source) => Err(SyncError::Connection {
                addr,
                attempts: policy.total_attempts(),
                source,
            }),
        }
    }

    /// Run `op` on the live session. An end-of-stream reported by the first run
    /// triggers exactly one reconnect and one re-run; a second disconnect is
    /// fatal (`ConnectionLost`), other second failures propagate as they are.
    pub fn with_reconnect<T, F>(&mut self, what: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut(&mut dyn FtpLike) -> Result<T, SyncError>,
    {
        if self.session.is_none() {
            self.connect()?;
        }
        let first = match self.session.as_deref_mut() {
            Some(sess) => op(sess),
            None => Err(RemoteError::disconnected().into()),
        };
        match first {
            Err(e) if e.is_disconnect() => {
                tracing::warn!(op = what, "connection dropped, reconnecting and retrying once");
                self.session = None;
                self.reconnects += 1;
                self.connect()?;
                let second = match self.session.as_deref_mut() {
                    Some(sess) => op(sess),
                    None => Err(RemoteError::disconnected().into()),
                };
                match second {
                    Err(SyncError::Remote(source)) if source.is_disconnect() => {
                        Err(SyncError::ConnectionLost { op: what.to_string(), source })
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Release the session. Failures (server already gone) are logged, never returned.
    pub fn close(&mut self) {
        if let Some(mut sess) = self.session.take() {
            match sess.quit() {
                Ok(()) => tracing::debug!("session closed"),
                Err(e) => tracing::info!(error = %e, "received EOF after closing connection"),
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create a TCP connection with connect/read/write timeouts.
fn create_tcp_connection(addr: &str, timeout: Duration) -> Result<TcpStream, RemoteError> {
    let mut addrs = addr.to_socket_addrs().map_err(|e| map_io_error(&e))?;
    let sock = addrs.next().ok_or_else(|| {
        RemoteError::new(RemoteErrorKind::Io, None, format!("cannot resolve address: {}", addr))
    })?;
    let tcp = TcpStream::connect_timeout(&sock, timeout).map_err(|e| map_io_error(&e))?;
    let _ = tcp.set_read_timeout(Some(timeout));
    let _ = tcp.set_write_timeout(Some(timeout));
    Ok(tcp)
}

/// A greeting that never arrives (timeout) or is cut short reads as a blank
/// failure, which is how implicit-TLS-only servers look to a plain client.
fn map_greeting_error(err: suppaftp::types::FtpError) -> RemoteError {
    use suppaftp::types::FtpError;
    if let FtpError::ConnectionError(e) = &err
        && matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock)
    {
        return RemoteError::disconnected();
    }
    map_ftp_error(err)
}

/// `suppaftp`-backed connector used by the binary.
pub struct FtpConnector {
    pub tls_verify: bool,
    pub timeout: Duration,
}

impl FtpConnector {
    pub fn new(tls_verify: bool, timeout: Duration) -> Self {
        Self { tls_verify, timeout }
    }

    fn tls_connector(&self) -> Result<NativeTlsConnector, RemoteError> {
        let mut builder = native_tls::TlsConnector::builder();
        if !self.tls_verify {
            builder.danger_accept_invalid_certs(true).danger_accept_invalid_hostnames(true);
        }
        builder
            .build()
            .map(NativeTlsConnector::from)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Tls, None, e.to_string()))
    }
}

impl Connector for FtpConnector {
    #[allow(deprecated)]
    fn connect(
        &self,
        endpoint: &Endpoint,
        variant: ProtocolVariant,
    ) -> Result<Box<dyn FtpLike>, RemoteError> {
        let addr = endpoint.addr();
        let stream = match variant {
            ProtocolVariant::Plain => {
                let tcp = create_tcp_connection(&addr, self.timeout)?;
                NativeTlsFtpStream::connect_with_stream(tcp).map_err(map_greeting_error)?
            }
            ProtocolVariant::ExplicitTls => {
                let tcp = create_tcp_connection(&addr, self.timeout)?;
                NativeTlsFtpStream::connect_with_stream(tcp)
                    .map_err(map_greeting_error)?
                    .into_secure(self.tls_connector()?, &endpoint.host)
                    .map_err(map_ftp_error)?
            }
            ProtocolVariant::ImplicitTls => {
                let stream = NativeTlsFtpStream::connect_secure_implicit(
                    addr.as_str(),
                    self.tls_connector()?,
                    &endpoint.host,
                )
                .map_err(map_ftp_error)?;
                let _ = stream.get_ref().set_read_timeout(Some(self.timeout));
                let _ = stream.get_ref().set_write_timeout(Some(self.timeout));
                stream
            }
        };
        tracing::debug!(addr = %addr, %variant, "control connection established");
        Ok(Box::new(SuppaAdapter(stream)))
    }
}
