/// Coarse classification of a failed remote call, independent of the FTP client crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Control connection closed or reset by the peer.
    Disconnected,
    /// Reply says the path does not exist (450/550).
    NotFound,
    /// Any other negative reply from the server.
    Rejected,
    /// Local socket / IO failure that is not an end-of-stream.
    Io,
    /// TLS negotiation failed.
    Tls,
}

/// Transport-neutral error returned by [`crate::transfer::FtpLike`] implementations.
///
/// `message` keeps the raw reply text (e.g. `530 Non-anonymous sessions must use
/// encryption.`) so protocol fallback can inspect it. An end-of-stream carries an
/// empty message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub code: Option<u32>,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, code: Option<u32>, message: impl Into<String>) -> Self {
        Self { kind, code, message: message.into() }
    }

    pub fn disconnected() -> Self {
        Self::new(RemoteErrorKind::Disconnected, None, String::new())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, Some(550), message)
    }

    pub fn rejected(code: u32, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Rejected, Some(code), message)
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind == RemoteErrorKind::Disconnected
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = self.message.trim();
        match (self.kind, msg.is_empty()) {
            (RemoteErrorKind::Disconnected, true) => write!(f, "connection closed by server"),
            (_, true) => write!(f, "{:?} (empty reply)", self.kind),
            (_, false) => f.write_str(msg),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Errors surfaced by the sync engine. Only [`SyncError::is_fatal`] variants stop a run.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// Could not connect/login after every protocol variant and retry.
    Connection { addr: String, attempts: usize, source: RemoteError },
    /// The connection dropped again right after the one-shot reconnect.
    ConnectionLost { op: String, source: RemoteError },
    /// A configured remote root does not exist.
    PathNotFound(String),
    /// A single remote operation failed.
    Remote(RemoteError),
    InvalidPattern { pattern: String, message: String },
    InvalidTimestamp(String),
    LocalIo { path: String, message: String },
    Config(String),
    State(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use SyncError::*;
        match self {
            Connection { addr, attempts, source } => {
                write!(f, "could not connect to {} after {} attempts: {}", addr, attempts, source)
            }
            ConnectionLost { op, source } => {
                write!(f, "connection lost again during {} after reconnecting: {}", op, source)
            }
            PathNotFound(p) => write!(f, "directory '{}' does not exist", p),
            Remote(e) => write!(f, "remote operation failed: {}", e),
            InvalidPattern { pattern, message } => {
                write!(f, "invalid search pattern '{}': {}", pattern, message)
            }
            InvalidTimestamp(s) => write!(f, "cannot parse timestamp '{}'", s),
            LocalIo { path, message } => write!(f, "local write failed: {}: {}", path, message),
            Config(msg) => write!(f, "invalid config: {}", msg),
            State(msg) => write!(f, "invalid state: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        SyncError::Remote(e)
    }
}

impl SyncError {
    /// Whether this error aborts the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        use SyncError::*;
        match self {
            Connection { .. }
            | ConnectionLost { .. }
            | PathNotFound(_)
            | InvalidPattern { .. }
            | InvalidTimestamp(_)
            | Config(_)
            | State(_) => true,
            Remote(_) | LocalIo { .. } => false,
        }
    }

    /// An end-of-stream reported by the remote side; recovered once by reconnecting.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_disconnect())
    }

    pub(crate) fn local_io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        SyncError::LocalIo {
            path: crate::transfer::normalize_path(&path.to_string_lossy(), false),
            message: err.to_string(),
        }
    }
}
