use std::io::Write;

use suppaftp::types::{FileType, FtpError, Response};
use suppaftp::{NativeTlsFtpStream, Status};

use crate::error::{RemoteError, RemoteErrorKind};

/// Trait abstracting the FTP commands the sync engine needs. Sessions are boxed
/// so tests can drive the engine against an in-memory server.
pub trait FtpLike: Send {
    fn login(&mut self, username: &str, password: &str) -> Result<(), RemoteError>;
    /// `PBSZ 0` + `PROT P`: secure the data channel under the control connection's TLS.
    fn protect_data_channel(&mut self) -> Result<(), RemoteError>;
    fn cwd(&mut self, path: &str) -> Result<(), RemoteError>;
    /// Name listing; an empty path lists the current directory.
    fn nlst(&mut self, path: &str) -> Result<Vec<String>, RemoteError>;
    fn size(&mut self, path: &str) -> Result<u64, RemoteError>;
    /// Raw MDTM reply or value, `YYYYMMDDHHMMSS` optionally prefixed by `213 `.
    fn mdtm(&mut self, path: &str) -> Result<String, RemoteError>;
    /// Binary retrieval streamed into `sink`; returns the byte count.
    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, RemoteError>;
    fn quit(&mut self) -> Result<(), RemoteError>;
}

/// Adapter that owns a `suppaftp` stream (plain or TLS) and implements `FtpLike`.
pub struct SuppaAdapter(pub NativeTlsFtpStream);

impl FtpLike for SuppaAdapter {
    fn login(&mut self, username: &str, password: &str) -> Result<(), RemoteError> {
        self.0.login(username, password).map_err(map_ftp_error)
    }

    fn protect_data_channel(&mut self) -> Result<(), RemoteError> {
        self.0.custom_command("PBSZ 0", &[Status::CommandOk]).map_err(map_ftp_error)?;
        self.0.custom_command("PROT P", &[Status::CommandOk]).map_err(map_ftp_error)?;
        Ok(())
    }

    fn cwd(&mut self, path: &str) -> Result<(), RemoteError> {
        self.0.cwd(path).map_err(map_ftp_error)
    }

    fn nlst(&mut self, path: &str) -> Result<Vec<String>, RemoteError> {
        let arg = if path.is_empty() { None } else { Some(path) };
        self.0.nlst(arg).map_err(map_ftp_error)
    }

    fn size(&mut self, path: &str) -> Result<u64, RemoteError> {
        self.0.size(path).map(|n| n as u64).map_err(map_ftp_error)
    }

    fn mdtm(&mut self, path: &str) -> Result<String, RemoteError> {
        self.0.mdtm(path).map(|t| t.format("%Y%m%d%H%M%S").to_string()).map_err(map_ftp_error)
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, RemoteError> {
        self.0.transfer_type(FileType::Binary).map_err(map_ftp_error)?;
        let mut stream = self.0.retr_as_stream(path).map_err(map_ftp_error)?;
        let copied = std::io::copy(&mut stream, sink);
        // always read the closing 226/426 so the control channel stays in step
        let finalized = self.0.finalize_retr_stream(stream).map_err(map_ftp_error);
        let bytes = copied.map_err(|e| map_io_error(&e))?;
        finalized?;
        Ok(bytes)
    }

    fn quit(&mut self) -> Result<(), RemoteError> {
        self.0.quit().map_err(map_ftp_error)
    }
}

impl SuppaAdapter {
    pub fn into_inner(self) -> NativeTlsFtpStream {
        self.0
    }
}

pub(crate) fn map_ftp_error(err: FtpError) -> RemoteError {
    match err {
        FtpError::ConnectionError(e) => map_io_error(&e),
        FtpError::UnexpectedResponse(resp) => map_response(&resp),
        // empty/short reply line: the server hung up mid-conversation
        FtpError::BadResponse => RemoteError::disconnected(),
        FtpError::SecureError(msg) => RemoteError::new(RemoteErrorKind::Tls, None, msg),
        other => RemoteError::new(RemoteErrorKind::Io, None, other.to_string()),
    }
}

pub(crate) fn map_io_error(e: &std::io::Error) -> RemoteError {
    use std::io::ErrorKind::*;
    match e.kind() {
        // a bare EOF is the only blank signature; resets keep their OS text
        UnexpectedEof => RemoteError::disconnected(),
        ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected => {
            RemoteError::new(RemoteErrorKind::Disconnected, None, e.to_string())
        }
        _ => RemoteError::new(RemoteErrorKind::Io, None, e.to_string()),
    }
}

fn map_response(resp: &Response) -> RemoteError {
    let code = resp.status.code();
    let body = String::from_utf8_lossy(&resp.body).trim().to_string();
    // keep the numeric code in front so reply text reads like the wire line
    let message =
        if body.starts_with(&code.to_string()) { body } else { format!("{} {}", code, body) };
    let kind = match code {
        450 | 550 => RemoteErrorKind::NotFound,
        421 => RemoteErrorKind::Disconnected,
        _ => RemoteErrorKind::Rejected,
    };
    RemoteError::new(kind, Some(code), message)
}
