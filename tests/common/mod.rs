#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ftpsync::config::SyncConfig;
use ftpsync::transfer::{ConnectionManager, Connector, Endpoint, FtpLike, ProtocolVariant};
use ftpsync::util::RetryPolicy;
use ftpsync::{RemoteError, RemoteErrorKind};

/// What the in-memory server demands before it lets a client log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityPolicy {
    #[default]
    Open,
    /// Plain login answered with `534 Policy requires SSL.`
    PolicyRequiresSsl,
    /// Plain login answered with `530 Non-anonymous sessions must use encryption.`
    NonAnonymousRequiresTls,
    /// Anything but implicit TLS sees the socket close before the greeting.
    ImplicitOnly,
}

#[derive(Debug, Clone)]
pub struct MockFile {
    pub data: Vec<u8>,
    /// Raw MDTM value; `None` makes MDTM fail.
    pub mdtm: Option<String>,
}

#[derive(Default)]
pub struct ServerState {
    pub files: BTreeMap<String, MockFile>,
    pub dirs: BTreeSet<String>,
    pub policy: SecurityPolicy,
    pub connect_failures: VecDeque<RemoteError>,
    pub login_failures: VecDeque<RemoteError>,
    /// Next N calls of an operation drop the connection.
    pub drop_next: BTreeMap<&'static str, u32>,
    pub retr_errors: BTreeMap<String, RemoteError>,
    pub size_errors: BTreeSet<String>,
    /// Empty directories answer NLST with 550, like some real servers.
    pub empty_dir_not_found: bool,
    pub quit_fails: bool,

    pub cwd: String,
    pub connects: Vec<ProtocolVariant>,
    pub logins: Vec<ProtocolVariant>,
    pub protected: Vec<ProtocolVariant>,
    pub quits: usize,
    pub retrieved: Vec<String>,
}

/// Shared handle to an in-memory FTP server. Clones see the same state.
#[derive(Clone, Default)]
pub struct MockServer {
    pub state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let server = Self::default();
        {
            let mut st = server.lock();
            st.dirs.insert("/".to_string());
            st.cwd = "/".to_string();
        }
        server
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn dir(self, path: &str) -> Self {
        self.add_dirs(path);
        self
    }

    pub fn file(self, path: &str, data: &[u8], mdtm: Option<&str>) -> Self {
        let path = resolve("/", path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dirs(if parent.is_empty() { "/" } else { parent });
        }
        self.lock()
            .files
            .insert(path, MockFile { data: data.to_vec(), mdtm: mdtm.map(str::to_string) });
        self
    }

    pub fn policy(self, policy: SecurityPolicy) -> Self {
        self.lock().policy = policy;
        self
    }

    pub fn fail_connect(self, err: RemoteError) -> Self {
        self.lock().connect_failures.push_back(err);
        self
    }

    pub fn fail_login(self, err: RemoteError) -> Self {
        self.lock().login_failures.push_back(err);
        self
    }

    pub fn drop_next(self, op: &'static str, times: u32) -> Self {
        self.lock().drop_next.insert(op, times);
        self
    }

    pub fn fail_retr(self, path: &str, err: RemoteError) -> Self {
        self.lock().retr_errors.insert(path.to_string(), err);
        self
    }

    pub fn fail_size(self, path: &str) -> Self {
        self.lock().size_errors.insert(path.to_string());
        self
    }

    pub fn empty_dirs_not_found(self) -> Self {
        self.lock().empty_dir_not_found = true;
        self
    }

    pub fn quit_fails(self) -> Self {
        self.lock().quit_fails = true;
        self
    }

    pub fn set_mdtm(&self, path: &str, mdtm: &str) {
        if let Some(f) = self.lock().files.get_mut(path) {
            f.mdtm = Some(mdtm.to_string());
        }
    }

    pub fn connects(&self) -> Vec<ProtocolVariant> {
        self.lock().connects.clone()
    }

    pub fn logins(&self) -> Vec<ProtocolVariant> {
        self.lock().logins.clone()
    }

    pub fn protected(&self) -> Vec<ProtocolVariant> {
        self.lock().protected.clone()
    }

    pub fn quits(&self) -> usize {
        self.lock().quits
    }

    pub fn retrieved(&self) -> Vec<String> {
        self.lock().retrieved.clone()
    }

    pub fn cwd(&self) -> String {
        self.lock().cwd.clone()
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(MockConnector { server: self.clone() })
    }

    fn add_dirs(&self, path: &str) {
        let path = resolve("/", path);
        let mut st = self.lock();
        let mut cur = String::new();
        st.dirs.insert("/".to_string());
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cur.push('/');
            cur.push_str(part);
            st.dirs.insert(cur.clone());
        }
    }
}

/// Resolve `path` against `cwd` the way a Unix FTP server would; `..` at root stays at root.
pub fn resolve(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') { path.to_string() } else { format!("{}/{}", cwd, path) };
    let mut parts: Vec<&str> = Vec::new();
    for p in joined.split('/') {
        match p {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

pub struct MockConnector {
    server: MockServer,
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _endpoint: &Endpoint,
        variant: ProtocolVariant,
    ) -> Result<Box<dyn FtpLike>, RemoteError> {
        let mut st = self.server.lock();
        st.connects.push(variant);
        if let Some(err) = st.connect_failures.pop_front() {
            return Err(err);
        }
        if st.policy == SecurityPolicy::ImplicitOnly && variant != ProtocolVariant::ImplicitTls {
            return Err(RemoteError::disconnected());
        }
        st.cwd = "/".to_string();
        Ok(Box::new(MockSession {
            server: self.server.clone(),
            variant,
            protected: false,
            dead: false,
        }))
    }
}

pub struct MockSession {
    server: MockServer,
    variant: ProtocolVariant,
    protected: bool,
    dead: bool,
}

impl MockSession {
    /// Apply an injected drop for `op`; a dropped session stays dead.
    fn check(&mut self, op: &'static str) -> Result<(), RemoteError> {
        if self.dead {
            return Err(RemoteError::disconnected());
        }
        let mut st = self.server.lock();
        if let Some(n) = st.drop_next.get_mut(op)
            && *n > 0
        {
            *n -= 1;
            drop(st);
            self.dead = true;
            return Err(RemoteError::disconnected());
        }
        Ok(())
    }
}

impl FtpLike for MockSession {
    fn login(&mut self, username: &str, _password: &str) -> Result<(), RemoteError> {
        self.check("login")?;
        let mut st = self.server.lock();
        if let Some(err) = st.login_failures.pop_front() {
            return Err(err);
        }
        let plain = self.variant == ProtocolVariant::Plain;
        match st.policy {
            SecurityPolicy::PolicyRequiresSsl if plain => {
                return Err(RemoteError::rejected(534, "534 Policy requires SSL."));
            }
            SecurityPolicy::NonAnonymousRequiresTls if plain && username != "anonymous" => {
                return Err(RemoteError::rejected(
                    530,
                    "530 Non-anonymous sessions must use encryption.",
                ));
            }
            _ => {}
        }
        st.logins.push(self.variant);
        Ok(())
    }

    fn protect_data_channel(&mut self) -> Result<(), RemoteError> {
        self.check("protect")?;
        self.protected = true;
        self.server.lock().protected.push(self.variant);
        Ok(())
    }

    fn cwd(&mut self, path: &str) -> Result<(), RemoteError> {
        self.check("cwd")?;
        let mut st = self.server.lock();
        let target = resolve(&st.cwd, path);
        if st.dirs.contains(&target) {
            st.cwd = target;
            Ok(())
        } else {
            Err(RemoteError::not_found(format!("550 {}: No such directory", path)))
        }
    }

    fn nlst(&mut self, path: &str) -> Result<Vec<String>, RemoteError> {
        self.check("nlst")?;
        let st = self.server.lock();
        let dir = resolve(&st.cwd, path);
        if !st.dirs.contains(&dir) {
            return Err(RemoteError::not_found(format!("550 {}: No such file or directory", path)));
        }
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let children: BTreeSet<&str> = st
            .files
            .keys()
            .chain(st.dirs.iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .collect();
        if children.is_empty() && st.empty_dir_not_found {
            return Err(RemoteError::new(RemoteErrorKind::NotFound, Some(450), "450 No files found"));
        }
        let shown = path.trim_end_matches('/');
        Ok(children
            .into_iter()
            .map(|name| if shown.is_empty() { name.to_string() } else { format!("{}/{}", shown, name) })
            .collect())
    }

    fn size(&mut self, path: &str) -> Result<u64, RemoteError> {
        self.check("size")?;
        let st = self.server.lock();
        let full = resolve(&st.cwd, path);
        if st.size_errors.contains(&full) {
            return Err(RemoteError::rejected(500, "500 SIZE not understood"));
        }
        st.files
            .get(&full)
            .map(|f| f.data.len() as u64)
            .ok_or_else(|| RemoteError::not_found(format!("550 {}: not a plain file", path)))
    }

    fn mdtm(&mut self, path: &str) -> Result<String, RemoteError> {
        self.check("mdtm")?;
        let st = self.server.lock();
        let full = resolve(&st.cwd, path);
        match st.files.get(&full).and_then(|f| f.mdtm.clone()) {
            Some(m) => Ok(format!("213 {}", m)),
            None => Err(RemoteError::rejected(502, "502 MDTM not implemented")),
        }
    }

    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, RemoteError> {
        self.check("retr")?;
        let mut st = self.server.lock();
        if self.variant.is_tls() && !self.protected {
            return Err(RemoteError::rejected(521, "521 Data connection must be protected"));
        }
        let full = resolve(&st.cwd, path);
        if let Some(err) = st.retr_errors.get(&full) {
            return Err(err.clone());
        }
        let data = st
            .files
            .get(&full)
            .map(|f| f.data.clone())
            .ok_or_else(|| RemoteError::not_found(format!("550 {}: No such file", path)))?;
        sink.write_all(&data).map_err(|e| RemoteError::new(RemoteErrorKind::Io, None, e.to_string()))?;
        st.retrieved.push(full);
        Ok(data.len() as u64)
    }

    fn quit(&mut self) -> Result<(), RemoteError> {
        let mut st = self.server.lock();
        st.quits += 1;
        if st.quit_fails || self.dead {
            return Err(RemoteError::disconnected());
        }
        Ok(())
    }
}

pub type Sleeps = Arc<Mutex<Vec<Duration>>>;

pub fn endpoint() -> Endpoint {
    Endpoint {
        host: "ftp.test".to_string(),
        port: 21,
        username: "etl".to_string(),
        password: "secret".to_string(),
    }
}

/// Manager over `server` with the default policy; sleeps are recorded, not performed.
pub fn manager(server: &MockServer) -> (ConnectionManager, Sleeps) {
    manager_with(server, RetryPolicy::default())
}

pub fn manager_with(server: &MockServer, policy: RetryPolicy) -> (ConnectionManager, Sleeps) {
    let sleeps: Sleeps = Arc::default();
    let rec = sleeps.clone();
    let m = ConnectionManager::new(endpoint(), server.connector())
        .with_policy(policy)
        .with_sleeper(move |d| rec.lock().unwrap().push(d));
    (m, sleeps)
}

pub fn sync_config(target: &Path, extra: serde_json::Value) -> SyncConfig {
    let mut base = serde_json::json!({
        "host": "ftp.test",
        "username": "etl",
        "password": "secret",
        "target_dir": target,
    });
    if let (Some(b), Some(e)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in e {
            b.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(base).unwrap()
}
