//! SFTP directory access over `ssh2`
//!
//! libssh2 is blocking, so every call runs on `spawn_blocking`. One session
//! is kept open between calls and dropped after any error so the next
//! attempt reconnects.

use crate::adapters::storage::{finish_listing, ObjectInfo, ObjectStore};
use crate::config::{SecretString, SftpSourceConfig};
use crate::domain::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use secrecy::ExposeSecret;
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// libssh2 error codes
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;
const SESSION_AUTHENTICATION_FAILED: i32 = -18;
const SESSION_PUBLICKEY_UNVERIFIED: i32 = -19;

struct Connection {
    // keeps the session alive for the sftp channel
    _session: Session,
    sftp: Sftp,
}

#[derive(Clone)]
struct Credentials {
    host: String,
    port: u16,
    username: String,
    password: Option<SecretString>,
    private_key_path: Option<String>,
    private_key_passphrase: Option<SecretString>,
    timeout: Duration,
}

/// Files of one remote directory
pub struct SftpFiles {
    credentials: Credentials,
    directory: String,
    suffix: Option<String>,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SftpFiles {
    pub fn new(config: &SftpSourceConfig) -> Self {
        Self {
            credentials: Credentials {
                host: config.host.clone(),
                port: config.port,
                username: config.username.clone(),
                password: config.password.clone(),
                private_key_path: config.private_key_path.clone(),
                private_key_passphrase: config.private_key_passphrase.clone(),
                timeout: Duration::from_secs(config.timeout_seconds),
            },
            directory: config.directory.clone(),
            suffix: config.suffix.clone(),
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs `op` with a live SFTP channel on the blocking pool
    async fn with_sftp<T, F>(&self, op: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, SourceError> + Send + 'static,
    {
        let connection = self.connection.clone();
        let credentials = self.credentials.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(connect(&credentials)?);
            }
            let result = match guard.as_ref() {
                Some(conn) => op(&conn.sftp),
                None => Err(SourceError::transient("SFTP connection unavailable")),
            };
            if result.is_err() {
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| SourceError::fatal(format!("SFTP task failed: {e}")))?
    }
}

fn connect(credentials: &Credentials) -> Result<Connection, SourceError> {
    let address = (credentials.host.as_str(), credentials.port)
        .to_socket_addrs()
        .map_err(|e| SourceError::transient(format!("Cannot resolve {}: {e}", credentials.host)))?
        .next()
        .ok_or_else(|| SourceError::fatal(format!("No address for {}", credentials.host)))?;
    let tcp = TcpStream::connect_timeout(&address, credentials.timeout).map_err(|e| {
        SourceError::transient(format!("Cannot connect to {}:{}: {e}", credentials.host, credentials.port))
    })?;

    let mut session = Session::new().map_err(classify)?;
    session.set_timeout(credentials.timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session.handshake().map_err(classify)?;

    match (&credentials.private_key_path, &credentials.password) {
        (Some(key), _) => session
            .userauth_pubkey_file(
                &credentials.username,
                None,
                Path::new(key),
                credentials
                    .private_key_passphrase
                    .as_ref()
                    .map(|p| p.expose_secret().as_str()),
            )
            .map_err(classify)?,
        (None, Some(password)) => session
            .userauth_password(&credentials.username, password.expose_secret().as_str())
            .map_err(classify)?,
        (None, None) => return Err(SourceError::fatal("SFTP source has no credentials")),
    }
    if !session.authenticated() {
        return Err(SourceError::fatal("SFTP authentication failed"));
    }

    let sftp = session.sftp().map_err(classify)?;
    tracing::debug!(host = %credentials.host, "SFTP session established");
    Ok(Connection {
        _session: session,
        sftp,
    })
}

/// Missing files and rejected credentials are fatal, the rest transient
fn classify(error: ssh2::Error) -> SourceError {
    match error.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => {
            SourceError::fatal(format!("SFTP: {error}"))
        }
        ErrorCode::Session(SESSION_AUTHENTICATION_FAILED)
        | ErrorCode::Session(SESSION_PUBLICKEY_UNVERIFIED) => {
            SourceError::fatal(format!("SFTP authentication failed: {error}"))
        }
        _ => SourceError::transient(format!("SFTP: {error}")),
    }
}

#[async_trait]
impl ObjectStore for SftpFiles {
    async fn list(&self) -> Result<Vec<ObjectInfo>, SourceError> {
        let directory = PathBuf::from(&self.directory);
        let entries = self
            .with_sftp(move |sftp| sftp.readdir(&directory).map_err(classify))
            .await?;

        let objects = entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .map(|(path, stat)| ObjectInfo {
                path: path.to_string_lossy().into_owned(),
                size: stat.size.unwrap_or(0),
            })
            .collect();
        Ok(finish_listing(objects, self.suffix.as_deref()))
    }

    async fn read(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, SourceError> {
        let path = PathBuf::from(path);
        self.with_sftp(move |sftp| {
            let read_error =
                |e: std::io::Error| SourceError::transient(format!("SFTP read {}: {e}", path.display()));
            let mut file = sftp.open(&path).map_err(classify)?;
            file.seek(SeekFrom::Start(offset)).map_err(read_error)?;
            let mut buf = Vec::new();
            file.take(len).read_to_end(&mut buf).map_err(read_error)?;
            Ok(Bytes::from(buf))
        })
        .await
    }

    fn describe(&self) -> String {
        format!(
            "sftp://{}@{}:{}{}",
            self.credentials.username, self.credentials.host, self.credentials.port, self.directory
        )
    }
}
