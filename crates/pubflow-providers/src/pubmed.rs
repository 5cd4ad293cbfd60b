//! SFTP deposit transport (PubMed, PMC).
//!
//! Uploads are binary, into the configured working directory and then any
//! requested sub-directories; a sub-directory that cannot be entered is
//! created first. The `ssh2` session is blocking, so the transport runs it
//! on the blocking thread pool.

use std::io::Write;
use std::net::TcpStream;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use pubflow_core::settings::SftpSettings;

/// Error from an upload attempt. SFTP failures are transient as far as the
/// pipelines are concerned; they record the failure and retry on the next
/// scheduled run.
#[derive(Debug, thiserror::Error)]
#[error("sftp transport error: {0}")]
pub struct TransportError(pub String);

/// Seam the SFTP deposit pipelines upload through.
#[async_trait]
pub trait DepositTransport: Send + Sync + 'static {
    /// Upload `content` as `file_name` under the working directory plus
    /// `sub_dirs`.
    async fn upload(
        &self,
        file_name: &str,
        content: Vec<u8>,
        sub_dirs: &[String],
    ) -> Result<(), TransportError>;
}

/// SFTP implementation over `ssh2`.
pub struct SftpTransport {
    settings: SftpSettings,
}

impl SftpTransport {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    fn upload_blocking(
        settings: &SftpSettings,
        file_name: &str,
        content: &[u8],
        sub_dirs: &[String],
    ) -> Result<(), TransportError> {
        let stream = TcpStream::connect((settings.host.as_str(), settings.port))
            .map_err(|err| TransportError(format!("connect: {err}")))?;

        let mut session =
            ssh2::Session::new().map_err(|err| TransportError(format!("session: {err}")))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|err| TransportError(format!("handshake: {err}")))?;
        session
            .userauth_password(&settings.username, &settings.password)
            .map_err(|err| TransportError(format!("auth: {err}")))?;

        let sftp = session
            .sftp()
            .map_err(|err| TransportError(format!("sftp: {err}")))?;

        // Walk into the working directory and sub-directories, creating any
        // sub-directory whose cd equivalent fails.
        let mut remote_dir = settings.cwd.trim_end_matches('/').to_string();
        for sub_dir in sub_dirs {
            remote_dir = format!("{remote_dir}/{sub_dir}");
            if sftp.stat(Path::new(&remote_dir)).is_err() {
                sftp.mkdir(Path::new(&remote_dir), 0o755)
                    .map_err(|err| TransportError(format!("mkdir {remote_dir}: {err}")))?;
            }
        }

        let remote_path = format!("{remote_dir}/{file_name}");
        let mut remote_file = sftp
            .create(Path::new(&remote_path))
            .map_err(|err| TransportError(format!("create {remote_path}: {err}")))?;
        remote_file
            .write_all(content)
            .map_err(|err| TransportError(format!("write {remote_path}: {err}")))?;
        Ok(())
    }
}

#[async_trait]
impl DepositTransport for SftpTransport {
    async fn upload(
        &self,
        file_name: &str,
        content: Vec<u8>,
        sub_dirs: &[String],
    ) -> Result<(), TransportError> {
        let settings = self.settings.clone();
        let file_name = file_name.to_string();
        let sub_dirs = sub_dirs.to_vec();
        tokio::task::spawn_blocking(move || {
            Self::upload_blocking(&settings, &file_name, &content, &sub_dirs)
        })
        .await
        .map_err(|err| TransportError(format!("join: {err}")))?
    }
}

/// Recording transport for tests.
#[derive(Default)]
pub struct MemoryTransport {
    fail_with: Option<String>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryTransport {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Remote paths uploaded so far.
    pub fn uploaded_paths(&self) -> Vec<String> {
        self.uploads.lock().iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl DepositTransport for MemoryTransport {
    async fn upload(
        &self,
        file_name: &str,
        content: Vec<u8>,
        sub_dirs: &[String],
    ) -> Result<(), TransportError> {
        if let Some(message) = &self.fail_with {
            return Err(TransportError(message.clone()));
        }
        let mut path = sub_dirs.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(file_name);
        self.uploads.lock().push((path, content));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_transport_records_paths() {
        let transport = MemoryTransport::accepting();
        transport
            .upload("elife-05-29353.zip", b"zip".to_vec(), &["resupply".into()])
            .await
            .unwrap();

        assert_eq!(transport.uploaded_paths(), vec!["resupply/elife-05-29353.zip"]);
    }

    #[tokio::test]
    async fn failing_transport_surfaces_the_error() {
        let transport = MemoryTransport::failing("connection reset");
        let err = transport
            .upload("file.zip", vec![], &[])
            .await
            .expect_err("upload fails");
        assert!(err.to_string().contains("connection reset"));
    }
}
