//! SSH/SFTP backend for bisync.

mod auth;
mod ssh_client;
mod utils;

use crate::auth::Secret;
use crate::utils::{is_no_such_file, times_only, to_stat};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bisync_core::{Connector, Endpoint, RemoteEntry, RemoteFs, RemoteStat};
use russh::client::{AuthResult, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use ssh_client::Client;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Opens SFTP channels to one endpoint. Credentials are resolved once, up front.
pub struct SftpConnector {
    endpoint: Endpoint,
    secret: Secret,
    config: Arc<russh::client::Config>,
}

impl SftpConnector {
    pub fn new(endpoint: &Endpoint) -> bisync_core::Result<Self> {
        let secret = auth::resolve(endpoint)?;
        Ok(Self {
            endpoint: endpoint.clone(),
            secret,
            config: Arc::new(russh::client::Config::default()),
        })
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteFs>> {
        let remote = SftpRemote::connect(&self.endpoint, &self.secret, self.config.clone()).await?;
        Ok(Box::new(remote))
    }

    fn describe(&self) -> String {
        self.endpoint.address()
    }
}

pub struct SftpRemote {
    sftp: SftpSession,
    handle: Mutex<Handle<Client>>,
    disconnected: Arc<AtomicBool>,
}

impl SftpRemote {
    async fn connect(endpoint: &Endpoint, secret: &Secret, config: Arc<russh::client::Config>) -> Result<Self> {
        let disconnected = Arc::new(AtomicBool::new(false));
        let client = Client {
            allowed_fingerprints: endpoint.fingerprints.clone(),
            disconnected: disconnected.clone(),
        };
        let mut session = russh::client::connect(config, (endpoint.host.as_str(), endpoint.port), client)
            .await
            .with_context(|| format!("connect to {}", endpoint.address()))?;

        let res = match secret {
            Secret::Password(password) => session.authenticate_password(&endpoint.user, password).await?,
            Secret::Key(key) => {
                let hash = session.best_supported_rsa_hash().await?.flatten();
                session
                    .authenticate_publickey(&endpoint.user, PrivateKeyWithHashAlg::new(key.clone(), hash))
                    .await?
            }
        };
        if let AuthResult::Failure {
            remaining_methods,
            partial_success,
        } = res
        {
            return Err(anyhow!(
                "Authentication failed, remaining_methods: {:?}, partial_success: {}",
                remaining_methods,
                partial_success
            ));
        }
        let channel = session.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        info!("sftp ready on {}", endpoint.address());
        Ok(Self {
            sftp,
            handle: Mutex::new(session),
            disconnected,
        })
    }
}

#[async_trait]
impl RemoteFs for SftpRemote {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self.sftp.read_dir(path).await?;
        Ok(entries
            .filter(|e| {
                let name = e.file_name();
                name != "." && name != ".."
            })
            .map(|e| RemoteEntry {
                name: e.file_name(),
                stat: to_stat(&e.metadata()),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<RemoteStat>> {
        match self.sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(to_stat(&attrs))),
            Err(e) if is_no_such_file(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let mut remote_file = self.sftp.open(remote).await?;
        let mut writer = tokio::fs::File::create(local)
            .await
            .with_context(|| format!("create {}", local.display()))?;
        let n = tokio::io::copy(&mut remote_file, &mut writer).await?;
        writer.flush().await?;
        debug!("get {remote}: {n} bytes");
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let mut reader = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("open {}", local.display()))?;
        let mut remote_file = self.sftp.create(remote).await?;
        let n = tokio::io::copy(&mut reader, &mut remote_file).await?;
        remote_file.shutdown().await?;
        debug!("put {remote}: {n} bytes");
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        Ok(self.sftp.remove_file(path).await?)
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        Ok(self.sftp.create_dir(path).await?)
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        Ok(self.sftp.remove_dir(path).await?)
    }

    async fn set_mtime(&self, path: &str, mtime: i64) -> Result<()> {
        let secs = u32::try_from(mtime).map_err(|_| anyhow!("mtime {mtime} out of range for sftp"))?;
        self.sftp.set_metadata(path, times_only(secs)).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let _ = self.sftp.close().await;
        let handle = self.handle.lock().await;
        if !handle.is_closed() {
            handle.disconnect(Disconnect::ByApplication, "", "en-US").await?;
        }
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
