//! Invitation and greeting server.
//!
//! Production glue around [`greet_core`]: the [`InvitationController`] runs
//! with the system clock and OS RNG ([`SystemEnv`]), redb or in-memory
//! storage ([`ServerStorage`]), a file-drop [`FileMailer`], and a
//! [`TcpTransport`] carrying length-prefixed CBOR envelopes.
//!
//! # Components
//!
//! - [`Server`]: accept loop, one task per connection
//! - [`TcpTransport`]: listening socket and envelope framing
//! - [`RedbStorage`]: durable storage
//! - [`SystemEnv`]: production environment (real time, crypto RNG)
//! - [`FileMailer`]: invitation emails as files in a drop directory
//!
//! The certificate directory is the in-memory [`MemoryDirectory`], seeded
//! from a [`BootstrapOrganization`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file_mailer;
pub mod storage;
mod system_env;
pub mod transport;

use std::{net::SocketAddr, path::PathBuf};

pub use error::ServerError;
pub use file_mailer::FileMailer;
use greet_core::{
    Environment, InvitationController, InviteConfig, MemoryDirectory, MemoryStorage, directory::UserProfile,
};
use greet_proto::{DeviceId, ErrorPayload, HumanHandle, OrganizationId, Request, Response, UserId};
pub use storage::{RedbStorage, ServerStorage};
pub use system_env::SystemEnv;
use tokio::net::TcpStream;
pub use transport::TcpTransport;

/// Controller as wired by the server.
pub type ServerController = InvitationController<SystemEnv, ServerStorage, MemoryDirectory, FileMailer>;

/// Organization created at startup, with one administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOrganization {
    /// Organization to create
    pub organization_id: OrganizationId,
    /// Email of the first administrator
    pub admin_email: String,
    /// Display name of the first administrator
    pub admin_label: String,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:6777")
    pub bind_address: String,
    /// Redb database file. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Directory receiving invitation emails. `None` disables emails.
    pub mail_dir: Option<PathBuf>,
    /// Invitation links and email settings
    pub invite: InviteConfig,
    /// Organization seeded into the certificate directory
    pub bootstrap: Option<BootstrapOrganization>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6777".to_string(),
            db_path: None,
            mail_dir: None,
            invite: InviteConfig::default(),
            bootstrap: None,
        }
    }
}

/// Production invitation server.
pub struct Server {
    controller: ServerController,
    transport: TcpTransport,
    bootstrap_admin: Option<DeviceId>,
}

impl Server {
    /// Open storage, seed the directory, and bind the transport.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();

        let storage = match &config.db_path {
            Some(path) => ServerStorage::Redb(RedbStorage::open(path)?),
            None => {
                tracing::warn!("no database configured, invitations are lost on restart");
                ServerStorage::Memory(MemoryStorage::new())
            },
        };
        let mailer = match &config.mail_dir {
            Some(dir) if dir.is_dir() => FileMailer::new(dir.clone()),
            Some(dir) => return Err(ServerError::Config(format!("mail directory {} does not exist", dir.display()))),
            None => FileMailer::disabled(),
        };

        let directory = MemoryDirectory::new();
        let bootstrap_admin = config.bootstrap.as_ref().map(|bootstrap| seed_directory(&directory, &env, bootstrap));

        let controller = InvitationController::new(env, storage, directory, mailer, config.invite);
        let transport = TcpTransport::bind(&config.bind_address).await?;

        Ok(Self { controller, transport, bootstrap_admin })
    }

    /// Run the server, accepting connections and serving requests.
    ///
    /// Runs until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server starting");

        loop {
            match self.transport.accept().await {
                Ok((stream, peer)) => {
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, controller).await {
                            tracing::debug!(%peer, error = %e, "connection closed with error");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                },
            }
        }
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Device of the bootstrap administrator, if an organization was seeded.
    pub fn bootstrap_admin(&self) -> Option<DeviceId> {
        self.bootstrap_admin
    }

    /// Controller serving the requests.
    pub fn controller(&self) -> &ServerController {
        &self.controller
    }
}

fn seed_directory(directory: &MemoryDirectory, env: &SystemEnv, bootstrap: &BootstrapOrganization) -> DeviceId {
    let org = &bootstrap.organization_id;
    let user_id = UserId::from(env.random_u128());
    let device_id = DeviceId::from(env.random_u128());

    directory.add_organization(org);
    directory.add_user(
        org,
        user_id,
        device_id,
        HumanHandle::new(bootstrap.admin_email.clone(), bootstrap.admin_label.clone()),
        UserProfile::Admin,
    );

    tracing::info!(
        organization_id = %org,
        user_id = %user_id,
        device_id = %device_id,
        "bootstrap organization created"
    );
    device_id
}

/// Serve one connection until the peer closes it.
async fn handle_connection(mut stream: TcpStream, controller: ServerController) -> Result<(), ServerError> {
    while let Some(envelope) = transport::read_envelope(&mut stream).await? {
        let response = match Request::decode(&envelope) {
            Ok(request) => {
                let controller = controller.clone();
                // Commands may wait on invitation locks held by other
                // connections
                tokio::task::spawn_blocking(move || controller.handle(request))
                    .await
                    .map_err(|e| ServerError::Internal(e.to_string()))?
            },
            Err(e) => {
                tracing::warn!(error = %e, "undecodable request");
                Response::Error(ErrorPayload::invalid_request(e.to_string()))
            },
        };

        transport::write_envelope(&mut stream, &response.encode()?).await?;
    }
    Ok(())
}
