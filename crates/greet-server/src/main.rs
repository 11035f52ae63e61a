//! Invitation server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory, with a seeded organization (development)
//! greet-server --bind 127.0.0.1:6777 --bootstrap-org CoolOrg --admin-email alice@example.com
//!
//! # Durable storage, emails dropped for a relay
//! greet-server --bind 0.0.0.0:6777 --db invitations.redb --mail-dir /var/spool/greet \
//!     --server-addr parsec3://parsec.example.com
//! ```

use std::path::PathBuf;

use clap::Parser;
use greet_core::{InviteConfig, config::DEFAULT_EMAIL_SENDER};
use greet_proto::{OrganizationId, ServerAddr};
use greet_server::{BootstrapOrganization, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Invitation and greeting server
#[derive(Parser, Debug)]
#[command(name = "greet-server")]
#[command(about = "Parsec invitation and greeting server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:6777")]
    bind: String,

    /// Redb database file (in-memory storage when absent)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory receiving invitation emails (emails disabled when absent)
    #[arg(long)]
    mail_dir: Option<PathBuf>,

    /// Public server address used in invitation links (e.g. parsec3://host)
    #[arg(long)]
    server_addr: Option<ServerAddr>,

    /// `From` header of invitation emails
    #[arg(long, default_value = DEFAULT_EMAIL_SENDER)]
    email_sender: String,

    /// Organization to create at startup
    #[arg(long)]
    bootstrap_org: Option<OrganizationId>,

    /// Email of the bootstrap administrator
    #[arg(long, default_value = "admin@example.com")]
    admin_email: String,

    /// Display name of the bootstrap administrator
    #[arg(long, default_value = "Admin")]
    admin_label: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.server_addr.is_none() {
        tracing::warn!("no --server-addr given, invitation emails cannot carry a link");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        db_path: args.db,
        mail_dir: args.mail_dir,
        invite: InviteConfig { server_addr: args.server_addr, email_sender: args.email_sender },
        bootstrap: args.bootstrap_org.map(|organization_id| BootstrapOrganization {
            organization_id,
            admin_email: args.admin_email,
            admin_label: args.admin_label,
        }),
    };

    let server = Server::bind(config).await?;

    tracing::info!(addr = %server.local_addr()?, "server listening");

    server.run().await?;

    Ok(())
}
