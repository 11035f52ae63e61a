//! Invitation configuration.

use greet_proto::ServerAddr;

/// Default sender of invitation emails.
pub const DEFAULT_EMAIL_SENDER: &str = "Parsec <no-reply@parsec.invalid>";

/// Settings of the invitation subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteConfig {
    /// Public address of this server, used in invitation links.
    ///
    /// Without it no link can be built and emails report `BAD_SMTP_CONFIG`.
    pub server_addr: Option<ServerAddr>,
    /// `From` header of invitation emails
    pub email_sender: String,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self { server_addr: None, email_sender: DEFAULT_EMAIL_SENDER.to_string() }
    }
}

impl InviteConfig {
    /// Configuration with a public server address.
    pub fn with_server_addr(server_addr: ServerAddr) -> Self {
        Self { server_addr: Some(server_addr), ..Self::default() }
    }
}
