//! Invitation emails.
//!
//! Rendering happens here; delivery is delegated to a [`Mailer`]. A failed
//! delivery never fails the invitation: its outcome is reported as an
//! [`InvitationEmailSentStatus`] inside the successful reply.

use greet_proto::{
    InvitationAddr, InvitationEmailSentStatus, InvitationToken, InvitationType, OrganizationId,
};
use thiserror::Error;

use crate::config::InviteConfig;

const HTML_TEMPLATE: &str = include_str!("../templates/invitation_mail.html");
const TEXT_TEMPLATE: &str = include_str!("../templates/invitation_mail.txt");

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendEmailError {
    /// Mail server unreachable
    #[error("mail server unavailable: {0}")]
    ServerUnavailable(String),

    /// Mail server refused the recipient
    #[error("recipient refused: {0}")]
    RecipientRefused(String),

    /// Delivery is not configured
    #[error("bad mail configuration: {0}")]
    BadSmtpConfig(String),
}

impl From<&SendEmailError> for InvitationEmailSentStatus {
    fn from(err: &SendEmailError) -> Self {
        match err {
            SendEmailError::ServerUnavailable(_) => Self::ServerUnavailable,
            SendEmailError::RecipientRefused(_) => Self::RecipientRefused,
            SendEmailError::BadSmtpConfig(_) => Self::BadSmtpConfig,
        }
    }
}

/// Rendered invitation email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationEmail {
    /// `From` header
    pub sender: String,
    /// Recipient address
    pub to: String,
    /// `Reply-To` header (`Label <email>` of the greeter)
    pub reply_to: Option<String>,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html: String,
    /// Plain-text body
    pub text: String,
    /// Link embedded in both bodies
    pub invitation_url: String,
}

/// Email delivery backend.
pub trait Mailer: Clone + Send + Sync + 'static {
    /// Deliver one email.
    fn send(&self, email: &InvitationEmail) -> Result<(), SendEmailError>;
}

/// Greeter shown in USER and SHAMIR_RECOVERY emails.
#[derive(Debug, Clone, Copy)]
pub struct EmailGreeter<'a> {
    /// Display name
    pub label: &'a str,
    /// Address used as `Reply-To`
    pub email: &'a str,
}

/// Render an invitation email.
///
/// `greeter` is `None` for device invitations, which the claimer sends to
/// itself.
pub fn generate_invite_email(
    config: &InviteConfig,
    organization_id: &OrganizationId,
    invitation_type: InvitationType,
    token: InvitationToken,
    to: &str,
    greeter: Option<EmailGreeter<'_>>,
) -> Result<InvitationEmail, SendEmailError> {
    let server = config
        .server_addr
        .clone()
        .ok_or_else(|| SendEmailError::BadSmtpConfig("server address is not configured".to_string()))?;

    let server_url = server.to_http_url().trim_end_matches('/').to_string();
    let invitation_url =
        InvitationAddr::new(server, organization_id.clone(), invitation_type, token).to_http_redirection_url();

    let (subject, intro, greeter_or_team) = match greeter {
        Some(greeter) => (
            format!("[Parsec] {} invited you to {organization_id}", header_value(greeter.label)),
            format!("{} invited you to join the organization {organization_id} on Parsec.", greeter.label),
            greeter.label.to_string(),
        ),
        None => (
            format!("[Parsec] New device invitation to {organization_id}"),
            format!("You requested to add a new device to the organization {organization_id} on Parsec."),
            "your existing device".to_string(),
        ),
    };

    let text = render(TEXT_TEMPLATE, &[
        ("intro", &intro),
        ("invitation_url", &invitation_url),
        ("greeter_or_team", &greeter_or_team),
        ("organization_id", organization_id.as_str()),
        ("server_url", &server_url),
    ]);
    let html = render(HTML_TEMPLATE, &[
        ("intro", &escape_html(&intro)),
        ("invitation_url", &escape_html(&invitation_url)),
        ("greeter_or_team", &escape_html(&greeter_or_team)),
        ("organization_id", &escape_html(organization_id.as_str())),
        ("server_url", &escape_html(&server_url)),
    ]);

    Ok(InvitationEmail {
        sender: config.email_sender.clone(),
        to: header_value(to),
        reply_to: greeter.map(|g| format!("{} <{}>", header_value(g.label), header_value(g.email))),
        subject,
        html,
        text,
        invitation_url,
    })
}

/// Render, then deliver. Never fails: the outcome is the returned status.
pub fn send_invite_email<M: Mailer>(
    mailer: &M,
    config: &InviteConfig,
    organization_id: &OrganizationId,
    invitation_type: InvitationType,
    token: InvitationToken,
    to: &str,
    greeter: Option<EmailGreeter<'_>>,
) -> InvitationEmailSentStatus {
    let result = generate_invite_email(config, organization_id, invitation_type, token, to, greeter)
        .and_then(|email| mailer.send(&email));

    match result {
        Ok(()) => {
            tracing::info!(organization_id = %organization_id, token = %token, "invitation email sent");
            InvitationEmailSentStatus::Success
        },
        Err(e) => {
            tracing::warn!(organization_id = %organization_id, token = %token, error = %e, "invitation email not sent");
            InvitationEmailSentStatus::from(&e)
        },
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| acc.replace(&format!("{{{{{name}}}}}"), value))
}

/// Header-safe copy: control characters (CR and LF included) become spaces,
/// so a value can never start a header of its own.
fn header_value(raw: &str) -> String {
    raw.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}
