//! Mail drop: invitation emails written as files.
//!
//! Each email lands in the drop directory as one `tmp-email-*.eml` file
//! holding the headers, the text body and the HTML body. An external relay
//! (or a developer) picks them up from there. Without a directory, delivery
//! reports a bad mail configuration and invitations still succeed.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use greet_core::{InvitationEmail, Mailer, SendEmailError};

const BOUNDARY: &str = "greet-invitation-boundary";

/// [`Mailer`] writing emails to a drop directory.
#[derive(Clone, Debug, Default)]
pub struct FileMailer {
    dir: Option<Arc<PathBuf>>,
}

impl FileMailer {
    /// Mailer dropping files in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(Arc::new(dir.into())) }
    }

    /// Mailer with no drop directory; every send fails as misconfigured.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Drop directory, if configured.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref().map(PathBuf::as_path)
    }
}

impl Mailer for FileMailer {
    fn send(&self, email: &InvitationEmail) -> Result<(), SendEmailError> {
        let dir = self
            .dir()
            .ok_or_else(|| SendEmailError::BadSmtpConfig("no mail drop directory configured".to_string()))?;

        let message = render(email)?;
        let unavailable = |e: std::io::Error| SendEmailError::ServerUnavailable(e.to_string());
        let mut file = tempfile::Builder::new()
            .prefix("tmp-email-")
            .suffix(".eml")
            .tempfile_in(dir)
            .map_err(unavailable)?;
        file.write_all(message.as_bytes()).map_err(unavailable)?;
        let (_, path) = file.keep().map_err(|e| unavailable(e.error))?;

        tracing::debug!(path = %path.display(), to = %email.to, "invitation email dropped");
        Ok(())
    }
}

/// `multipart/alternative` message with text and HTML parts.
///
/// A header value holding a line break is refused outright.
fn render(email: &InvitationEmail) -> Result<String, SendEmailError> {
    let headers = [Some(&email.sender), Some(&email.to), email.reply_to.as_ref(), Some(&email.subject)];
    if let Some(value) = headers.into_iter().flatten().find(|value| value.contains(['\r', '\n'])) {
        return Err(SendEmailError::RecipientRefused(format!("line break in header value {value:?}")));
    }

    let mut out = format!("From: {}\r\nTo: {}\r\n", email.sender, email.to);
    if let Some(reply_to) = &email.reply_to {
        out.push_str(&format!("Reply-To: {reply_to}\r\n"));
    }
    out.push_str(&format!(
        "Subject: {}\r\nMIME-Version: 1.0\r\nContent-Type: multipart/alternative; boundary=\"{BOUNDARY}\"\r\n\r\n",
        email.subject
    ));
    for (content_type, body) in [("text/plain", &email.text), ("text/html", &email.html)] {
        out.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Type: {content_type}; charset=\"utf-8\"\r\n\r\n{body}\r\n"
        ));
    }
    out.push_str(&format!("--{BOUNDARY}--\r\n"));
    Ok(out)
}
