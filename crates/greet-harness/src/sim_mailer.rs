//! Mailer that keeps emails in memory.

#![allow(clippy::disallowed_types, reason = "Shared outbox between clones")]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use greet_core::{InvitationEmail, Mailer, SendEmailError};

#[derive(Default)]
struct Outbox {
    sent: Vec<InvitationEmail>,
    failure: Option<SendEmailError>,
}

/// [`Mailer`] recording every delivered email.
///
/// [`SimMailer::fail_with`] makes subsequent deliveries fail, to exercise
/// the email status reported in invitation replies.
#[derive(Clone, Default)]
pub struct SimMailer {
    outbox: Arc<Mutex<Outbox>>,
}

impl SimMailer {
    /// Mailer accepting every email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every delivery with `error` until [`SimMailer::recover`].
    pub fn fail_with(&self, error: SendEmailError) {
        self.lock().failure = Some(error);
    }

    /// Accept deliveries again.
    pub fn recover(&self) {
        self.lock().failure = None;
    }

    /// Emails delivered so far, oldest first.
    pub fn sent(&self) -> Vec<InvitationEmail> {
        self.lock().sent.clone()
    }

    /// Emails delivered to `to`.
    pub fn sent_to(&self, to: &str) -> Vec<InvitationEmail> {
        self.lock().sent.iter().filter(|email| email.to == to).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Mailer for SimMailer {
    fn send(&self, email: &InvitationEmail) -> Result<(), SendEmailError> {
        let mut outbox = self.lock();
        if let Some(error) = &outbox.failure {
            return Err(error.clone());
        }
        outbox.sent.push(email.clone());
        Ok(())
    }
}
