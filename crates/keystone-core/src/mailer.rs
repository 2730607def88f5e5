// Outgoing mail abstraction.
//
// Delivery is best effort: callers log a failed send and carry on.

use std::sync::Mutex;

use anyhow::Result;

use crate::validate::mask_email;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<()>;
}

/// Development mailer: records each message in the log instead of
/// delivering it. Bodies can carry reset links, so only the masked
/// recipient, the subject and the body size are logged.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, email: &Email) -> Result<()> {
        tracing::info!(
            to = %mask_email(&email.to),
            subject = %email.subject,
            body_bytes = email.body.len(),
            "mail not delivered (log mailer)"
        );
        Ok(())
    }
}

/// Keeps every sent message in memory. Used by tests to inspect mail.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Vec<Email> {
        self.outbox.lock().expect("outbox mutex poisoned").clone()
    }

    /// Most recent message sent to `to`, if any.
    pub fn last_to(&self, to: &str) -> Option<Email> {
        self.outbox
            .lock()
            .expect("outbox mutex poisoned")
            .iter()
            .rev()
            .find(|m| m.to == to)
            .cloned()
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, email: &Email) -> Result<()> {
        self.outbox
            .lock()
            .expect("outbox mutex poisoned")
            .push(email.clone());
        Ok(())
    }
}
