// ============================
// crates/backend-lib/src/mail/mod.rs
// ============================
//! Outgoing mail: the [`Mailer`] seam and a bounded background queue.
//!
//! Requests hand composed mail to a [`MailQueue`] and return immediately. A
//! single worker task drains the queue; delivery failures are logged and
//! counted, never reported back to the request that caused them.
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::metrics::{MAIL_DROPPED, MAIL_FAILED, MAIL_SENT};

pub mod templates;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Send(String),

    #[error("mail queue is closed")]
    QueueClosed,
}

/// A composed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub message_id: String,
}

/// Mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Writes mail to the log instead of delivering it
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            message_id = %email.message_id,
            "outgoing mail"
        );
        tracing::debug!(body = %email.text, "outgoing mail body");
        Ok(())
    }
}

/// RFC 2822 Message-Id: `<nanos.pid.random@domain>`
pub fn generate_message_id(domain: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let random = rand::random::<u64>() >> 1;
    format!("<{nanos}.{}.{random}@{domain}>", std::process::id())
}

/// Sending half of the mail queue
#[derive(Debug, Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<Email>,
}

impl MailQueue {
    /// Spawn the worker and return the queue feeding it.
    /// The worker exits once every queue handle is dropped.
    pub fn start(mailer: Arc<dyn Mailer>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(mailer, rx));
        (Self { tx }, handle)
    }

    /// Queue `email` without waiting; a full or closed queue drops it
    pub fn enqueue(&self, email: Email) -> Result<(), MailError> {
        match self.tx.try_send(email) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(email)) => {
                tracing::warn!(to = %email.to, "mail queue full, dropping message");
                counter!(MAIL_DROPPED).increment(1);
                Ok(())
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Err(MailError::QueueClosed),
        }
    }
}

async fn run_worker(mailer: Arc<dyn Mailer>, mut rx: mpsc::Receiver<Email>) {
    while let Some(email) = rx.recv().await {
        match mailer.send(&email).await {
            Ok(()) => {
                counter!(MAIL_SENT).increment(1);
            },
            Err(e) => {
                tracing::warn!(to = %email.to, error = %e, "mail dispatch failed");
                counter!(MAIL_FAILED).increment(1);
            },
        }
    }
    tracing::debug!("mail worker stopped");
}
