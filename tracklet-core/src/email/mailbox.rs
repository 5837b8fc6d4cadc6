//! Mailbox access behind a trait so the ingestion worker is testable
//! without a live IMAP server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mail_parser::MessageParser;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use tracklet_config::EmailSettings;
use tracklet_model::MailMessage;

use crate::error::{Result, TrackerError};

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages received at or after `cutoff`, in no particular
    /// order. No sender or subject filtering: narrow filters were found to
    /// miss real shipping notifications.
    async fn fetch_unread_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MailMessage>>;
}

/// IMAP-over-TLS mailbox. Connects per poll; shipping volume does not
/// justify a persistent session.
#[derive(Debug, Clone)]
pub struct ImapMailbox {
    settings: EmailSettings,
}

impl ImapMailbox {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_unread_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MailMessage>> {
        let host = self.settings.imap_host.as_str();
        let tcp =
            TcpStream::connect((host, self.settings.imap_port)).await?;
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls.connect(host, tcp).await.map_err(|e| {
            TrackerError::Internal(format!("IMAP TLS handshake: {e}"))
        })?;

        let client = async_imap::Client::new(tls_stream);
        let mut session = client
            .login(&self.settings.username, &self.settings.password)
            .await
            .map_err(|(e, _)| {
                TrackerError::Internal(format!("IMAP login: {e}"))
            })?;

        session.select("INBOX").await.map_err(|e| {
            TrackerError::Internal(format!("IMAP select: {e}"))
        })?;

        // IMAP SINCE has day granularity; the worker re-checks received_at
        // against the precise cutoff.
        let query =
            format!("UNSEEN SINCE {}", cutoff.format("%d-%b-%Y"));
        let uids = session.uid_search(&query).await.map_err(|e| {
            TrackerError::Internal(format!("IMAP search: {e}"))
        })?;

        if uids.is_empty() {
            let _ = session.logout().await;
            return Ok(Vec::new());
        }

        let uid_set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut messages = Vec::new();
        {
            // BODY.PEEK leaves the messages unread; idempotency comes from
            // the email_processing table, not from flags.
            let mut fetches = session
                .uid_fetch(&uid_set, "(UID BODY.PEEK[])")
                .await
                .map_err(|e| {
                    TrackerError::Internal(format!("IMAP fetch: {e}"))
                })?;

            while let Some(fetch) = fetches.next().await {
                let fetch = match fetch {
                    Ok(fetch) => fetch,
                    Err(e) => {
                        warn!(error = %e, "IMAP fetch item failed");
                        continue;
                    }
                };
                let Some(uid) = fetch.uid else { continue };
                let Some(body) = fetch.body() else { continue };
                match parse_message(uid, body) {
                    Some(message) if message.received_at >= cutoff => {
                        messages.push(message);
                    }
                    Some(message) => {
                        debug!(
                            uid,
                            received_at = %message.received_at,
                            "message older than cutoff, skipping"
                        );
                    }
                    None => {
                        warn!(uid, "unparseable message, skipping");
                    }
                }
            }
        }

        let _ = session.logout().await;
        debug!(count = messages.len(), "fetched unread messages");
        Ok(messages)
    }
}

fn parse_message(uid: u32, raw: &[u8]) -> Option<MailMessage> {
    let parsed = MessageParser::new().parse(raw)?;

    let message_id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("uid:{uid}"));
    let thread_id = parsed.thread_name().map(str::to_string);
    let from = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| addr.address())
        .map(str::to_string)
        .unwrap_or_default();
    let subject =
        parsed.subject().map(str::to_string).unwrap_or_default();
    let received_at = parsed
        .date()
        .map(|d| {
            DateTime::from_timestamp(d.to_timestamp(), 0)
                .unwrap_or_else(Utc::now)
        })
        .unwrap_or_else(Utc::now);
    let body_text = parsed
        .body_text(0)
        .map(|t| t.into_owned())
        .unwrap_or_default();
    let body_html = parsed
        .body_html(0)
        .map(|t| t.into_owned())
        .unwrap_or_default();

    Some(MailMessage {
        uid,
        message_id,
        thread_id,
        from,
        subject,
        received_at,
        body_text,
        body_html,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_message() {
        let raw = b"Message-ID: <abc@example.com>\r\n\
            From: Acme Store <orders@acme.example>\r\n\
            Subject: Your order shipped\r\n\
            Date: Thu, 30 Jul 2026 09:00:00 +0000\r\n\
            \r\n\
            Your UPS shipment 1Z999AA10123456784 from Acme\r\n";
        let message = parse_message(7, raw).unwrap();
        assert_eq!(message.message_id, "abc@example.com");
        assert_eq!(message.from, "orders@acme.example");
        assert_eq!(message.subject, "Your order shipped");
        assert!(message.body_text.contains("1Z999AA10123456784"));
    }

    #[test]
    fn falls_back_to_uid_when_message_id_missing() {
        let raw = b"Subject: hello\r\n\r\nbody\r\n";
        let message = parse_message(42, raw).unwrap();
        assert_eq!(message.message_id, "uid:42");
    }
}
