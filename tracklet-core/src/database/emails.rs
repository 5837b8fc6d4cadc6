use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracklet_model::{
    EmailProcessingRecord, EmailProcessingStatus, EmailScanMethod,
};

use crate::error::Result;

/// Ingestion state per mailbox message. A message id is recorded exactly
/// once; its presence makes the next pass skip the message.
#[derive(Debug, Clone)]
pub struct EmailStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct EmailRow {
    message_id: String,
    thread_id: Option<String>,
    sender: String,
    subject: String,
    received_at: DateTime<Utc>,
    body_text: String,
    body_html: String,
    scan_method: EmailScanMethod,
    processed_at: DateTime<Utc>,
    status: EmailProcessingStatus,
    tracking_numbers: String,
    error: Option<String>,
}

impl EmailRow {
    fn into_record(self) -> Result<EmailProcessingRecord> {
        let tracking_numbers: Vec<String> =
            serde_json::from_str(&self.tracking_numbers)?;
        Ok(EmailProcessingRecord {
            message_id: self.message_id,
            thread_id: self.thread_id,
            from: self.sender,
            subject: self.subject,
            received_at: self.received_at,
            body_text: self.body_text,
            body_html: self.body_html,
            scan_method: self.scan_method,
            processed_at: self.processed_at,
            status: self.status,
            tracking_numbers,
            error: self.error,
        })
    }
}

impl EmailStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn has_processed(&self, message_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM email_processing WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn record(
        &self,
        record: &EmailProcessingRecord,
    ) -> Result<()> {
        let tracking_numbers =
            serde_json::to_string(&record.tracking_numbers)?;
        sqlx::query(
            "INSERT INTO email_processing \
                 (message_id, thread_id, sender, subject, received_at, \
                  body_text, body_html, scan_method, processed_at, status, \
                  tracking_numbers, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (message_id) DO UPDATE SET \
                 processed_at = excluded.processed_at, \
                 status = excluded.status, \
                 tracking_numbers = excluded.tracking_numbers, \
                 error = excluded.error",
        )
        .bind(&record.message_id)
        .bind(&record.thread_id)
        .bind(&record.from)
        .bind(&record.subject)
        .bind(record.received_at)
        .bind(&record.body_text)
        .bind(&record.body_html)
        .bind(record.scan_method)
        .bind(record.processed_at)
        .bind(record.status)
        .bind(tracking_numbers)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        message_id: &str,
    ) -> Result<Option<EmailProcessingRecord>> {
        let row = sqlx::query_as::<_, EmailRow>(
            "SELECT message_id, thread_id, sender, subject, received_at, \
                    body_text, body_html, scan_method, processed_at, \
                    status, tracking_numbers, error \
             FROM email_processing WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(EmailRow::into_record).transpose()
    }
}
