//! Campaign message repository
//!
//! One physical table per channel, identical shape; the repository is
//! parameterized by channel and picks the table. Table names come from
//! `ChannelType::message_table()`, never from user input.

use postman_common::types::{CampaignId, ChannelType, MessageId};
use sqlx::PgPool;

use crate::models::{CampaignMessage, MessageCounts};

/// Campaign message repository for one channel
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
    channel: ChannelType,
    table: &'static str,
}

impl MessageRepository {
    /// Create a message repository for a channel
    pub fn new(pool: PgPool, channel: ChannelType) -> Self {
        Self {
            pool,
            channel,
            table: channel.message_table(),
        }
    }

    /// The channel this repository serves
    pub fn channel(&self) -> ChannelType {
        self.channel
    }

    /// Dequeue the next batch of unsent messages for a campaign
    ///
    /// Stamps `dequeued_at` and returns the rows in insertion order.
    /// The locking subselect keeps concurrent jobs of the same campaign
    /// from dequeuing the same row twice. Returns fewer than `limit`
    /// rows (possibly zero) when the campaign is exhausted.
    pub async fn fetch_unsent_batch(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignMessage>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE {table} SET
                dequeued_at = NOW(),
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM {table}
                WHERE campaign_id = $1
                  AND dequeued_at IS NULL
                  AND sent_at IS NULL
                  AND errored_at IS NULL
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
            table = self.table
        );

        let mut batch: Vec<CampaignMessage> = sqlx::query_as(&sql)
            .bind(campaign_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve subselect order
        batch.sort_by_key(|m| m.created_at);
        Ok(batch)
    }

    /// Record a successful send with the provider message id
    ///
    /// Idempotent: the terminal columns are only written while still
    /// null, so a second call with the same outcome changes nothing.
    pub async fn record_sent(
        &self,
        id: MessageId,
        provider_message_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE {table} SET
                sent_at = NOW(),
                message_id = $2,
                updated_at = NOW()
            WHERE id = $1 AND sent_at IS NULL
            "#,
            table = self.table
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(provider_message_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a send failure with its error code
    ///
    /// Idempotent, and never overwrites a successful send.
    pub async fn record_error(&self, id: MessageId, error_code: &str) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE {table} SET
                errored_at = NOW(),
                error_code = $2,
                updated_at = NOW()
            WHERE id = $1 AND errored_at IS NULL AND sent_at IS NULL
            "#,
            table = self.table
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(error_code)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Retry path: clear dequeue/error state on messages that never
    /// received a provider message id, so a fresh job can re-pick them.
    /// Messages whose error code marks a permanent failure are skipped.
    pub async fn clear_unsent_dequeued(
        &self,
        campaign_id: CampaignId,
        permanent_codes: &[&str],
    ) -> Result<u64, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE {table} SET
                dequeued_at = NULL,
                errored_at = NULL,
                error_code = NULL,
                updated_at = NOW()
            WHERE campaign_id = $1
              AND message_id IS NULL
              AND sent_at IS NULL
              AND (error_code IS NULL OR error_code <> ALL($2))
            "#,
            table = self.table
        );

        let codes: Vec<String> = permanent_codes.iter().map(|s| s.to_string()).collect();

        let result = sqlx::query(&sql)
            .bind(campaign_id)
            .bind(&codes)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Current counts for a campaign, feeding the halt circuit breaker
    /// and the statistics recompute
    pub async fn counts(&self, campaign_id: CampaignId) -> Result<MessageCounts, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE sent_at IS NULL AND errored_at IS NULL) as unsent,
                COUNT(*) FILTER (WHERE sent_at IS NOT NULL) as sent,
                COUNT(*) FILTER (WHERE errored_at IS NOT NULL
                                   AND COALESCE(error_code, '') <> 'invalid_recipient') as errored,
                COUNT(*) FILTER (WHERE error_code = 'invalid_recipient') as invalid
            FROM {table}
            WHERE campaign_id = $1
            "#,
            table = self.table
        );

        let row: (Option<i64>, Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(&sql)
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(MessageCounts {
            unsent: row.0.unwrap_or(0),
            sent: row.1.unwrap_or(0),
            errored: row.2.unwrap_or(0),
            invalid: row.3.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    /// In-memory mirror of one message row and the conditional-update
    /// predicates of the outcome writes and the retry sweep, checked
    /// here without a database.
    #[derive(Debug, Clone, PartialEq, Default)]
    struct Row {
        message_id: Option<String>,
        dequeued: bool,
        sent: bool,
        errored: bool,
        error_code: Option<String>,
    }

    /// `record_sent`: WHERE sent_at IS NULL
    fn record_sent(row: &mut Row, provider_id: &str) -> bool {
        if row.sent {
            return false;
        }
        row.sent = true;
        row.message_id = Some(provider_id.to_string());
        true
    }

    /// `record_error`: WHERE errored_at IS NULL AND sent_at IS NULL
    fn record_error(row: &mut Row, code: &str) -> bool {
        if row.errored || row.sent {
            return false;
        }
        row.errored = true;
        row.error_code = Some(code.to_string());
        true
    }

    /// `clear_unsent_dequeued`: WHERE message_id IS NULL AND sent_at IS
    /// NULL AND (error_code IS NULL OR error_code <> ALL($permanent))
    fn clear_for_retry(row: &mut Row, permanent: &[&str]) -> bool {
        if row.message_id.is_some() || row.sent {
            return false;
        }
        if let Some(code) = &row.error_code {
            if permanent.contains(&code.as_str()) {
                return false;
            }
        }
        row.dequeued = false;
        row.errored = false;
        row.error_code = None;
        true
    }

    fn dequeued_row() -> Row {
        Row {
            dequeued: true,
            ..Row::default()
        }
    }

    #[test]
    fn test_record_sent_idempotent() {
        let mut row = dequeued_row();
        assert!(record_sent(&mut row, "SM42"));

        let after_first = row.clone();
        assert!(!record_sent(&mut row, "SM42"));
        assert_eq!(row, after_first);
    }

    #[test]
    fn test_record_error_idempotent_and_never_overwrites_sent() {
        let mut errored = dequeued_row();
        assert!(record_error(&mut errored, "timeout"));
        let after_first = errored.clone();
        assert!(!record_error(&mut errored, "provider_error"));
        assert_eq!(errored, after_first);

        let mut sent = dequeued_row();
        assert!(record_sent(&mut sent, "SM42"));
        assert!(!record_error(&mut sent, "timeout"));
        assert_eq!(sent.error_code, None);
    }

    #[test]
    fn test_retry_skips_sent_rows() {
        let permanent = ["invalid_recipient", "provider_permanent"];

        let mut row = dequeued_row();
        record_sent(&mut row, "SM42");
        assert!(!clear_for_retry(&mut row, &permanent));
        assert_eq!(row.message_id.as_deref(), Some("SM42"));
        assert!(row.sent);
    }

    #[test]
    fn test_retry_skips_permanent_errors_and_repicks_transient() {
        let permanent = ["invalid_recipient", "provider_permanent"];

        let mut invalid = dequeued_row();
        record_error(&mut invalid, "invalid_recipient");
        assert!(!clear_for_retry(&mut invalid, &permanent));
        assert!(invalid.errored);

        let mut transient = dequeued_row();
        record_error(&mut transient, "timeout");
        assert!(clear_for_retry(&mut transient, &permanent));
        assert_eq!(transient, Row::default());
    }
}
