//! Statistics repository

use postman_common::types::{CampaignId, ChannelType};
use sqlx::PgPool;

use crate::models::Statistic;

/// Statistics repository
#[derive(Clone)]
pub struct StatisticRepository {
    pool: PgPool,
}

impl StatisticRepository {
    /// Create a new statistics repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Recompute campaign counters from message rows
    ///
    /// Full server-side aggregation upsert, not incremental maintenance;
    /// idempotent and safe to call repeatedly.
    pub async fn recompute(
        &self,
        campaign_id: CampaignId,
        channel: ChannelType,
    ) -> Result<Statistic, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO statistics (campaign_id, unsent, sent, errored, invalid, updated_at)
            SELECT
                $1,
                COUNT(*) FILTER (WHERE sent_at IS NULL AND errored_at IS NULL),
                COUNT(*) FILTER (WHERE sent_at IS NOT NULL),
                COUNT(*) FILTER (WHERE errored_at IS NOT NULL
                                   AND COALESCE(error_code, '') <> 'invalid_recipient'),
                COUNT(*) FILTER (WHERE error_code = 'invalid_recipient'),
                NOW()
            FROM {table}
            WHERE campaign_id = $1
            ON CONFLICT (campaign_id)
            DO UPDATE SET
                unsent = EXCLUDED.unsent,
                sent = EXCLUDED.sent,
                errored = EXCLUDED.errored,
                invalid = EXCLUDED.invalid,
                updated_at = NOW()
            RETURNING *
            "#,
            table = channel.message_table()
        );

        sqlx::query_as(&sql)
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
    }
}
