//! # store::supabase
//!
//! PostgREST insert.
//!
//! `POST {SUPABASE_URL}/rest/v1/{table}` with the service key as both
//! `apikey` and bearer token. One row per finalized trade.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::SupabaseConfig;
use crate::error::StoreError;
use crate::models::TradeRecord;
use crate::store::TradeStore;

/// Row shape of the `signals-data` table.
#[derive(Debug, Serialize)]
struct SignalRow<'a> {
    trade_id:       uuid::Uuid,
    symbol:         &'a str,
    direction:      &'a str,
    entry_price:    f64,
    alert_percent:  f64,
    level:          &'a str,
    result:         crate::models::CloseReason,
    close_price:    f64,
    result_percent: f64,
    opened_at:      String,
    closed_at:      String,
}

impl<'a> From<&'a TradeRecord> for SignalRow<'a> {
    fn from(record: &'a TradeRecord) -> Self {
        Self {
            trade_id:       record.trade_id,
            symbol:         &record.symbol,
            direction:      record.direction.as_str(),
            entry_price:    record.entry_price,
            alert_percent:  record.alert_percent,
            level:          record.level.as_str(),
            result:         record.result,
            close_price:    record.close_price,
            result_percent: record.result_percent,
            opened_at:      record.opened_at.to_rfc3339(),
            closed_at:      record.closed_at.to_rfc3339(),
        }
    }
}

pub struct SupabaseStore {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseStore {
    pub fn new(client: reqwest::Client, config: SupabaseConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), self.config.table)
    }
}

#[async_trait]
impl TradeStore for SupabaseStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
            .header("Prefer", "return=minimal")
            .json(&SignalRow::from(record))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected(format!("HTTP {status}: {body}")));
        }

        info!(symbol = %record.symbol, level = %record.level, "💾 Trade inserted into Supabase");
        Ok(())
    }
}
