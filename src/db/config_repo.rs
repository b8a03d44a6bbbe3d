use alloy::hex;
use alloy::primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::copy_config::UnknownVariant;
use crate::models::{CopyConfig, Side};

use super::{ConfigStore, StoreError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigRow {
    pub id: Uuid,
    pub wallet_address: String,
    pub trader_address: String,
    pub proxy_address: String,
    pub mode: String,
    pub size_scale: Decimal,
    pub fixed_amount: Option<Decimal>,
    pub min_size_per_trade: Option<Decimal>,
    pub max_size_per_trade: Decimal,
    pub direction: String,
    pub side_filter: Option<String>,
    pub min_trigger_size: Option<Decimal>,
    pub max_odds: Option<Decimal>,
    pub slippage_type: String,
    /// Percent.
    pub max_slippage: Decimal,
    pub is_active: bool,
}

impl TryFrom<ConfigRow> for CopyConfig {
    type Error = StoreError;

    fn try_from(row: ConfigRow) -> Result<Self, Self::Error> {
        let bad = |field: &str, e: String| StoreError::InvalidRow(format!("config {} {field}: {e}", row.id));
        let addr = |field: &str, value: &str| value.parse::<Address>().map_err(|e| bad(field, e.to_string()));

        let side_filter = match row.side_filter.as_deref() {
            None | Some("") => None,
            Some(s) => Some(Side::from_api_str(s).ok_or_else(|| bad("side_filter", s.to_string()))?),
        };

        Ok(CopyConfig {
            id: row.id,
            wallet_address: addr("wallet_address", &row.wallet_address)?,
            trader_address: addr("trader_address", &row.trader_address)?,
            proxy_address: addr("proxy_address", &row.proxy_address)?,
            mode: row.mode.parse().map_err(|e: UnknownVariant| bad("mode", e.to_string()))?,
            size_scale: row.size_scale,
            fixed_amount: row.fixed_amount,
            min_size_per_trade: row.min_size_per_trade,
            max_size_per_trade: row.max_size_per_trade,
            direction: row
                .direction
                .parse()
                .map_err(|e: UnknownVariant| bad("direction", e.to_string()))?,
            side_filter,
            min_trigger_size_usd: row.min_trigger_size,
            max_odds: row.max_odds,
            slippage_mode: row
                .slippage_type
                .parse()
                .map_err(|e: UnknownVariant| bad("slippage_type", e.to_string()))?,
            max_slippage: row.max_slippage / Decimal::ONE_HUNDRED,
            is_active: row.is_active,
        })
    }
}

const SELECT_CONFIG: &str = r#"
    SELECT id, wallet_address, trader_address, proxy_address, mode, size_scale, fixed_amount,
           min_size_per_trade, max_size_per_trade, direction, side_filter, min_trigger_size,
           max_odds, slippage_type, max_slippage, is_active
    FROM copy_trading_configs
"#;

/// Rows that fail to convert are logged and skipped so one bad config does not stall the rest.
fn convert(rows: Vec<ConfigRow>) -> Vec<CopyConfig> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match CopyConfig::try_from(row) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(config_id = %id, error = %e, "Skipping invalid copy config");
                    None
                }
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn active_configs(&self) -> Result<Vec<CopyConfig>, StoreError> {
        let rows = sqlx::query_as::<_, ConfigRow>(&format!("{SELECT_CONFIG} WHERE is_active ORDER BY created_at"))
            .fetch_all(&self.pool)
            .await?;
        Ok(convert(rows))
    }

    async fn configs_for_trader(&self, trader: Address) -> Result<Vec<CopyConfig>, StoreError> {
        let rows = sqlx::query_as::<_, ConfigRow>(&format!(
            "{SELECT_CONFIG} WHERE is_active AND lower(trader_address) = $1 ORDER BY created_at"
        ))
        .bind(hex::encode_prefixed(trader))
        .fetch_all(&self.pool)
        .await?;
        Ok(convert(rows))
    }
}
