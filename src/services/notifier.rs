use serde_json::json;

use crate::execution::ExecutionOutcome;
use crate::models::{CopyIntent, DlqEntry};

/// Telegram notification service. Failures are logged but never block the main flow.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    /// Send a Telegram message. Failures are logged as warnings.
    pub async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(status = %resp.status(), "Telegram sendMessage returned non-2xx");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to send Telegram notification"),
        }
    }
}

fn short(s: &str) -> &str {
    &s[..16.min(s.len())]
}

pub fn format_executed(intent: &CopyIntent, outcome: &ExecutionOutcome) -> String {
    let mut message = format!(
        "*Copy Executed*\nTrader: `{}`\nSide: {}\nSize: ${} @ {}\nPath: {}\nToken: `{}`",
        intent.trader_address,
        intent.copy_side,
        intent.copy_size_usd.round_dp(2),
        outcome
            .fill_price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "n/a".into()),
        outcome.path.map(|p| p.as_str()).unwrap_or("n/a"),
        short(&intent.token_id),
    );
    if let Some(stranded) = outcome.unreturned_usdc {
        message.push_str(&format!("\n*Unreturned USDC:* ${} still in bot wallet", stranded.round_dp(6)));
    }
    message
}

pub fn format_dead_letter(dlq: &DlqEntry) -> String {
    let intent = &dlq.entry.payload;
    format!(
        "*Job Dead-Lettered*\nReason: {} ({})\nAttempts: {}\nSide: {}\nSize: ${}\nProxy: `{}`\nKey: `{}`\nDetail: {}",
        dlq.reason,
        dlq.source,
        dlq.entry.queue_attempt,
        intent.copy_side,
        intent.copy_size_usd.round_dp(2),
        intent.proxy_address,
        short(&intent.idempotency_key),
        dlq.detail.as_deref().unwrap_or("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionPath;
    use crate::models::{IntentStatus, Side, SignalSource, SlippageMode};
    use alloy::primitives::Address;
    use rust_decimal::Decimal;

    fn intent() -> CopyIntent {
        CopyIntent {
            idempotency_key: "a1b2c3d4e5f6a7b8c9d0".into(),
            config_id: uuid::Uuid::nil(),
            wallet_address: Address::repeat_byte(0x44),
            proxy_address: Address::repeat_byte(0x22),
            trader_address: Address::repeat_byte(0x11),
            token_id: "71321045679252212594".into(),
            copy_side: Side::Buy,
            copy_size_usd: Decimal::from(50),
            leader_price: Decimal::new(5, 1),
            leader_tx_hash: None,
            source: SignalSource::ChainEvent,
            slippage_mode: SlippageMode::Auto,
            max_slippage: Decimal::new(5, 2),
            gas: None,
            expires_at: chrono::Utc::now(),
            status: IntentStatus::Pending,
            attempt: 0,
            error_message: None,
        }
    }

    fn outcome(unreturned_usdc: Option<Decimal>) -> ExecutionOutcome {
        ExecutionOutcome {
            success: true,
            tx_hash: None,
            order_id: Some("order-1".into()),
            fill_price: Some(Decimal::new(5, 1)),
            filled_shares: Some(Decimal::from(100)),
            path: Some(ExecutionPath::Direct),
            error: None,
            unreturned_usdc,
        }
    }

    #[test]
    fn test_executed_message_flags_unreturned_usdc() {
        let intent = intent();
        assert!(!format_executed(&intent, &outcome(None)).contains("Unreturned"));

        let message = format_executed(&intent, &outcome(Some(Decimal::new(38, 4))));
        assert!(message.contains("*Unreturned USDC:* $0.0038"));
    }
}
