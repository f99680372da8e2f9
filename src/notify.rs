//! Telegram notifications
//!
//! Fire-and-forget `sendMessage` calls. Disabled unless both the bot token and the
//! chat id are configured; delivery failures are logged and swallowed.
//!
//! `send` posts plain text. The formatted trade messages use legacy Markdown with every
//! interpolated field escaped.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::types::{ClosedTrade, Position};

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Clone)]
pub struct Notifier {
    client: Client,
    target: Option<(String, String)>,
}

impl Notifier {
    pub fn new(config: &TelegramConfig) -> Self {
        let token = config
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let chat = config
            .chat_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let target = match (token, chat) {
            (Some(token), Some(chat)) => Some((
                format!(
                    "{}/bot{}/sendMessage",
                    config.api_url.trim_end_matches('/'),
                    token
                ),
                chat.to_string(),
            )),
            _ => None,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, target }
    }

    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            target: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Plain-text message, sent as-is
    pub async fn send(&self, text: &str) {
        self.post(text, None).await;
    }

    async fn send_markdown(&self, text: &str) {
        self.post(text, Some("Markdown")).await;
    }

    async fn post(&self, text: &str, parse_mode: Option<&str>) {
        let Some((url, chat_id)) = &self.target else {
            return;
        };
        let body = SendMessage {
            chat_id,
            text,
            parse_mode,
        };
        match self.client.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => debug!("Telegram message sent"),
            Ok(resp) => warn!(status = %resp.status(), "Telegram rejected message"),
            Err(e) => warn!(error = %e, "Telegram send failed"),
        }
    }

    pub async fn entry(&self, position: &Position, confidence: f64) {
        self.send_markdown(&entry_message(position, confidence)).await;
    }

    pub async fn trailing(&self, symbol: &str, price: f64, stop: f64) {
        self.send_markdown(&format!(
            "🔁 *{}* trailing stop → `{stop:.6}` (price `{price:.6}`)",
            escape_markdown(symbol)
        ))
        .await;
    }

    pub async fn closed(&self, trade: &ClosedTrade) {
        self.send_markdown(&closed_message(trade)).await;
    }

    pub async fn training(&self, symbol: &str, accepted: bool, val_accuracy: f64) {
        let verdict = if accepted { "accepted" } else { "rejected" };
        self.send_markdown(&format!(
            "🧠 *{}* model {verdict} (val acc `{:.1}%`)",
            escape_markdown(symbol),
            val_accuracy * 100.0
        ))
        .await;
    }
}

/// Escape the legacy Markdown entities Telegram parses
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn entry_message(position: &Position, confidence: f64) -> String {
    format!(
        "📥 *{}* {} `{}` @ `{:.6}`\nSL `{:.6}` · TP `{:.6}` · conf `{:.2}`",
        escape_markdown(&position.symbol),
        position.side,
        position.amount,
        position.entry_price,
        position.stop_loss_price,
        position.take_profit_price,
        confidence
    )
}

fn closed_message(trade: &ClosedTrade) -> String {
    let icon = if trade.is_win() { "✅" } else { "🔻" };
    format!(
        "{icon} *{}* {} closed @ `{:.6}`\nPnL `{:+.4}` ({:+.2}%)",
        escape_markdown(&trade.symbol),
        trade.side,
        trade.exit_price,
        trade.pnl,
        trade.pnl_pct
    )
}
