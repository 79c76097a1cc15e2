// bot/src/trade_history.rs
// Журнал исполненных ног в JSON файле

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::executor::ExecutedSwap;

/// Одна завершённая нога. Запись неизменяема после добавления.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLegRecord {
    pub input_token: String,
    pub in_amount: String,
    pub output_token: String,
    pub out_amount: String,
    pub tx_id: String,
    pub timestamp: String,
}

impl TradeLegRecord {
    pub fn from_swap(swap: &ExecutedSwap, at: DateTime<Utc>) -> Self {
        Self {
            input_token: swap.input_mint.to_string(),
            in_amount: swap.in_amount.to_string(),
            output_token: swap.output_mint.to_string(),
            out_amount: swap.out_amount.to_string(),
            tx_id: swap.signature.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Файл сделок: массив перезаписывается целиком на каждое добавление.
/// Рассчитан на одного писателя на файл.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    path: PathBuf,
}

impl TradeHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Vec<TradeLegRecord>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Неверный формат {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Не удалось прочитать {}", self.path.display())),
        }
    }

    /// Добавление записи, возвращает число сделок в файле
    pub async fn append(&self, record: TradeLegRecord) -> Result<usize> {
        let mut trades = self.load().await?;
        trades.push(record);

        let json = serde_json::to_string_pretty(&trades).context("Не удалось сериализовать сделки")?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Не удалось записать {}", self.path.display()))?;

        Ok(trades.len())
    }
}
