// bot/src/quote/jupiter.rs
// Клиент Jupiter v6 API: котировки и инструкции свопа

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;
use tracing::debug;

use super::{Quote, QuoteProvider, QuoteRequest, SwapInstructions};
use crate::error::QuoteError;

/// Коды ошибок Jupiter, означающие "маршрута нет"
const NO_ROUTE_CODES: &[&str] = &["COULD_NOT_FIND_ANY_ROUTE", "NO_ROUTES_FOUND", "TOKEN_NOT_TRADABLE"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct JupiterClient {
    base_url: String,
    http_client: Client,
    slippage_bps: u16,
}

impl JupiterClient {
    pub fn new(base_url: String) -> Self {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            slippage_bps: 50,
        }
    }

    /// Проверка статуса и разбор ошибки Jupiter (`{ error, errorCode }`)
    async fn check(response: Response) -> Result<Response, QuoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(classify_error(status.as_u16(), &body))
    }
}

/// Разбор тела ошибки: "нет маршрута" отделяется от прочих ответов
fn classify_error(status: u16, body: &str) -> QuoteError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => {
            let message = parsed.error.unwrap_or_else(|| body.to_string());
            match parsed.error_code.as_deref() {
                Some(code) if NO_ROUTE_CODES.contains(&code) => QuoteError::NoRoute(message),
                _ => QuoteError::Api { status, message },
            }
        }
        Err(_) => QuoteError::Api {
            status,
            message: body.to_string(),
        },
    }
}

fn transport(e: reqwest::Error) -> QuoteError {
    QuoteError::Transport(e.to_string())
}

#[async_trait]
impl QuoteProvider for JupiterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let endpoint = format!("{}/quote", self.base_url);
        debug!(
            "Запрос котировки: {} {} -> {}",
            request.amount, request.input_mint, request.output_mint
        );

        let response = self
            .http_client
            .get(&endpoint)
            .query(&[
                ("inputMint", request.input_mint.to_string()),
                ("outputMint", request.output_mint.to_string()),
                ("amount", request.amount.to_string()),
                ("slippageBps", self.slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(transport)?;

        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| QuoteError::Decode(e.to_string()))?;

        if body.is_null() {
            return Err(QuoteError::NoRoute("Пустой ответ котировки".to_string()));
        }

        Quote::from_response(body)
    }

    async fn swap_instructions(
        &self,
        quote: &Quote,
        wallet: &Pubkey,
    ) -> Result<SwapInstructions, QuoteError> {
        let endpoint = format!("{}/swap-instructions", self.base_url);
        let request = SwapInstructionsRequest {
            quote_response: &quote.raw,
            user_public_key: wallet.to_string(),
            prioritization_fee_lamports: "auto",
        };

        let response = self
            .http_client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;

        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| QuoteError::Decode(e.to_string()))?;

        // Jupiter иногда отвечает 200 с полем error
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(QuoteError::Api {
                status: 200,
                message: error.to_string(),
            });
        }

        serde_json::from_value(body).map_err(|e| QuoteError::Decode(e.to_string()))
    }
}

// ============================================================================
// JSON СТРУКТУРЫ
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapInstructionsRequest<'a> {
    quote_response: &'a Value,
    user_public_key: String,
    prioritization_fee_lamports: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: Option<String>,
    error_code: Option<String>,
}
