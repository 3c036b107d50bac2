use std::collections::HashMap;
use std::future::Future;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use thiserror::Error;

pub mod sina;

/// Latest price per instrument code.
pub type Prices = HashMap<String, Decimal>;

#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("Quote request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Quote source returned status {0}")]
    Status(StatusCode),
}

pub trait QuoteSource {
    /// Fetches the current price of every code in one request. Failures are
    /// absorbed: a code without a price is simply missing from the result.
    fn fetch_prices(&self, codes: &[String]) -> impl Future<Output = Prices> + Send;
}
