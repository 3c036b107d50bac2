use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use itertools::Itertools;
use reqwest::{header, Client};
use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::quote::{Prices, QuoteError, QuoteSource};

const ENDPOINT: &str = "http://hq.sinajs.cn";
const REFERER: &str = "http://finance.sina.com.cn";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// reply fields: name, open, previous close, current price, ...
const PREV_CLOSE_FIELD: usize = 2;
const CURRENT_PRICE_FIELD: usize = 3;

#[derive(Debug, Clone)]
pub struct Sina {
    client: Client,
    endpoint: String,
}

impl Sina {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, codes: &[String]) -> Result<String, QuoteError> {
        let url = format!("{}/list={}", self.endpoint, codes.iter().join(","));
        debug!("Getting quotes {}", url);

        let res = self
            .client
            .get(url)
            .header(header::REFERER, REFERER)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(QuoteError::Status(status));
        }

        Ok(res.text().await?)
    }
}

impl QuoteSource for Sina {
    async fn fetch_prices(&self, codes: &[String]) -> Prices {
        if codes.is_empty() {
            return Prices::new();
        }

        match self.request(codes).await {
            Ok(body) => parse_quotes(&body),
            Err(err) => {
                error!("Failed to fetch prices : {}", err);
                Prices::new()
            }
        }
    }
}

/// Parses a reply made of `var hq_str_<code>="f0,f1,f2,f3,...";` lines.
/// Lines that do not have this shape are skipped.
pub fn parse_quotes(body: &str) -> Prices {
    body.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<(String, Decimal)> {
    let (name, data) = line.trim().split_once('=')?;

    let code = name.rsplit('_').next()?.trim();
    if code.is_empty() {
        return None;
    }

    let data = data.trim().trim_end_matches(';').trim_matches('"');
    let fields: Vec<&str> = data.split(',').collect();
    if fields.len() <= CURRENT_PRICE_FIELD {
        debug!("Skipping quote line for {} : {} fields", code, fields.len());
        return None;
    }

    let price = select_price(fields[PREV_CLOSE_FIELD], fields[CURRENT_PRICE_FIELD])?;
    Some((code.to_string(), price))
}

// a zero current price means halted or not yet open, use the previous close
fn select_price(prev_close: &str, current: &str) -> Option<Decimal> {
    let current = Decimal::from_str(current.trim()).ok()?;
    let price = if current.is_zero() {
        Decimal::from_str(prev_close.trim()).ok()?
    } else {
        current
    };
    (price >= Decimal::ZERO).then_some(price)
}
