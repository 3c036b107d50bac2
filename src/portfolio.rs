use std::fmt::Display;

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::warn;

use crate::config::HoldingSpec;
use crate::quote::Prices;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Holding {
    pub code: String,
    pub name: String,
    pub price: Decimal,
    pub shares: u64,
    pub market_value: Decimal,
    /// Share of the total value in percent, `None` while the total is zero.
    pub current_pct: Option<Decimal>,
    pub min_pct: Decimal,
    pub max_pct: Decimal,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum Alert {
    BelowBand {
        name: String,
        code: String,
        price: Decimal,
        current_pct: Decimal,
        min_pct: Decimal,
    },
    AboveBand {
        name: String,
        code: String,
        price: Decimal,
        current_pct: Decimal,
        max_pct: Decimal,
    },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
    pub holdings: Vec<Holding>,
    pub alerts: Vec<Alert>,
}

/// Values the portfolio at `prices` and checks every holding against its band.
///
/// A code missing from `prices` is valued at zero. When the whole portfolio is
/// worth zero no weights are computed and no alerts are raised.
pub fn evaluate(portfolio: &[HoldingSpec], prices: &Prices) -> Result<PortfolioSnapshot> {
    let mut total_value = dec!(0);
    let mut holdings = Vec::with_capacity(portfolio.len());

    for spec in portfolio {
        let price = match prices.get(&spec.code) {
            Some(price) => *price,
            None => {
                warn!("No price for {}", spec.code);
                dec!(0)
            }
        };

        let market_value = price
            .checked_mul(Decimal::from(spec.held_shares))
            .ok_or_else(|| anyhow!("Market value overflow for {}", spec.code))?;
        total_value = total_value
            .checked_add(market_value)
            .ok_or_else(|| anyhow!("Total value overflow at {}", spec.code))?;

        holdings.push(Holding {
            code: spec.code.clone(),
            name: spec.display_name().to_string(),
            price,
            shares: spec.held_shares,
            market_value,
            current_pct: None,
            min_pct: spec.min_percentage,
            max_pct: spec.max_percentage,
        });
    }

    let mut alerts = vec![];
    if total_value > dec!(0) {
        for holding in holdings.iter_mut() {
            // ratio first, it is at most 1 so scaling by 100 cannot overflow
            let current_pct = holding.market_value / total_value * dec!(100);
            holding.current_pct = Some(current_pct);

            if current_pct < holding.min_pct {
                alerts.push(Alert::BelowBand {
                    name: holding.name.clone(),
                    code: holding.code.clone(),
                    price: holding.price,
                    current_pct,
                    min_pct: holding.min_pct,
                });
            } else if current_pct > holding.max_pct {
                alerts.push(Alert::AboveBand {
                    name: holding.name.clone(),
                    code: holding.code.clone(),
                    price: holding.price,
                    current_pct,
                    max_pct: holding.max_pct,
                });
            }
        }
    }

    Ok(PortfolioSnapshot {
        total_value,
        holdings,
        alerts,
    })
}

impl Display for Holding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}): price {:.4}, shares {}, value {:.4}, weight {:.4}%",
            self.name,
            self.code,
            self.price.round_dp(4),
            self.shares,
            self.market_value.round_dp(4),
            self.current_pct.unwrap_or(dec!(0)).round_dp(4)
        )
    }
}

impl Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::BelowBand {
                name,
                code,
                price,
                current_pct,
                min_pct,
            } => write!(
                f,
                "{}({}) price:{} weight:{:.4}% < Min:{}%",
                name,
                code,
                price,
                current_pct.round_dp(4),
                min_pct
            ),
            Alert::AboveBand {
                name,
                code,
                price,
                current_pct,
                max_pct,
            } => write!(
                f,
                "{}({}) price:{} weight:{:.4}% > Max:{}%",
                name,
                code,
                price,
                current_pct.round_dp(4),
                max_pct
            ),
        }
    }
}

impl Display for PortfolioSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lines = self
            .holdings
            .iter()
            .map(|holding| holding.to_string())
            .collect::<Vec<String>>();
        write!(f, "[Holdings]\n\n{}", lines.join("\n\n"))
    }
}
