//! Local formula engine
//!
//! Every ratio is `None` when an input is missing or a denominator is zero.

use super::{FinancialSnapshot, RatioCalculator, RatioInputs};
use async_trait::async_trait;
use scout_common::models::RatioSet;
use scout_common::Result;

pub const OPERATING_CASH_FLOW: &str = "netcashprovidedbyusedinoperatingactivities";
pub const CAPITAL_EXPENDITURE: &str = "paymentstoacquireotherproductiveassets";
pub const SHARES_OUTSTANDING: &str = "shares_outstanding";
pub const PRICE: &str = "price_adj_close";
pub const TOTAL_LIABILITIES: &str = "total_liabilities";
pub const SHORT_TERM_DEBT: &str = "short_term_debt";
pub const LONG_TERM_DEBT: &str = "long_term_debt";
pub const TOTAL_EQUITY: &str = "total_equity";
pub const CURRENT_ASSETS: &str = "current_assets";
pub const CURRENT_LIABILITIES: &str = "current_liabilities";
pub const INVENTORY: &str = "inventorynet";
pub const NET_INCOME: &str = "netincomeloss";
pub const REVENUE: &str = "revenuefromcontractwithcustomerexcludingassessedtax";
pub const COST_OF_REVENUE: &str = "costofrevenue";
pub const OPERATING_INCOME: &str = "operatingincomeloss";

#[derive(Debug, Default, Clone, Copy)]
pub struct FormulaCalculator;

#[async_trait]
impl RatioCalculator for FormulaCalculator {
    fn engine(&self) -> &str {
        "formula"
    }

    async fn calculate(&self, inputs: &RatioInputs) -> Result<RatioSet> {
        Ok(compute(&inputs.current, inputs.prior.as_ref()))
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}

/// Relative change from `prior` to `current`
fn change(current: Option<f64>, prior: Option<f64>) -> Option<f64> {
    match (current, prior) {
        (Some(c), Some(p)) if p != 0.0 => Some((c - p) / p),
        _ => None,
    }
}

/// Total liabilities, or short- plus long-term debt when liabilities are not reported
fn total_debt(s: &FinancialSnapshot) -> Option<f64> {
    s.get(TOTAL_LIABILITIES).or_else(|| {
        match (s.get(SHORT_TERM_DEBT), s.get(LONG_TERM_DEBT)) {
            (None, None) => None,
            (short, long) => Some(short.unwrap_or(0.0) + long.unwrap_or(0.0)),
        }
    })
}

fn eps(s: &FinancialSnapshot) -> Option<f64> {
    ratio(s.get(NET_INCOME), s.get(SHARES_OUTSTANDING))
}

fn fcf_yield(s: &FinancialSnapshot) -> Option<f64> {
    let free_cash_flow = s.get(OPERATING_CASH_FLOW)? - s.get(CAPITAL_EXPENDITURE)?;
    let market_cap = s.get(SHARES_OUTSTANDING)? * s.get(PRICE)?;
    (market_cap > 0.0).then(|| free_cash_flow / market_cap)
}

pub fn compute(current: &FinancialSnapshot, prior: Option<&FinancialSnapshot>) -> RatioSet {
    let revenue = current.get(REVENUE);
    let gross_profit = match (revenue, current.get(COST_OF_REVENUE)) {
        (Some(r), Some(c)) => Some(r - c),
        _ => None,
    };
    let quick_assets = match (current.get(CURRENT_ASSETS), current.get(INVENTORY)) {
        (Some(a), Some(i)) => Some(a - i),
        _ => None,
    };

    RatioSet {
        debt_to_equity: ratio(total_debt(current), current.get(TOTAL_EQUITY)),
        fcf_yield: fcf_yield(current),
        current_ratio: ratio(current.get(CURRENT_ASSETS), current.get(CURRENT_LIABILITIES)),
        roe: ratio(current.get(NET_INCOME), current.get(TOTAL_EQUITY)),
        gross_margin: ratio(gross_profit, revenue),
        operating_margin: ratio(current.get(OPERATING_INCOME), revenue),
        quick_ratio: ratio(quick_assets, current.get(CURRENT_LIABILITIES)),
        eps: eps(current),
        eps_change: change(eps(current), prior.and_then(eps)),
        revenue_growth: change(revenue, prior.and_then(|p| p.get(REVENUE))),
        price_trend_ratio: None,
    }
    .sanitized()
}
