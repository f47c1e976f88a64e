//! Model-backed ratio calculator
//!
//! Sends both periods' line items with the ratio formulas and asks for a
//! JSON object keyed by ratio name. Models sometimes answer margins and
//! growth rates in percent; [`adjust_ratio_scale`] pulls those back to
//! fractions when the fraction lands in the expected range.

use super::{FinancialSnapshot, RatioCalculator, RatioInputs};
use async_trait::async_trait;
use scout_common::genai::{strip_code_fence, GenerationRequest, TextGenerator};
use scout_common::models::RatioSet;
use scout_common::{Error, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ratio names the model is asked for (the price trend is computed locally)
pub const MODEL_RATIOS: [&str; 10] = [
    "debt_to_equity",
    "fcf_yield",
    "current_ratio",
    "roe",
    "gross_margin",
    "operating_margin",
    "quick_ratio",
    "eps",
    "eps_change",
    "revenue_growth",
];

/// Plausible range per ratio; values outside it are logged
const EXPECTED_RANGES: [(&str, f64, f64); 10] = [
    ("debt_to_equity", -3.0, 10.0),
    ("fcf_yield", -0.5, 0.30),
    ("current_ratio", 0.1, 10.0),
    ("roe", -1.0, 1.0),
    ("gross_margin", 0.0, 1.0),
    ("operating_margin", -1.0, 0.6),
    ("quick_ratio", 0.1, 8.0),
    ("eps", -50.0, 200.0),
    ("eps_change", -5.0, 5.0),
    ("revenue_growth", -0.8, 2.0),
];

/// Ratios a model may express in percent
const PERCENT_RATIOS: [&str; 6] = [
    "gross_margin",
    "operating_margin",
    "roe",
    "fcf_yield",
    "eps_change",
    "revenue_growth",
];

/// Bring an out-of-range ratio back to a fraction when it looks like a percent
///
/// A percent-style value (magnitude in `(1, 200]`) is divided by 100 if the
/// result falls in the expected range; any other outlier is kept as is.
pub fn adjust_ratio_scale(name: &str, value: f64) -> f64 {
    let Some(&(_, min, max)) = EXPECTED_RANGES.iter().find(|(n, _, _)| *n == name) else {
        return value;
    };
    if (min..=max).contains(&value) {
        return value;
    }

    if PERCENT_RATIOS.contains(&name) && value.abs() > 1.0 && value.abs() <= 200.0 {
        let fraction = value / 100.0;
        if (min..=max).contains(&fraction) {
            warn!(ratio = name, from = value, to = fraction, "Rescaling percent-style ratio");
            return fraction;
        }
    }

    warn!(ratio = name, value, min, max, "Ratio outside expected range, keeping outlier");
    value
}

/// Number or numeric string (thousands separators allowed)
fn ratio_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

pub struct GenAiCalculator {
    generator: Arc<dyn TextGenerator>,
    engine: String,
}

impl GenAiCalculator {
    /// `model` is only used to label the rows this calculator produces
    pub fn new(generator: Arc<dyn TextGenerator>, model: &str) -> Self {
        Self {
            generator,
            engine: format!("genai:{}", model),
        }
    }
}

#[async_trait]
impl RatioCalculator for GenAiCalculator {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn calculate(&self, inputs: &RatioInputs) -> Result<RatioSet> {
        let request = GenerationRequest {
            json_output: true,
            ..GenerationRequest::text(ratio_prompt(inputs))
        };
        let text = self.generator.generate(request).await?;
        debug!(ticker = %inputs.ticker, chars = text.len(), "Ratio response received");
        parse_ratio_response(&text)
    }
}

fn snapshot_json(snapshot: Option<&FinancialSnapshot>) -> String {
    let object: Map<String, Value> = snapshot
        .map(|s| {
            s.values()
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(*v)))
                .collect()
        })
        .unwrap_or_default();
    serde_json::to_string_pretty(&Value::Object(object)).unwrap_or_else(|_| "{}".to_string())
}

pub fn ratio_prompt(inputs: &RatioInputs) -> String {
    let names = MODEL_RATIOS.join(", ");
    let current = snapshot_json(Some(&inputs.current));
    let prior = snapshot_json(inputs.prior.as_ref());
    format!(
        r#"Compute financial ratios for {ticker} for the period ending {end}.

Current period line items:
```json
{current}
```

Prior period line items (empty when unavailable):
```json
{prior}
```

Compute only from the data above: {names}.
Return null for any ratio whose inputs are missing or whose denominator is zero.

- fcf_yield = (netcashprovidedbyusedinoperatingactivities - paymentstoacquireotherproductiveassets) / (shares_outstanding * price_adj_close); null if market capitalization is not positive
- debt_to_equity = total_liabilities / total_equity (use short_term_debt + long_term_debt when total_liabilities is absent)
- current_ratio = current_assets / current_liabilities
- roe = netincomeloss / total_equity
- gross_margin = (revenuefromcontractwithcustomerexcludingassessedtax - costofrevenue) / revenuefromcontractwithcustomerexcludingassessedtax
- operating_margin = operatingincomeloss / revenuefromcontractwithcustomerexcludingassessedtax
- quick_ratio = (current_assets - inventorynet) / current_liabilities
- eps = netincomeloss / shares_outstanding
- eps_change = (eps - prior eps) / prior eps
- revenue_growth = (revenue - prior revenue) / prior revenue

Respond with a single JSON object whose keys are exactly the ratio names above and whose values are numbers or null. No other text."#,
        ticker = inputs.ticker,
        end = inputs.report_end_date,
    )
}

/// Parse the model's JSON object into a ratio set; unknown keys are ignored
pub fn parse_ratio_response(text: &str) -> Result<RatioSet> {
    let value: Value = serde_json::from_str(strip_code_fence(text))?;
    let Value::Object(fields) = value else {
        return Err(Error::InvalidInput(format!(
            "ratio response is not a JSON object: {}",
            text.chars().take(200).collect::<String>()
        )));
    };

    let unexpected: Vec<&String> = fields
        .keys()
        .filter(|k| !MODEL_RATIOS.contains(&k.as_str()))
        .collect();
    if !unexpected.is_empty() {
        warn!(keys = ?unexpected, "Unexpected keys in ratio response");
    }

    let number = |name: &str| {
        fields
            .get(name)
            .and_then(ratio_value)
            .filter(|v| v.is_finite())
            .map(|v| adjust_ratio_scale(name, v))
    };
    Ok(RatioSet {
        debt_to_equity: number("debt_to_equity"),
        fcf_yield: number("fcf_yield"),
        current_ratio: number("current_ratio"),
        roe: number("roe"),
        gross_margin: number("gross_margin"),
        operating_margin: number("operating_margin"),
        quick_ratio: number("quick_ratio"),
        eps: number("eps"),
        eps_change: number("eps_change"),
        revenue_growth: number("revenue_growth"),
        price_trend_ratio: None,
    }
    .sanitized())
}
