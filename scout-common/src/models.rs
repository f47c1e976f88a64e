//! Registry record types
//!
//! Dates are kept as `NaiveDate` in memory and stored as ISO-8601 TEXT.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Raw descriptor returned by the filing source, before registry checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingDescriptor {
    pub accession_number: String,
    pub ticker: String,
    pub company_name: Option<String>,
    pub form_type: String,
    /// Filing timestamp in the source's own offset; its local date is the filed date
    pub filed_at: DateTime<FixedOffset>,
    pub period_of_report: NaiveDate,
    pub filing_url: String,
}

impl FilingDescriptor {
    /// Natural key: accession number with hyphens stripped
    pub fn natural_key(&self) -> String {
        normalize_accession(&self.accession_number)
    }
}

/// Company identifiers looked up once per ticker during discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub cik: Option<String>,
    pub sic: Option<String>,
    pub exchange: Option<String>,
}

/// One discovered filing as persisted in `filing_metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingRecord {
    /// Natural key (hyphen-free accession number)
    pub accession_number: String,
    /// Subject key (upper-case ticker)
    pub ticker: String,
    pub company_name: Option<String>,
    pub form_type: String,
    pub filed_date: NaiveDate,
    pub report_end_date: NaiveDate,
    pub filing_url: String,
    pub cik: Option<String>,
    pub sic: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub exchange: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl FilingRecord {
    /// Build a metadata-only record from a source descriptor
    pub fn from_descriptor(
        descriptor: &FilingDescriptor,
        profile: Option<&CompanyProfile>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        let sic = profile
            .and_then(|p| p.sic.as_deref())
            .and_then(parse_sic_code);
        let (sector, industry) = match sic.as_deref().and_then(sector_industry) {
            Some((sector, industry)) => (Some(sector.to_string()), Some(industry.to_string())),
            None => (None, None),
        };

        Self {
            accession_number: descriptor.natural_key(),
            ticker: normalize_ticker(&descriptor.ticker),
            company_name: descriptor.company_name.clone(),
            form_type: descriptor.form_type.clone(),
            filed_date: descriptor.filed_at.date_naive(),
            report_end_date: descriptor.period_of_report,
            filing_url: descriptor.filing_url.clone(),
            cik: profile.and_then(|p| p.cik.clone()).filter(|s| !s.is_empty()),
            sic,
            sector,
            industry,
            exchange: profile.and_then(|p| p.exchange.clone()).filter(|s| !s.is_empty()),
            discovered_at,
        }
    }
}

/// Derived artifact kinds recorded against a filing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Document,
    Analysis,
    Headline,
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Document => "document",
            ArtifactKind::Analysis => "analysis",
            ArtifactKind::Headline => "headline",
            ArtifactKind::BalanceSheet => "balance_sheet",
            ArtifactKind::IncomeStatement => "income_statement",
            ArtifactKind::CashFlow => "cash_flow",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Document => "pdf",
            ArtifactKind::Analysis | ArtifactKind::Headline => "txt",
            ArtifactKind::BalanceSheet
            | ArtifactKind::IncomeStatement
            | ArtifactKind::CashFlow => "json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One daily price bar (`price_data`, unique on ticker + date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<i64>,
}

/// The eleven ratios computed per filing; `None` when not computable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioSet {
    pub debt_to_equity: Option<f64>,
    pub fcf_yield: Option<f64>,
    pub current_ratio: Option<f64>,
    pub roe: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub quick_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub eps_change: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub price_trend_ratio: Option<f64>,
}

impl RatioSet {
    /// Replace NaN and infinite values with `None`
    pub fn sanitized(mut self) -> Self {
        for value in self.values_mut() {
            if value.is_some_and(|v| !v.is_finite()) {
                *value = None;
            }
        }
        self
    }

    pub fn all_null(&self) -> bool {
        self.values().iter().all(|v| v.is_none())
    }

    fn values(&self) -> [Option<f64>; 11] {
        [
            self.debt_to_equity,
            self.fcf_yield,
            self.current_ratio,
            self.roe,
            self.gross_margin,
            self.operating_margin,
            self.quick_ratio,
            self.eps,
            self.eps_change,
            self.revenue_growth,
            self.price_trend_ratio,
        ]
    }

    fn values_mut(&mut self) -> [&mut Option<f64>; 11] {
        [
            &mut self.debt_to_equity,
            &mut self.fcf_yield,
            &mut self.current_ratio,
            &mut self.roe,
            &mut self.gross_margin,
            &mut self.operating_margin,
            &mut self.quick_ratio,
            &mut self.eps,
            &mut self.eps_change,
            &mut self.revenue_growth,
            &mut self.price_trend_ratio,
        ]
    }
}

/// One row of `ratios` (unique on accession number)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioRecord {
    pub accession_number: String,
    pub ticker: String,
    pub filed_date: NaiveDate,
    pub ratios: RatioSet,
    pub data_source: String,
    pub created_at: DateTime<Utc>,
}

/// Strip hyphens from an accession number (`0000320193-24-000123` → `000032019324000123`)
pub fn normalize_accession(raw: &str) -> String {
    raw.trim().replace('-', "")
}

pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Extract a 4-digit SIC code, padding 3-digit codes with a leading zero
///
/// `"100"` → `"0100"`, `"7372 Services-Prepackaged Software"` → `"7372"`.
pub fn parse_sic_code(raw: &str) -> Option<String> {
    let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        3 => Some(format!("0{}", digits)),
        4 => Some(digits),
        // Leading 5+ digit runs are truncated to their first four
        n if n > 4 => Some(digits[..4].to_string()),
        _ => None,
    }
}

const SIC_EXACT: &[(u16, &str, &str)] = &[
    (1311, "Basic Materials", "Oil & Gas Extraction"),
    (2821, "Basic Materials", "Plastic Materials & Synthetics"),
    (2834, "Healthcare", "Pharmaceutical Preparations"),
    (2860, "Industrials", "Industrial Organic Chemicals"),
    (3550, "Industrials", "Special Industry Machinery"),
    (3560, "Industrials", "General Industrial Machinery"),
    (3571, "Technology", "Electronic Computers"),
    (3572, "Technology", "Computer Storage Devices"),
    (3714, "Industrials", "Motor Vehicle Parts"),
    (3823, "Industrials", "Instruments for Measurement"),
    (4899, "Industrials", "Communications Services"),
    (6221, "Financial Services", "Commodity Contracts Dealing"),
    (6411, "Financial Services", "Insurance Agents & Brokers"),
    (6770, "Financial Services", "Blank Checks"),
    (7372, "Technology", "Prepackaged Software"),
];

const SIC_RANGES: &[(u16, u16, &str, &str)] = &[
    (100, 1000, "Basic Materials", "Agriculture"),
    (1000, 1500, "Basic Materials", "Mining"),
    (1500, 1800, "Industrials", "Construction"),
    (2000, 4000, "Industrials", "Manufacturing"),
    (4000, 5000, "Industrials", "Transportation & Utilities"),
    (5000, 5200, "Consumer Cyclical", "Wholesale Trade"),
    (5200, 6000, "Consumer Cyclical", "Retail"),
    (6000, 6800, "Financial Services", "Finance & Insurance"),
    (7000, 9000, "Consumer Defensive", "Services"),
    (9000, 10000, "Industrials", "Public Administration"),
];

/// Map a 4-digit SIC code to (sector, industry); exact codes win over ranges
pub fn sector_industry(sic: &str) -> Option<(&'static str, &'static str)> {
    let code: u16 = sic.parse().ok()?;
    if let Some((_, sector, industry)) = SIC_EXACT.iter().find(|(c, _, _)| *c == code) {
        return Some((sector, industry));
    }
    SIC_RANGES
        .iter()
        .find(|(lo, hi, _, _)| (*lo..*hi).contains(&code))
        .map(|(_, _, sector, industry)| (*sector, *industry))
}
