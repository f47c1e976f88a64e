//! Prompt templates for the enrichment branches

use chrono::NaiveDate;

/// Document analysis prompt; the filing PDF is attached alongside it
pub fn document_analysis_prompt(ticker: &str, form_type: &str, report_end_date: NaiveDate) -> String {
    format!(
        r#"You are a financial analyst reviewing the attached {form_type} filing for {ticker} (period ended {report_end_date}).
Work only from the content of this document.

1. Key figures: revenue, operating income, net income, EPS, operating cash flow and the main debt metric.
   Give the current and prior-year values and the year-over-year change for each.
2. Signals: the top two or three strengths and the top two or three weaknesses, each tied to a figure from step 1.
3. Assessment: one paragraph concluding whether the picture in this filing is Positive, Negative or Mixed,
   and naming management's tone (for example Confident, Cautious, Defensive).
4. Investment implications: the changes and outlook items from this filing that matter most.
5. Guidance: explicit financial guidance and qualitative outlook stated in the filing, or "None provided".

Use bullet points for steps 1, 2, 4 and 5 and a paragraph for step 3. Do not use outside information."#
    )
}

/// Headline assessment prompt for the window `[start, end]`
pub fn headline_assessment_prompt(
    ticker: &str,
    company_name: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    let subject = match company_name {
        Some(name) if !name.trim().is_empty() => format!("{} ({})", name.trim(), ticker),
        _ => ticker.to_string(),
    };

    format!(
        r#"Assess news headlines about {subject} published between {start} and {end}.
Only consider headlines inside that window. Output only these sections:

**1. Key Headlines (max 3):** one bullet each.
**2. Headline Sentiment:** Positive, Negative or Neutral.
**3. 90-Day Outlook:** one sentence on the likely price direction (upward, downward or stable).
**4. Upside Catalysts (max 2):** bullets.
**5. Downside Risks (max 2):** bullets.

Keep it concise and focused on what could move the stock over the next 90 days."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headline_prompt_names_window() {
        let start = NaiveDate::from_ymd_opt(2024, 7, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 8, 2).unwrap();
        let prompt = headline_assessment_prompt("AAPL", Some("Apple Inc."), start, end);
        assert!(prompt.contains("Apple Inc. (AAPL)"));
        assert!(prompt.contains("between 2024-07-03 and 2024-08-02"));

        let prompt = headline_assessment_prompt("AAPL", Some("  "), start, end);
        assert!(prompt.contains("about AAPL published"));
    }
}
