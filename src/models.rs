use crate::errors::LeadGenError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Raw, adapter-specific record as returned by a source. No two sources share
/// a schema; the normalizer maps these onto [`Lead`].
pub type RawRecord = Map<String, Value>;

// ============ Pipeline Models ============

/// Canonical normalized lead.
///
/// Once normalized only `score` changes, and rescoring overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Display name. Never empty.
    pub name: String,
    /// Raw job title or headline.
    pub title: Option<String>,
    /// Employer or brokerage name.
    pub company: Option<String>,
    /// Free-form location ("Austin, TX").
    pub location: Option<String>,
    /// Validated email address.
    pub email: Option<String>,
    /// Phone in E.164 format.
    pub phone: Option<String>,
    /// Professional-network profile URL.
    pub linkedin_url: Option<String>,
    /// Company or personal website.
    pub website: Option<String>,
    /// Portfolio size estimate (units, doors or listings).
    pub properties_managed: Option<u32>,
    /// Name of the adapter that produced the record.
    pub source: String,
    /// Populated by the scoring engine.
    pub score: Option<Score>,
    /// Adapter-specific extra fields that did not map onto the canonical shape.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Lead {
    /// Creates an unscored lead with only the required fields set.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            company: None,
            location: None,
            email: None,
            phone: None,
            linkedin_url: None,
            website: None,
            properties_managed: None,
            source: source.into(),
            score: None,
            metadata: Map::new(),
        }
    }

    /// Total score, or 0.0 for a lead that has not been scored yet.
    pub fn total_score(&self) -> f64 {
        self.score.as_ref().map(|s| s.total).unwrap_or(0.0)
    }
}

/// Bounded rubric result for one lead. Every numeric field is in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// How closely the title matches property-management roles.
    pub role_relevance: f64,
    /// Portfolio-size proxy from company name, title and unit count.
    pub portfolio_fit: f64,
    /// Likelihood of being a decision maker.
    pub decision_authority: f64,
    /// Value of the lead's property market.
    pub location_value: f64,
    /// Language-model assessment, or the neutral value when degraded.
    pub ai_assessment: f64,
    /// Weighted combination of the five sub-scores.
    pub total: f64,
    /// Data completeness of the lead.
    pub confidence: f64,
    /// True when the language-model component could not be obtained.
    pub degraded: bool,
    /// Rationale, or the reason scoring was degraded.
    pub notes: Option<String>,
    /// Outreach suggestion from the language model.
    pub suggested_approach: Option<String>,
    /// Deterministic follow-up hints.
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Validated search request. Constructed per request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchCriteria {
    keywords: Vec<String>,
    location: Option<String>,
    industry: Option<String>,
    max_results: usize,
    min_score: f64,
}

impl SearchCriteria {
    /// Upper bound for `max_results`.
    pub const MAX_RESULTS_LIMIT: usize = 100;

    /// Validates and builds criteria.
    ///
    /// Keywords are trimmed and blank entries dropped; at least one must
    /// remain. `max_results` must be in `1..=100` and `min_score` in `[0, 1]`.
    pub fn new(
        keywords: Vec<String>,
        location: Option<String>,
        industry: Option<String>,
        max_results: usize,
        min_score: f64,
    ) -> Result<Self, LeadGenError> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        if keywords.is_empty() {
            return Err(LeadGenError::Validation(
                "At least one non-empty keyword is required".to_string(),
            ));
        }
        if !(1..=Self::MAX_RESULTS_LIMIT).contains(&max_results) {
            return Err(LeadGenError::Validation(format!(
                "max_results must be between 1 and {}, got {}",
                Self::MAX_RESULTS_LIMIT,
                max_results
            )));
        }
        if !min_score.is_finite() || !(0.0..=1.0).contains(&min_score) {
            return Err(LeadGenError::Validation(format!(
                "min_score must be between 0.0 and 1.0, got {}",
                min_score
            )));
        }

        Ok(Self {
            keywords,
            location: non_blank(location),
            industry: non_blank(industry),
            max_results,
            min_score,
        })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn industry(&self) -> Option<&str> {
        self.industry.as_deref()
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Export serialization format. CSV is always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = LeadGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(LeadGenError::Validation(format!(
                "Unsupported export format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_criteria_trims_and_drops_blank_keywords() {
        let criteria = SearchCriteria::new(
            kw(&["  property manager ", "", "   "]),
            Some("  Austin ".into()),
            Some("   ".into()),
            5,
            0.6,
        )
        .unwrap();

        assert_eq!(criteria.keywords(), &["property manager".to_string()]);
        assert_eq!(criteria.location(), Some("Austin"));
        assert_eq!(criteria.industry(), None);
    }

    #[test]
    fn test_criteria_rejects_invalid_input() {
        assert!(SearchCriteria::new(kw(&[" "]), None, None, 5, 0.5).is_err());
        assert!(SearchCriteria::new(vec![], None, None, 5, 0.5).is_err());
        assert!(SearchCriteria::new(kw(&["pm"]), None, None, 0, 0.5).is_err());
        assert!(SearchCriteria::new(kw(&["pm"]), None, None, 101, 0.5).is_err());
        assert!(SearchCriteria::new(kw(&["pm"]), None, None, 5, 1.5).is_err());
        assert!(SearchCriteria::new(kw(&["pm"]), None, None, 5, f64::NAN).is_err());
        assert!(SearchCriteria::new(kw(&["pm"]), None, None, 100, 0.0).is_ok());
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_unscored_lead_total_is_zero() {
        let lead = Lead::new("Jane Doe", "web");
        assert_eq!(lead.total_score(), 0.0);
        assert!(lead.metadata.is_empty());
    }
}
