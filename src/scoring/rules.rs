//! Deterministic, network-free sub-scores.
//!
//! Every function is pure over the lead's title, company, location and
//! portfolio size, and returns a value in `[0.0, 1.0]`.

use crate::models::Lead;

const PROPERTY_MANAGEMENT_TERMS: &[&str] = &[
    "property manager",
    "property management",
    "real estate manager",
    "residential manager",
    "commercial property manager",
    "facility manager",
    "leasing manager",
    "asset manager",
    "portfolio manager",
    "building manager",
    "hoa manager",
    "community manager",
    "maintenance supervisor",
    "property operations",
    "real estate operations",
];

const RELATED_TERMS: &[&str] = &[
    "real estate",
    "property",
    "properties",
    "facilities",
    "operations",
    "maintenance",
    "leasing",
    "rental",
];

const LARGE_PORTFOLIO_COMPANY_TERMS: &[&str] = &[
    "realty",
    "properties",
    "management group",
    "property management",
    "property group",
];

const LEADERSHIP_TERMS: &[&str] = &[
    "director", "head", "chief", "vp", "vice president", "president", "owner", "founder",
    "principal", "partner",
];

const MANAGEMENT_TERMS: &[&str] = &["manager", "supervisor", "lead"];

const PREMIUM_MARKETS: &[&str] = &[
    "new york",
    "san francisco",
    "los angeles",
    "miami",
    "seattle",
    "boston",
    "chicago",
];

const MID_TIER_MARKETS: &[&str] = &["austin", "denver", "portland", "nashville", "atlanta", "dallas"];

/// The four rule-based components of a score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleScores {
    pub role_relevance: f64,
    pub portfolio_fit: f64,
    pub decision_authority: f64,
    pub location_value: f64,
}

pub fn evaluate(lead: &Lead) -> RuleScores {
    RuleScores {
        role_relevance: role_relevance(lead),
        portfolio_fit: portfolio_fit(lead),
        decision_authority: decision_authority(lead),
        location_value: location_value(lead),
    }
}

/// True when `term` occurs in `haystack` on word boundaries.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| contains_term(haystack, t))
}

fn lowered(field: &Option<String>) -> String {
    field.as_deref().unwrap_or_default().to_lowercase()
}

pub fn role_relevance(lead: &Lead) -> f64 {
    let title = lowered(&lead.title);
    if contains_any(&title, PROPERTY_MANAGEMENT_TERMS) {
        1.0
    } else if contains_any(&title, RELATED_TERMS) {
        0.7
    } else {
        0.2
    }
}

pub fn portfolio_fit(lead: &Lead) -> f64 {
    let company = lowered(&lead.company);
    if contains_any(&company, LARGE_PORTFOLIO_COMPANY_TERMS) {
        return 1.0;
    }

    let mut score: f64 = 0.4;
    if let Some(count) = lead.properties_managed {
        score = score.max(match count {
            500.. => 1.0,
            100..=499 => 0.85,
            20..=99 => 0.7,
            5..=19 => 0.5,
            _ => 0.3,
        });
    }

    let title = lowered(&lead.title);
    if contains_term(&title, "manager") && title.contains("property") {
        score = score.max(0.7);
    }
    score
}

pub fn decision_authority(lead: &Lead) -> f64 {
    let title = lowered(&lead.title);
    if contains_any(&title, LEADERSHIP_TERMS) {
        1.0
    } else if contains_any(&title, MANAGEMENT_TERMS) {
        0.8
    } else {
        0.4
    }
}

pub fn location_value(lead: &Lead) -> f64 {
    let location = lowered(&lead.location);
    if contains_any(&location, PREMIUM_MARKETS) {
        1.0
    } else if contains_any(&location, MID_TIER_MARKETS) {
        0.8
    } else if location.trim().is_empty() {
        0.3
    } else {
        0.6
    }
}

/// Data completeness: 0.7 × core fields present + 0.3 × contact fields present.
pub fn confidence(lead: &Lead) -> f64 {
    let core = [
        !lead.name.trim().is_empty(),
        lead.title.is_some(),
        lead.company.is_some(),
        lead.location.is_some(),
        lead.properties_managed.is_some(),
    ];
    let contact = [
        lead.email.is_some(),
        lead.phone.is_some(),
        lead.linkedin_url.is_some(),
        lead.website.is_some(),
    ];
    let share = |fields: &[bool]| fields.iter().filter(|f| **f).count() as f64 / fields.len() as f64;
    (0.7 * share(&core) + 0.3 * share(&contact)).clamp(0.0, 1.0)
}

/// Follow-up hints derived from the rule scores.
pub fn recommendations(lead: &Lead, rules: &RuleScores, confidence: f64) -> Vec<String> {
    let mut out = Vec::new();
    if rules.role_relevance >= 0.8 {
        out.push("High-priority lead: schedule direct outreach within 24 hours".to_string());
    }
    if rules.decision_authority >= 1.0 {
        out.push("Decision maker: lead with a portfolio-wide coverage proposal".to_string());
    }
    if rules.portfolio_fit >= 0.7 {
        out.push("Research similar portfolio success stories for a targeted case study".to_string());
    }
    if rules.location_value >= 1.0 {
        out.push("Premium market: emphasise high-value property protection".to_string());
    }
    if lead.email.is_none() && lead.phone.is_none() {
        out.push("No direct contact channel: connect through the professional network first".to_string());
    }
    if confidence < 0.5 {
        out.push("Incomplete profile: enrich contact and company details before outreach".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(title: Option<&str>, company: Option<&str>, location: Option<&str>) -> Lead {
        let mut lead = Lead::new("Jane Doe", "web");
        lead.title = title.map(str::to_string);
        lead.company = company.map(str::to_string);
        lead.location = location.map(str::to_string);
        lead
    }

    #[test]
    fn test_role_relevance_tiers() {
        assert_eq!(role_relevance(&lead(Some("Senior Property Manager"), None, None)), 1.0);
        assert_eq!(role_relevance(&lead(Some("HOA Manager"), None, None)), 1.0);
        assert_eq!(role_relevance(&lead(Some("Real Estate Agent"), None, None)), 0.7);
        assert_eq!(role_relevance(&lead(Some("Short-term rental host"), None, None)), 0.7);
        assert_eq!(role_relevance(&lead(Some("Software Engineer"), None, None)), 0.2);
        assert_eq!(role_relevance(&lead(None, None, None)), 0.2);
    }

    #[test]
    fn test_portfolio_fit_tiers() {
        assert_eq!(portfolio_fit(&lead(None, Some("Acme Realty"), None)), 1.0);
        assert_eq!(portfolio_fit(&lead(None, Some("Hill Country Property Group"), None)), 1.0);
        assert_eq!(portfolio_fit(&lead(Some("Property Manager"), Some("Acme"), None)), 0.7);
        assert_eq!(portfolio_fit(&lead(Some("Analyst"), Some("Acme"), None)), 0.4);

        let mut big = lead(Some("Host"), None, None);
        big.properties_managed = Some(1200);
        assert_eq!(portfolio_fit(&big), 1.0);
        big.properties_managed = Some(2);
        assert_eq!(portfolio_fit(&big), 0.4);
    }

    #[test]
    fn test_decision_authority_tiers() {
        assert_eq!(decision_authority(&lead(Some("Director of Operations"), None, None)), 1.0);
        assert_eq!(decision_authority(&lead(Some("VP, Asset Management"), None, None)), 1.0);
        assert_eq!(decision_authority(&lead(Some("Leasing Manager"), None, None)), 0.8);
        assert_eq!(decision_authority(&lead(Some("Leasing Agent"), None, None)), 0.4);
        // Word boundaries: "headquarters" is not "head".
        assert_eq!(decision_authority(&lead(Some("Headquarters staff"), None, None)), 0.4);
    }

    #[test]
    fn test_location_value_tiers() {
        assert_eq!(location_value(&lead(None, None, Some("San Francisco, CA"))), 1.0);
        assert_eq!(location_value(&lead(None, None, Some("Austin, TX"))), 0.8);
        assert_eq!(location_value(&lead(None, None, Some("Boise, ID"))), 0.6);
        assert_eq!(location_value(&lead(None, None, None)), 0.3);
    }

    #[test]
    fn test_rules_are_deterministic() {
        let l = lead(Some("Property Manager"), Some("Acme Realty"), Some("Miami, FL"));
        assert_eq!(evaluate(&l), evaluate(&l));
    }

    #[test]
    fn test_confidence() {
        let bare = Lead::new("Jane Doe", "web");
        assert!((confidence(&bare) - 0.14).abs() < 1e-9);

        let mut full = lead(Some("PM"), Some("Acme"), Some("Austin"));
        full.properties_managed = Some(10);
        full.email = Some("jane@acme.co".into());
        full.phone = Some("+15124721234".into());
        full.linkedin_url = Some("https://network.example.com/in/jane".into());
        full.website = Some("https://acme.co".into());
        assert!((confidence(&full) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommendations() {
        let l = lead(Some("Director of Property Management"), Some("Acme Realty"), Some("Boston"));
        let rules = evaluate(&l);
        let recs = recommendations(&l, &rules, confidence(&l));
        assert!(recs.iter().any(|r| r.starts_with("High-priority lead")));
        assert!(recs.iter().any(|r| r.starts_with("Decision maker")));
        assert!(recs.iter().any(|r| r.starts_with("Premium market")));
        assert!(recs.iter().any(|r| r.starts_with("No direct contact channel")));
    }
}
