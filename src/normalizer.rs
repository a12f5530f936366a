//! Raw adapter records → canonical [`Lead`]s.
//!
//! Pure, no I/O. Each source has a small table of the keys it uses for each
//! canonical field; anything not consumed lands in `metadata`.

use crate::models::{Lead, RawRecord};
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .unwrap()
});

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*").unwrap());

/// Title given to listing-site hosts, who never carry one.
pub const LISTING_HOST_TITLE: &str = "Short-term rental host";

/// Source keys for each canonical field, in priority order.
struct FieldMap {
    name: &'static [&'static str],
    title: &'static [&'static str],
    company: &'static [&'static str],
    location: &'static [&'static str],
    email: &'static [&'static str],
    phone: &'static [&'static str],
    linkedin_url: &'static [&'static str],
    website: &'static [&'static str],
    properties_managed: &'static [&'static str],
    default_title: Option<&'static str>,
}

const PROFESSIONAL_NETWORK_FIELDS: FieldMap = FieldMap {
    name: &["fullName", "full_name", "name"],
    title: &["headline", "title", "position"],
    company: &["companyName", "company", "currentCompany"],
    location: &["location", "geoLocation"],
    email: &["email", "emailAddress"],
    phone: &["phone", "phoneNumber"],
    linkedin_url: &["profileUrl", "profile_url", "url"],
    website: &["companyWebsite", "website"],
    properties_managed: &["propertiesManaged", "portfolioSize", "units"],
    default_title: None,
};

const WEB_FIELDS: FieldMap = FieldMap {
    name: &["name", "contact_name"],
    title: &["title", "role"],
    company: &["company", "organization"],
    location: &["location", "address"],
    email: &["email"],
    phone: &["phone", "telephone"],
    linkedin_url: &["linkedin", "linkedin_url"],
    website: &["website", "url"],
    properties_managed: &["properties_managed", "units", "doors"],
    default_title: None,
};

const LISTING_FIELDS: FieldMap = FieldMap {
    name: &["host_name", "name"],
    title: &["title"],
    company: &["company", "business_name"],
    location: &["host_location", "location"],
    email: &["email"],
    phone: &["phone"],
    linkedin_url: &[],
    website: &["profile_url", "website"],
    properties_managed: &["listings_count", "properties_managed"],
    default_title: Some(LISTING_HOST_TITLE),
};

const GENERIC_FIELDS: FieldMap = FieldMap {
    name: &["name", "full_name", "fullName", "host_name"],
    title: &["title", "headline", "position", "role"],
    company: &["company", "companyName", "organization"],
    location: &["location", "city"],
    email: &["email"],
    phone: &["phone"],
    linkedin_url: &["linkedin_url", "linkedin", "profileUrl"],
    website: &["website", "url"],
    properties_managed: &["properties_managed", "propertiesManaged", "units"],
    default_title: None,
};

fn field_map(source: &str) -> &'static FieldMap {
    match source {
        "linkedin" => &PROFESSIONAL_NETWORK_FIELDS,
        "web" => &WEB_FIELDS,
        "listing" => &LISTING_FIELDS,
        _ => &GENERIC_FIELDS,
    }
}

/// Maps one raw record onto a [`Lead`]. Returns `None` when the record has no
/// usable name.
pub fn normalize(raw: &RawRecord, source: &str) -> Option<Lead> {
    let fields = field_map(source);
    let mut rest = raw.clone();

    let name = take_text(&mut rest, fields.name).or_else(|| compose_name(&mut rest))?;
    let mut lead = Lead::new(name, source);

    lead.title = take_text(&mut rest, fields.title).or(fields.default_title.map(str::to_string));
    lead.company = take_text(&mut rest, fields.company);
    lead.location = take_text(&mut rest, fields.location);
    lead.linkedin_url = take_text(&mut rest, fields.linkedin_url);
    lead.website = take_text(&mut rest, fields.website);

    // Rejected canonical values, written after the leftovers so they win collisions.
    let mut rejected = Vec::new();

    if let Some(raw_email) = take_text(&mut rest, fields.email) {
        match normalize_email(&raw_email) {
            Some(email) => lead.email = Some(email),
            None => rejected.push(("raw_email".to_string(), Value::String(raw_email))),
        }
    }

    if let Some(raw_phone) = take_text(&mut rest, fields.phone) {
        match normalize_phone(&raw_phone) {
            Some(phone) => lead.phone = Some(phone),
            None => rejected.push(("raw_phone".to_string(), Value::String(raw_phone))),
        }
    }

    if let Some((key, value)) = take_value(&mut rest, fields.properties_managed) {
        match parse_properties_managed(&value) {
            Some(count) => lead.properties_managed = Some(count),
            None => rejected.push((key, value)),
        }
    }

    let mut metadata = Map::new();
    for (key, value) in rest {
        flatten_into(&mut metadata, &key, value);
    }
    for (key, value) in rejected {
        metadata.insert(key, value);
    }
    lead.metadata = metadata;

    Some(lead)
}

/// Dedup key: lowercase, whitespace-collapsed `(name, company)`.
pub fn dedup_key(lead: &Lead) -> (String, String) {
    fn fold(s: &str) -> String {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
    (
        fold(&lead.name),
        lead.company.as_deref().map(fold).unwrap_or_default(),
    )
}

/// Validates an email address, rejecting placeholder patterns.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let fake_patterns = ["999999", "111111", "000000", "123456789", "example.com", "noreply"];
    if let Some(pattern) = fake_patterns.iter().find(|p| email.contains(*p)) {
        tracing::debug!("Rejected placeholder email (pattern '{}'): {}", pattern, email);
        return false;
    }

    EMAIL_RE.is_match(email)
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().trim_start_matches("mailto:").to_lowercase();
    is_valid_email(&email).then_some(email)
}

/// Parses a phone number as US and formats it E.164.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.chars().filter(char::is_ascii_digit).count() < 10 {
        return None;
    }

    match phonenumber::parse(Some(CountryId::US), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::E164).to_string())
        }
        Ok(_) => {
            tracing::debug!("Invalid phone number: {}", raw);
            None
        }
        Err(e) => {
            tracing::debug!("Failed to parse phone '{}': {:?}", raw, e);
            None
        }
    }
}

/// Accepts integers, non-negative floats and strings such as "120 units" or
/// "1,200 doors".
pub fn parse_properties_managed(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => COUNT_RE
            .find(s)
            .and_then(|m| m.as_str().replace(',', "").parse().ok()),
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.split_whitespace().collect::<Vec<_>>().join(" ")),
        Value::Number(n) => Some(n.to_string()),
        // Nested shapes like {"company": {"name": "Acme"}}.
        Value::Object(obj) => obj.get("name").and_then(value_text),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// Removes the first key in `keys` with a usable value and returns it.
fn take_value(rest: &mut RawRecord, keys: &[&str]) -> Option<(String, Value)> {
    let key = keys
        .iter()
        .find(|k| rest.get(**k).is_some_and(|v| !v.is_null()))?;
    rest.remove(*key).map(|v| (key.to_string(), v))
}

fn take_text(rest: &mut RawRecord, keys: &[&str]) -> Option<String> {
    let key = keys
        .iter()
        .find(|k| rest.get(**k).and_then(value_text).is_some())?;
    let value = rest.remove(*key)?;
    let text = value_text(&value);
    // Siblings of a nested "name" stay behind for metadata.
    if let Value::Object(mut obj) = value {
        obj.remove("name");
        if !obj.is_empty() {
            rest.insert(key.to_string(), Value::Object(obj));
        }
    }
    text
}

fn compose_name(rest: &mut RawRecord) -> Option<String> {
    let first = rest.get("firstName").and_then(value_text);
    let last = rest.get("lastName").and_then(value_text);
    let name = match (first, last) {
        (Some(f), Some(l)) => format!("{} {}", f, l),
        (Some(f), None) => f,
        (None, Some(l)) => l,
        (None, None) => return None,
    };
    rest.remove("firstName");
    rest.remove("lastName");
    Some(name)
}

/// Nested objects become `parent_child` keys; nulls are dropped.
fn flatten_into(out: &mut Map<String, Value>, key: &str, value: Value) {
    match value {
        Value::Null => {}
        Value::Object(obj) => {
            for (child, v) in obj {
                flatten_into(out, &format!("{}_{}", key, child), v);
            }
        }
        other => {
            out.insert(key.to_string(), other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_professional_network_mapping() {
        let raw = record(json!({
            "fullName": "Jane  Doe",
            "headline": "Senior Property Manager",
            "company": {"name": "Acme Realty", "size": "51-200"},
            "location": "Austin, TX",
            "profileUrl": "https://network.example.com/in/jane",
            "connections": 500
        }));
        let lead = normalize(&raw, "linkedin").unwrap();

        assert_eq!(lead.name, "Jane Doe");
        assert_eq!(lead.title.as_deref(), Some("Senior Property Manager"));
        assert_eq!(lead.company.as_deref(), Some("Acme Realty"));
        assert_eq!(lead.location.as_deref(), Some("Austin, TX"));
        assert_eq!(
            lead.linkedin_url.as_deref(),
            Some("https://network.example.com/in/jane")
        );
        assert_eq!(lead.source, "linkedin");
        assert!(lead.score.is_none());
        assert_eq!(lead.metadata["connections"], json!(500));
        assert_eq!(lead.metadata["company_size"], json!("51-200"));
    }

    #[test]
    fn test_first_and_last_name_are_composed() {
        let raw = record(json!({"firstName": "Bob", "lastName": "Smith"}));
        let lead = normalize(&raw, "linkedin").unwrap();
        assert_eq!(lead.name, "Bob Smith");
        assert!(lead.metadata.is_empty());
    }

    #[test]
    fn test_nameless_record_is_rejected() {
        assert!(normalize(&record(json!({"title": "Property Manager"})), "web").is_none());
        assert!(normalize(&record(json!({"name": "   "})), "web").is_none());
        assert!(normalize(&record(json!({"name": null})), "web").is_none());
    }

    #[test]
    fn test_listing_host_mapping() {
        let raw = record(json!({
            "host_name": "Sam Rivera",
            "host_location": "Austin, TX",
            "listings_count": 14,
            "superhost": true,
            "profile_url": "https://listings.example.com/users/show/1001"
        }));
        let lead = normalize(&raw, "listing").unwrap();

        assert_eq!(lead.name, "Sam Rivera");
        assert_eq!(lead.title.as_deref(), Some(LISTING_HOST_TITLE));
        assert_eq!(lead.properties_managed, Some(14));
        assert_eq!(
            lead.website.as_deref(),
            Some("https://listings.example.com/users/show/1001")
        );
        assert_eq!(lead.metadata["superhost"], json!(true));
    }

    #[test]
    fn test_contacts_are_normalized_or_kept_raw() {
        let raw = record(json!({
            "name": "Maria Lopez",
            "email": " Maria@HillCountryPG.com ",
            "phone": "(512) 472-1234"
        }));
        let lead = normalize(&raw, "web").unwrap();
        assert_eq!(lead.email.as_deref(), Some("maria@hillcountrypg.com"));
        assert_eq!(lead.phone.as_deref(), Some("+15124721234"));

        let raw = record(json!({
            "name": "Maria Lopez",
            "email": "not-an-email",
            "phone": "12345"
        }));
        let lead = normalize(&raw, "web").unwrap();
        assert!(lead.email.is_none());
        assert!(lead.phone.is_none());
        assert_eq!(lead.metadata["raw_email"], json!("not-an-email"));
        assert_eq!(lead.metadata["raw_phone"], json!("12345"));
    }

    #[test]
    fn test_unparseable_properties_go_to_metadata() {
        let raw = record(json!({"name": "Ann Lee", "units": "several"}));
        let lead = normalize(&raw, "web").unwrap();
        assert_eq!(lead.properties_managed, None);
        assert_eq!(lead.metadata["units"], json!("several"));
    }

    #[test]
    fn test_parse_properties_managed() {
        assert_eq!(parse_properties_managed(&json!(120)), Some(120));
        assert_eq!(parse_properties_managed(&json!(45.7)), Some(45));
        assert_eq!(parse_properties_managed(&json!(-3)), None);
        assert_eq!(parse_properties_managed(&json!("120 units")), Some(120));
        assert_eq!(parse_properties_managed(&json!("1,200 doors")), Some(1200));
        assert_eq!(parse_properties_managed(&json!("many")), None);
        assert_eq!(parse_properties_managed(&json!(true)), None);
    }

    #[test]
    fn test_nested_metadata_is_flattened() {
        let raw = record(json!({
            "name": "Ann Lee",
            "stats": {"reviews": 12, "rating": {"avg": 4.9}},
            "ignored": null
        }));
        let lead = normalize(&raw, "web").unwrap();
        assert_eq!(lead.metadata["stats_reviews"], json!(12));
        assert_eq!(lead.metadata["stats_rating_avg"], json!(4.9));
        assert!(!lead.metadata.contains_key("ignored"));
    }

    #[test]
    fn test_raw_contacts_survive_colliding_metadata() {
        let raw = record(json!({
            "name": "Ann Lee",
            "email": "not-an-email",
            "phone": "12",
            "raw": {"email": "scraped@elsewhere", "phone": "n/a"}
        }));
        let lead = normalize(&raw, "web").unwrap();
        assert!(lead.email.is_none());
        assert!(lead.phone.is_none());
        assert_eq!(lead.metadata["raw_email"], json!("not-an-email"));
        assert_eq!(lead.metadata["raw_phone"], json!("12"));
    }

    #[test]
    fn test_null_priority_key_falls_through() {
        let raw = record(json!({
            "fullName": null,
            "full_name": "Jane Doe",
            "units": null,
            "propertiesManaged": "85 units"
        }));
        let lead = normalize(&raw, "linkedin").unwrap();
        assert_eq!(lead.name, "Jane Doe");
        assert_eq!(lead.properties_managed, Some(85));
        assert!(!lead.metadata.contains_key("fullName"));
    }

    #[test]
    fn test_dedup_key() {
        let mut a = Lead::new("Jane  Doe", "web");
        a.company = Some("ACME Realty".into());
        let mut b = Lead::new("jane doe", "linkedin");
        b.company = Some("acme realty ".into());
        assert_eq!(dedup_key(&a), dedup_key(&b));

        let c = Lead::new("Jane Doe", "web");
        assert_eq!(dedup_key(&c), ("jane doe".to_string(), String::new()));
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("jane@acme-realty.com"));
        assert!(!is_valid_email("1199999999333@gmail.com"));
        assert!(!is_valid_email("jane@"));
        assert!(!is_valid_email("a@b"));
    }
}
