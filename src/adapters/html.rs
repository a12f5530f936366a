//! Small HTML extraction helpers shared by the scraping adapters.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}").unwrap()
});

static CITY_STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z]+(?: [A-Z][a-zA-Z]+){0,2}, [A-Z]{2})\b").unwrap()
});

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapses runs of whitespace and trims.
pub fn clean_text(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

/// Text of an element with whitespace collapsed.
pub fn element_text(element: &ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first element matching `selector`, if non-empty.
pub fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|e| element_text(&e))
        .find(|t| !t.is_empty())
}

/// Attribute of the first element matching `selector`.
pub fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|e| e.value().attr(attr))
        .map(clean_text)
        .find(|v| !v.is_empty())
}

/// Visible body text of the document.
pub fn body_text(document: &Html) -> String {
    match Selector::parse("body") {
        Ok(selector) => document
            .select(&selector)
            .next()
            .map(|body| element_text(&body))
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// First email address found in `text`.
pub fn find_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

/// First phone-number-looking run found in `text`.
pub fn find_phone(text: &str) -> Option<String> {
    PHONE_RE.find(text).map(|m| m.as_str().trim().to_string())
}

/// First "City, ST" pair found in `text`.
pub fn find_city_state(text: &str) -> Option<String> {
    CITY_STATE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Contact details from `mailto:`/`tel:` links, falling back to body text.
pub fn contact_info(document: &Html) -> (Option<String>, Option<String>) {
    let text = body_text(document);

    let email = first_attr(document, "a[href^=\"mailto:\"]", "href")
        .map(|href| {
            href.trim_start_matches("mailto:")
                .split('?')
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .filter(|e| !e.is_empty())
        .or_else(|| find_email(&text));

    let phone = first_attr(document, "a[href^=\"tel:\"]", "href")
        .map(|href| href.trim_start_matches("tel:").to_string())
        .filter(|p| !p.is_empty())
        .or_else(|| find_phone(&text));

    (email, phone)
}
