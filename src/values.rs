//! Parsing helpers shared by extraction, schema inference and querying.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y:%m:%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y, %H:%M",
    "%m/%d/%Y, %I:%M %p",
    "%m/%d/%y, %I:%M %p",
    "%m/%d/%y, %H:%M",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parse the date and date-time notations seen in business documents.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.len() < 6 || !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    None
}

/// A numeric literal, keeping integers exact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Integer(i) => *i as f64,
            Number::Real(r) => *r,
        }
    }
}

/// Parse `42`, `-3.5`, `$1,234.50`, `€ 99`. Thousands separators are only
/// accepted in groups of three.
pub fn parse_number(raw: &str) -> Option<Number> {
    let mut s = raw.trim();
    let negative = s.starts_with('-');
    if negative {
        s = s[1..].trim_start();
    }
    s = s
        .trim_start_matches(['$', '€', '£', '¥'])
        .trim_start();
    if s.is_empty() {
        return None;
    }

    let cleaned = if s.contains(',') {
        let int_part = s.split('.').next().unwrap_or(s);
        let groups: Vec<&str> = int_part.split(',').collect();
        let well_formed = !groups[0].is_empty()
            && groups[0].len() <= 3
            && groups[1..].iter().all(|g| g.len() == 3);
        if !well_formed {
            return None;
        }
        s.replace(',', "")
    } else {
        s.to_string()
    };

    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.')
        || cleaned.starts_with('.')
        || cleaned.ends_with('.')
    {
        return None;
    }

    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Number::Integer(if negative { -i } else { i }));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|r| r.is_finite())
        .map(|r| Number::Real(if negative { -r } else { r }))
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

/// `"Invoice Number"` → `invoice_number`. Returns `None` when nothing
/// alphanumeric remains.
pub fn normalize_field_name(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        return None;
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "f_");
    }
    Some(out)
}

/// Naive English singular used for record-type words (`invoices` → `invoice`).
pub fn singularize(word: &str) -> String {
    let w = word.to_lowercase();
    if w.len() > 3 && w.ends_with("ies") {
        return format!("{}y", &w[..w.len() - 3]);
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if w.len() > suffix.len() + 1 && w.ends_with(suffix) {
            return w[..w.len() - 2].to_string();
        }
    }
    if w.len() > 2 && w.ends_with('s') && !w.ends_with("ss") {
        return w[..w.len() - 1].to_string();
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn timestamps_in_common_notations() {
        let cases = [
            "2023-03-14",
            "2023-03-14T09:30:00Z",
            "2023-03-14 09:30",
            "03/14/2023",
            "14.03.2023",
            "March 14, 2023",
            "2023:03:14 09:30:00",
        ];
        for case in cases {
            let ts = parse_timestamp(case).unwrap_or_else(|| panic!("failed on {}", case));
            assert_eq!((ts.year(), ts.month(), ts.day()), (2023, 3, 14), "{}", case);
        }
    }

    #[test]
    fn non_dates_are_rejected() {
        assert!(parse_timestamp("INV-2023").is_none());
        assert!(parse_timestamp("12345").is_none());
        assert!(parse_timestamp("hello world").is_none());
    }

    #[test]
    fn numbers_with_currency_and_separators() {
        assert_eq!(parse_number("42"), Some(Number::Integer(42)));
        assert_eq!(parse_number("-7"), Some(Number::Integer(-7)));
        assert_eq!(parse_number("$1,234.50"), Some(Number::Real(1234.5)));
        assert_eq!(parse_number("€ 99"), Some(Number::Integer(99)));
        assert_eq!(parse_number("1,23"), None);
        assert_eq!(parse_number("INV-001"), None);
        assert_eq!(parse_number("1.2.3"), None);
    }

    #[test]
    fn field_names_become_snake_case() {
        assert_eq!(
            normalize_field_name("Invoice Number").as_deref(),
            Some("invoice_number")
        );
        assert_eq!(normalize_field_name("  PO #  ").as_deref(), Some("po"));
        assert_eq!(normalize_field_name("2nd line").as_deref(), Some("f_2nd_line"));
        assert_eq!(normalize_field_name("--"), None);
    }

    #[test]
    fn singular_forms() {
        assert_eq!(singularize("invoices"), "invoice");
        assert_eq!(singularize("companies"), "company");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("receipt"), "receipt");
        assert_eq!(singularize("expenses"), "expense");
        assert_eq!(singularize("addresses"), "address");
    }
}
