//! Trade record types
//!
//! `RawTradeRow` mirrors one line of a source file (CITES trade database
//! export column headers). `TradeRecord` is the extracted form: the same
//! fields plus provenance and a parsed quantity, and it is what every later
//! stage consumes. Fields that are frequently absent stay `String` with ""
//! meaning "not reported" — that is what the source emits, and preserving it
//! verbatim is what makes the normalization round-trip exact.

use serde::{Deserialize, Serialize};

/// One row as it appears in a source trade file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTradeRow {
    #[serde(rename = "Id", default)]
    pub id: String,

    #[serde(rename = "Year", default)]
    pub year: String,

    #[serde(rename = "Appendix", default)]
    pub appendix: String,

    #[serde(rename = "Taxon", default)]
    pub taxon: String,

    #[serde(rename = "Class", default)]
    pub class: String,

    #[serde(rename = "Order", default)]
    pub order: String,

    #[serde(rename = "Family", default)]
    pub family: String,

    #[serde(rename = "Genus", default)]
    pub genus: String,

    #[serde(rename = "Term", default)]
    pub term: String,

    #[serde(rename = "Quantity", default)]
    pub quantity: String,

    #[serde(rename = "Unit", default)]
    pub unit: String,

    #[serde(rename = "Importer", default)]
    pub importer: String,

    #[serde(rename = "Exporter", default)]
    pub exporter: String,

    #[serde(rename = "Origin", default)]
    pub origin: String,

    #[serde(rename = "Purpose", default)]
    pub purpose: String,

    #[serde(rename = "Source", default)]
    pub source: String,

    #[serde(rename = "Reporter.type", default)]
    pub reporter_type: String,
}

/// An extracted trade record with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub year: Option<i32>,
    pub appendix: String,
    pub taxon: String,
    pub class: String,
    pub order: String,
    pub family: String,
    pub genus: String,
    pub term: String,
    pub quantity_raw: String,
    pub quantity_normalized: Option<f64>,
    pub unit: String,
    pub importer: String,
    pub exporter: String,
    pub origin: String,
    pub purpose: String,
    pub source: String,
    pub reporter_type: String,
    pub source_file: String,
    pub row_number: u64,
}

impl TradeRecord {
    /// Build from a raw row plus provenance. Quantity parsing happens here;
    /// an unparseable quantity yields `None`, never an error.
    pub fn from_raw(
        raw: RawTradeRow,
        quantity_normalized: Option<f64>,
        source_file: &str,
        row_number: u64,
    ) -> Self {
        Self {
            id: raw.id,
            year: parse_year(&raw.year),
            appendix: raw.appendix,
            taxon: raw.taxon,
            class: raw.class,
            order: raw.order,
            family: raw.family,
            genus: raw.genus,
            term: raw.term,
            quantity_raw: raw.quantity,
            quantity_normalized,
            unit: raw.unit,
            importer: raw.importer,
            exporter: raw.exporter,
            origin: raw.origin,
            purpose: raw.purpose,
            source: raw.source,
            reporter_type: raw.reporter_type,
            source_file: source_file.to_string(),
            row_number,
        }
    }
}

fn parse_year(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Quantity issue recorded during extraction, sampled into the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantityIssue {
    pub taxon: String,
    pub file: String,
    pub original_quantity: String,
    pub unit: String,
    pub issue: String,
}

/// Result of normalizing a raw quantity string.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuantity {
    pub value: Option<f64>,
    pub issue: Option<String>,
}

/// Threshold above which a quantity is considered implausible and flagged.
const SUSPICIOUS_QUANTITY: f64 = 1_000_000_000.0;

/// Parse and sanity-check a quantity string.
///
/// Thousands separators are stripped. Values above one billion are flagged;
/// microgram quantities over the threshold are converted to grams (a known
/// data-entry artifact in the source). Unparseable values come back as
/// `None` with a conversion issue.
pub fn normalize_quantity(quantity_str: &str, unit: &str) -> NormalizedQuantity {
    let clean = quantity_str.replace(',', "");
    let clean = clean.trim();
    if clean.is_empty() {
        return NormalizedQuantity {
            value: None,
            issue: None,
        };
    }

    match clean.parse::<f64>() {
        Ok(value) if value.is_finite() => {
            if value > SUSPICIOUS_QUANTITY {
                let lower = unit.to_lowercase();
                if lower == "microgrammes" || lower == "microgram" || lower == "\u{3bc}g" {
                    return NormalizedQuantity {
                        value: Some(value / 1_000_000.0),
                        issue: Some("extremely_large_value_converted_to_g".to_string()),
                    };
                }
                return NormalizedQuantity {
                    value: Some(value),
                    issue: Some("extremely_large_value".to_string()),
                };
            }
            NormalizedQuantity {
                value: Some(value),
                issue: None,
            }
        },
        _ => NormalizedQuantity {
            value: None,
            issue: Some("conversion_error".to_string()),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1998"), Some(1998));
        assert_eq!(parse_year(" 2024 "), Some(2024));
        assert_eq!(parse_year(""), None);
        assert_eq!(parse_year("n/a"), None);
    }

    #[test]
    fn test_normalize_quantity_plain() {
        let q = normalize_quantity("12.5", "kg");
        assert_eq!(q.value, Some(12.5));
        assert!(q.issue.is_none());
    }

    #[test]
    fn test_normalize_quantity_thousands_separator() {
        let q = normalize_quantity("1,234,567", "");
        assert_eq!(q.value, Some(1_234_567.0));
        assert!(q.issue.is_none());
    }

    #[test]
    fn test_normalize_quantity_empty() {
        let q = normalize_quantity("   ", "kg");
        assert_eq!(q.value, None);
        assert!(q.issue.is_none());
    }

    #[test]
    fn test_normalize_quantity_unparseable() {
        let q = normalize_quantity("a lot", "kg");
        assert_eq!(q.value, None);
        assert_eq!(q.issue.as_deref(), Some("conversion_error"));
    }

    #[test]
    fn test_normalize_quantity_suspiciously_large() {
        let q = normalize_quantity("2000000000", "kg");
        assert_eq!(q.value, Some(2_000_000_000.0));
        assert_eq!(q.issue.as_deref(), Some("extremely_large_value"));
    }

    #[test]
    fn test_normalize_quantity_microgram_conversion() {
        let q = normalize_quantity("5000000000", "Microgrammes");
        assert_eq!(q.value, Some(5000.0));
        assert_eq!(
            q.issue.as_deref(),
            Some("extremely_large_value_converted_to_g")
        );
    }
}
