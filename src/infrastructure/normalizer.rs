//! Field normalization for the loosely-typed registry payloads
//!
//! The registry mixes date formats, ships numbers as strings and sometimes
//! emits literal junk ("null", "NaN", "Invalid Date"). These helpers coerce
//! such fields into safe storable values and reject anything that looks
//! malformed instead of guessing. They never panic and never error: a bad
//! field must not abort the record it belongs to.

use chrono::NaiveDate;
use serde_json::Value;

/// Registry founding year; nothing predates it.
const MIN_YEAR: i32 = 2008;
/// Upper guard against garbage years.
const MAX_YEAR: i32 = 2100;
/// Anything longer than this is not a date the registry ever emits.
const MAX_RAW_DATE_LEN: usize = 50;

/// Validate and coerce a raw date field into a date-only value.
///
/// Accepts `DD/MM/YYYY` and ISO `YYYY-MM-DD`. Returns `None` for empty
/// input, junk literals, out-of-range components and dates that do not
/// round-trip exactly (e.g. `31/02/2024`).
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_RAW_DATE_LEN {
        return None;
    }
    if matches!(trimmed, "0" | "null" | "undefined" | "NaN") {
        return None;
    }
    if trimmed.contains("NaN") || trimmed.contains("Invalid") {
        return None;
    }

    let (day, month, year) = parse_components(trimmed)?;
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return None;
    }
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }

    // from_ymd_opt rejects day overflow (no silent roll into the next
    // month), which is the round-trip guarantee.
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_components(raw: &str) -> Option<(u32, u32, i32)> {
    if let Some((d, m, y)) = split3(raw, '/') {
        return Some((d.parse().ok()?, m.parse().ok()?, y.parse().ok()?));
    }
    if let Some((y, m, d)) = split3(raw, '-') {
        return Some((d.parse().ok()?, m.parse().ok()?, y.parse().ok()?));
    }
    None
}

fn split3(raw: &str, sep: char) -> Option<(&str, &str, &str)> {
    let mut parts = raw.split(sep);
    let a = parts.next()?;
    let b = parts.next()?;
    let c = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((a, b, c))
}

/// Sum the `importe` amounts of a financing breakdown.
///
/// Returns `None` when the input is absent, not an array or empty (the
/// registry sent no breakdown), and `Some(total)` otherwise. Entries whose
/// amount is missing or fails numeric coercion contribute 0, so the result
/// is never NaN.
pub fn sum_financing(entries: Option<&Value>) -> Option<f64> {
    let list = match entries {
        Some(Value::Array(list)) if !list.is_empty() => list,
        _ => return None,
    };

    let total = list
        .iter()
        .map(|entry| entry.get("importe").map_or(0.0, coerce_amount))
        .sum();
    Some(total)
}

/// Numeric coercion for an amount field: numbers pass through, numeric
/// strings are parsed, everything else (including locale-formatted strings
/// like "1000,50") counts as 0.
fn coerce_amount(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("15/06/2023", Some((2023, 6, 15)))]
    #[case("2023-06-15", Some((2023, 6, 15)))]
    #[case("01/01/2008", Some((2008, 1, 1)))]
    #[case("31/12/2100", Some((2100, 12, 31)))]
    #[case("31/02/2024", None)] // February has no day 31
    #[case("29/02/2023", None)] // not a leap year
    #[case("29/02/2024", Some((2024, 2, 29)))]
    #[case("0000-00-00", None)]
    #[case("", None)]
    #[case("   ", None)]
    #[case("0", None)]
    #[case("null", None)]
    #[case("undefined", None)]
    #[case("NaN", None)]
    #[case("NaN/NaN/NaN", None)]
    #[case("Invalid Date", None)]
    #[case("15/06/2007", None)] // before the registry existed
    #[case("15/06/2101", None)]
    #[case("32/01/2024", None)]
    #[case("15/13/2024", None)]
    #[case("15-06-2023", None)] // dashes are ISO order only
    #[case("2023/06/15", None)] // slashes are DD/MM/YYYY order only
    #[case("15/06/2023/1", None)]
    #[case("garbage", None)]
    fn normalize_date_cases(#[case] raw: &str, #[case] expected: Option<(i32, u32, u32)>) {
        let expected = expected.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap());
        assert_eq!(normalize_date(raw), expected);
    }

    #[test]
    fn normalize_date_rejects_overlong_input() {
        let raw = "1".repeat(51);
        assert_eq!(normalize_date(&raw), None);
    }

    #[test]
    fn normalize_date_output_is_iso() {
        let date = normalize_date("05/01/2024").unwrap();
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-01-05");
    }

    #[test]
    fn sum_financing_mixes_numbers_and_strings() {
        let entries = json!([
            {"importe": 1000.5},
            {"importe": "2500"},
            {"fuente": "FEDER"}
        ]);
        assert_eq!(sum_financing(Some(&entries)), Some(3500.5));
    }

    #[test]
    fn sum_financing_malformed_amounts_count_as_zero() {
        let entries = json!([
            {"importe": "1000,50"},
            {"importe": "abc"},
            {"importe": null},
            {"importe": 250.0}
        ]);
        let total = sum_financing(Some(&entries)).unwrap();
        assert!(total.is_finite());
        assert_eq!(total, 250.0);
    }

    #[test]
    fn sum_financing_absent_or_empty_is_none() {
        assert_eq!(sum_financing(None), None);
        assert_eq!(sum_financing(Some(&json!([]))), None);
        assert_eq!(sum_financing(Some(&json!("not an array"))), None);
        assert_eq!(sum_financing(Some(&json!(null))), None);
    }

    #[test]
    fn sum_financing_present_but_zero_is_some_zero() {
        let entries = json!([{"importe": 0}]);
        assert_eq!(sum_financing(Some(&entries)), Some(0.0));
    }
}
