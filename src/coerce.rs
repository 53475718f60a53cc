//! Value coercion helpers shared by actions, feedbacks and change handling
//!
//! Everything in here is pure: no cache access, no I/O. Callers supply the
//! bounds they want applied (see [`INT_LIMIT`] for the unbounded defaults).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Largest magnitude accepted for Integer / Enum writes
pub const INT_LIMIT: f64 = 4_294_967_295.0;

/// Clamp `value` into `[min, max]`
///
/// Both bounds are expected to be finite; defaults are the caller's business.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Apply a relative step to the previous value, bounded to `[min, max]`
///
/// A missing previous value counts as 0. Integer-like parameters (Integer,
/// Enum) are rounded to the nearest whole number.
pub fn relative_delta(
    delta: f64,
    previous: Option<f64>,
    min: f64,
    max: f64,
    integer_like: bool,
) -> f64 {
    let next = clamp(previous.unwrap_or(0.0) + delta, min, max);
    if integer_like {
        next.round()
    } else {
        next
    }
}

/// Numeric comparison used by parameter feedbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum Comparator {
    #[default]
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl Comparator {
    pub fn all() -> &'static [Comparator] {
        &[
            Comparator::Equal,
            Comparator::NotEqual,
            Comparator::LessThan,
            Comparator::LessThanEqual,
            Comparator::GreaterThan,
            Comparator::GreaterThanEqual,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
            Comparator::LessThan => "<",
            Comparator::LessThanEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterThanEqual => ">=",
        }
    }
}

/// Evaluate `current <comparator> target`
///
/// Never fails: a non-finite target yields `false` for every comparator.
pub fn compare(target: f64, comparator: Comparator, current: f64) -> bool {
    if !target.is_finite() {
        return false;
    }
    match comparator {
        Comparator::Equal => current == target,
        Comparator::NotEqual => current != target,
        Comparator::LessThan => current < target,
        Comparator::LessThanEqual => current <= target,
        Comparator::GreaterThan => current > target,
        Comparator::GreaterThanEqual => current >= target,
    }
}

/// Parse user text as a number, `NaN` when it isn't one
pub fn parse_number(text: &str) -> f64 {
    text.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Control characters and their two-character (or `\xNN`) spellings
const ESCAPES: &[(char, &str)] = &[
    ('\n', "\\n"),
    ('\r', "\\r"),
    ('\t', "\\t"),
    ('\u{0C}', "\\f"),
    ('\u{0B}', "\\v"),
    ('\u{08}', "\\b"),
    ('\u{00}', "\\x00"),
    ('\u{01}', "\\x01"),
    ('\u{02}', "\\x02"),
    ('\u{03}', "\\x03"),
];

/// Replace supported control characters with their escape spellings
pub fn encode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match ESCAPES.iter().find(|(ch, _)| *ch == c) {
            Some((_, spelled)) => out.push_str(spelled),
            None => out.push(c),
        }
    }
    out
}

/// Inverse of [`encode_escapes`]; unknown sequences are left untouched
pub fn decode_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match ESCAPES.iter().find(|(_, spelled)| tail.starts_with(spelled)) {
            Some((ch, spelled)) => {
                out.push(*ch);
                rest = &tail[spelled.len()..];
            },
            None => {
                out.push('\\');
                rest = &tail[1..];
            },
        }
    }
    out.push_str(rest);
    out
}

/// Index of `label` in a newline-delimited enumeration
pub fn enum_index_of(enumeration: &str, label: &str) -> Option<usize> {
    enumeration.split('\n').position(|entry| entry == label)
}

/// Label at `index` in a newline-delimited enumeration, `""` when out of range
pub fn enum_label_of(enumeration: &str, index: i64) -> String {
    usize::try_from(index)
        .ok()
        .and_then(|i| enumeration.split('\n').nth(i))
        .unwrap_or_default()
        .to_string()
}

/// Canonical dotted form of a user supplied tree path
///
/// `"0/1/2"` → `"0.1.2"`, `"node[0.1.2]"` → `"0.1.2"`. When several bracket
/// pairs are present the last one wins; a `]` before the last `[` is not a
/// pair and the whole text goes through slash/dot normalisation instead.
pub fn normalize_path(text: &str) -> String {
    if let (Some(open), Some(close)) = (text.rfind('['), text.rfind(']')) {
        if close > open {
            return text[open + 1..close].to_string();
        }
    }
    text.replace('/', ".").trim().to_string()
}

/// Split a comma-separated list of paths, dropping blanks
pub fn split_path_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(normalize_path)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Parse a comma-separated list of integer indices, discarding empty tokens
pub fn parse_index_list(text: &str) -> Vec<u32> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse::<u32>().ok())
        .collect()
}

/// Free-text boolean: `true/on/1` and `false/off/0`, otherwise truthiness
pub fn parse_bool_token(text: &str) -> bool {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => true,
        "false" | "off" | "0" => false,
        other => !other.is_empty(),
    }
}

/// Host variable ids only allow `[A-Za-z0-9_-]`
pub fn sanitize_variable_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clamp_boundaries() {
        assert_eq!(clamp(-5.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp(15.0, 0.0, 10.0), 10.0);
        assert_eq!(clamp(0.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp(10.0, 0.0, 10.0), 10.0);
        assert_eq!(clamp(4.5, 0.0, 10.0), 4.5);
    }

    #[test]
    fn test_relative_delta() {
        assert_eq!(relative_delta(3.0, Some(5.0), -INT_LIMIT, INT_LIMIT, false), 8.0);
        assert_eq!(relative_delta(1.3, Some(5.4), -INT_LIMIT, INT_LIMIT, true), 7.0);
        assert_eq!(relative_delta(5.0, Some(8.0), 0.0, 10.0, true), 10.0);
        assert_eq!(relative_delta(3.0, None, -INT_LIMIT, INT_LIMIT, true), 3.0);
    }

    #[test]
    fn test_compare() {
        assert!(compare(5.0, Comparator::Equal, 5.0));
        assert!(compare(5.0, Comparator::LessThan, 4.0));
        assert!(compare(5.0, Comparator::GreaterThanEqual, 5.0));
        assert!(!compare(5.0, Comparator::NotEqual, 5.0));
        for comparator in Comparator::all() {
            assert!(!compare(parse_number("abc"), *comparator, 5.0));
            assert!(!compare(f64::INFINITY, *comparator, 5.0));
        }
    }

    #[test]
    fn test_enum_lookup() {
        let enumeration = "Off\nOn\nStandby";
        assert_eq!(enum_index_of(enumeration, "On"), Some(1));
        assert_eq!(enum_index_of(enumeration, "Missing"), None);
        assert_eq!(enum_label_of(enumeration, 1), "On");
        assert_eq!(enum_label_of(enumeration, 3), "");
        assert_eq!(enum_label_of(enumeration, -1), "");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("0/1/2"), "0.1.2");
        assert_eq!(normalize_path(" 0.1.2 "), "0.1.2");
        assert_eq!(normalize_path("node[0.1.2]"), "0.1.2");
        assert_eq!(normalize_path("[0.1][0.2.3]"), "0.2.3");
        assert_eq!(normalize_path("]0.1["), "]0.1[");
    }

    #[test]
    fn test_escape_sequences() {
        assert_eq!(encode_escapes("a\nb\tc"), "a\\nb\\tc");
        assert_eq!(decode_escapes("a\\nb\\x02"), "a\nb\u{02}");
        // Unknown escapes pass through
        assert_eq!(decode_escapes("C:\\path\\q"), "C:\\path\\q");
    }

    #[test]
    fn test_lists_and_tokens() {
        assert_eq!(parse_index_list("1, 2,,3 ,"), vec![1, 2, 3]);
        assert_eq!(split_path_list("0/1, ,2.3"), vec!["0.1", "2.3"]);
        assert!(parse_bool_token("On"));
        assert!(!parse_bool_token("0"));
        assert!(parse_bool_token("yes"));
        assert!(!parse_bool_token(""));
        assert_eq!(sanitize_variable_id("0.1.2"), "0_1_2");
    }

    fn supported_text() -> impl Strategy<Value = String> {
        let chars: Vec<char> = "ab Z9\n\r\t\u{0C}\u{0B}\u{08}\u{00}\u{01}\u{02}\u{03}"
            .chars()
            .collect();
        proptest::collection::vec(proptest::sample::select(chars), 0..32)
            .prop_map(|v| v.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_escape_round_trip(s in supported_text()) {
            prop_assert_eq!(decode_escapes(&encode_escapes(&s)), s);
        }

        #[test]
        fn prop_clamp_in_range(v in -1e12f64..1e12, lo in -1e6f64..0.0, hi in 0.0f64..1e6) {
            let c = clamp(v, lo, hi);
            prop_assert!(c >= lo && c <= hi);
            if v >= lo && v <= hi {
                prop_assert_eq!(c, v);
            }
        }
    }
}
