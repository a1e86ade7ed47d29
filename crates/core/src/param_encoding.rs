//! Decoder for compact parameter-encoding strings.
//!
//! WDL-style introspection tools describe each parameter as a single
//! compact string of the general shape:
//!
//! ```text
//! TYPE
//! TYPE (optional)
//! TYPE (default = VALUE)
//! TYPE (optional, default = VALUE)
//! ```
//!
//! [`decode`] recovers the structured fields. Malformed input degrades to
//! the best partial result already obtained; decoding never fails, so a
//! surprising tool output cannot abort an ingestion run.

/// Structured form of one compact parameter encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEncoding {
    /// Declared type text, e.g. `String`, `Array[File]`.
    pub param_type: String,
    pub optional: bool,
    /// `None` when no default clause is present.
    pub default: Option<String>,
}

/// Decode a compact `TYPE (optional, default = VALUE)` encoding.
pub fn decode(raw: &str) -> ParamEncoding {
    let (type_part, rest) = match raw.split_once('(') {
        Some((ty, rest)) => (ty, Some(rest)),
        None => (raw, None),
    };

    let mut encoding = ParamEncoding {
        param_type: type_part.trim().to_string(),
        optional: false,
        default: None,
    };

    let Some(rest) = rest else {
        return encoding;
    };

    let rest = rest.trim_end().trim_end_matches(')');
    let (first, second) = match rest.split_once(',') {
        Some((first, second)) => (first, Some(second)),
        None => (rest, None),
    };

    if first.trim() == "optional" {
        encoding.optional = true;
    } else if let Some(default) = parse_default_clause(first) {
        encoding.default = Some(default);
    }

    if let Some(second) = second {
        if let Some(default) = parse_default_clause(second) {
            encoding.default = Some(default);
        }
    }

    encoding
}

/// Parse a `default = VALUE` clause, returning the decoded value.
///
/// Double-quoted values are unescaped as JSON string literals, which
/// recovers embedded escape sequences; anything else is taken verbatim.
fn parse_default_clause(clause: &str) -> Option<String> {
    let (key, value) = clause.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("default") {
        return None;
    }

    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        // JSON unescape; fall back to the raw text if the literal is not
        // actually valid JSON.
        return Some(serde_json::from_str::<String>(value).unwrap_or_else(|_| value.to_string()));
    }
    Some(value.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
