//! Typed argument values and locale-invariant parsing.
//!
//! Numbers use a `.` decimal point and no thousands separators, regardless of
//! the host locale. Array fields are split on `;` or `|`; empty elements are
//! dropped and each element is trimmed.

use crate::{ArgKind, DispatchError};

/// A converted positional argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i32),
    Float(f32),
    Bool(bool),
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
}

impl ArgValue {
    /// Converts `token` to the declared argument type.
    pub fn parse(kind: ArgKind, token: &str) -> Result<Self, DispatchError> {
        Ok(match kind {
            ArgKind::Str => ArgValue::Str(token.to_string()),
            ArgKind::Int => ArgValue::Int(parse_int(token)?),
            ArgKind::Float => ArgValue::Float(parse_float(token)?),
            ArgKind::Bool => ArgValue::Bool(parse_bool(token)?),
            ArgKind::IntArray => ArgValue::IntArray(parse_int_array(token)?),
            ArgKind::FloatArray => ArgValue::FloatArray(parse_float_array(token)?),
        })
    }
}

/// Parses a signed 32-bit integer.
pub fn parse_int(token: &str) -> Result<i32, DispatchError> {
    token
        .trim()
        .parse::<i32>()
        .map_err(|_| DispatchError::BadNumber)
}

/// Parses a finite 32-bit float.
pub fn parse_float(token: &str) -> Result<f32, DispatchError> {
    let trimmed = token.trim();
    // `f32::from_str` also accepts "inf" and "NaN"; only plain decimals are valid here.
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return Err(DispatchError::BadNumber);
    }
    match trimmed.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DispatchError::BadNumber),
    }
}

/// Parses a boolean flag: `true`/`false` in any case, or an integer where
/// non-zero means true.
pub fn parse_bool(token: &str) -> Result<bool, DispatchError> {
    let trimmed = token.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    parse_int(trimmed)
        .map(|value| value != 0)
        .map_err(|_| DispatchError::BadBool)
}

/// Parses a `;`/`|` delimited integer array. Any bad element fails the whole array.
pub fn parse_int_array(token: &str) -> Result<Vec<i32>, DispatchError> {
    split_elements(token).map(parse_int).collect()
}

/// Parses a `;`/`|` delimited float array. Any bad element fails the whole array.
pub fn parse_float_array(token: &str) -> Result<Vec<f32>, DispatchError> {
    split_elements(token).map(parse_float).collect()
}

fn split_elements(token: &str) -> impl Iterator<Item = &str> {
    token
        .split([';', '|'])
        .map(str::trim)
        .filter(|element| !element.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_parsing() {
        assert_eq!(parse_int("42"), Ok(42));
        assert_eq!(parse_int(" -7 "), Ok(-7));
        assert_eq!(parse_int("+3"), Ok(3));
        assert_eq!(parse_int("1,000"), Err(DispatchError::BadNumber));
        assert_eq!(parse_int("x"), Err(DispatchError::BadNumber));
        assert_eq!(parse_int(""), Err(DispatchError::BadNumber));
    }

    #[test]
    fn test_float_parsing_is_locale_invariant() {
        assert_eq!(parse_float("0.8"), Ok(0.8));
        assert_eq!(parse_float("45"), Ok(45.0));
        assert_eq!(parse_float("0,8"), Err(DispatchError::BadNumber));
        assert_eq!(parse_float("NaN"), Err(DispatchError::BadNumber));
        assert_eq!(parse_float("inf"), Err(DispatchError::BadNumber));
    }

    #[test]
    fn test_bool_parsing() {
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool("False"), Ok(false));
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert_eq!(parse_bool("yes"), Err(DispatchError::BadBool));
    }

    #[test]
    fn test_int_array_with_both_delimiters() {
        assert_eq!(parse_int_array("0;1;5;7"), Ok(vec![0, 1, 5, 7]));
        assert_eq!(parse_int_array("0|1|5"), Ok(vec![0, 1, 5]));
        assert_eq!(parse_int_array("0;;1; 2 "), Ok(vec![0, 1, 2]));
    }

    #[test]
    fn test_bad_element_fails_whole_array() {
        assert_eq!(parse_int_array("0;x;5"), Err(DispatchError::BadNumber));
        assert_eq!(parse_float_array("0.1;oops"), Err(DispatchError::BadNumber));
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert_eq!(parse_int_array(""), Ok(Vec::new()));
    }

    #[test]
    fn test_parse_by_declared_kind() {
        assert_eq!(
            ArgValue::parse(ArgKind::Str, "HeartBeat"),
            Ok(ArgValue::Str("HeartBeat".into()))
        );
        assert_eq!(
            ArgValue::parse(ArgKind::IntArray, "1|2"),
            Ok(ArgValue::IntArray(vec![1, 2]))
        );
        assert_eq!(ArgValue::parse(ArgKind::Bool, "maybe"), Err(DispatchError::BadBool));
    }
}
