use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

use crate::Behavior;

/// One household's position for the turn, as carried on the settlement channel.
///
/// `net_load` is consumption minus production: positive means the household
/// needs energy, negative means it has surplus to hand over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementRequest {
    pub behavior: Behavior,
    pub net_load: f64,
}

#[derive(Debug, Error)]
pub enum SettlementDecodeError {
    #[error("empty settlement payload")]
    Empty,
    #[error("settlement payload '{0}' is missing the ';' separator")]
    MissingSeparator(String),
    #[error("invalid behavior code '{value}': {source}")]
    InvalidBehaviorCode {
        value: String,
        source: ParseIntError,
    },
    #[error("unknown behavior code {0}")]
    UnknownBehavior(u8),
    #[error("invalid {context} '{value}': {source}")]
    InvalidNumber {
        value: String,
        context: &'static str,
        source: ParseFloatError,
    },
    #[error("non-finite {context} '{value}'")]
    NonFinite {
        value: String,
        context: &'static str,
    },
}

/// Encodes a request as `"<behaviorCode>;<netLoad>"`.
pub fn encode_request(request: &SettlementRequest) -> String {
    format!("{};{}", request.behavior.code(), request.net_load)
}

pub fn decode_request(payload: &str) -> Result<SettlementRequest, SettlementDecodeError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(SettlementDecodeError::Empty);
    }
    let (code_str, load_str) = trimmed
        .split_once(';')
        .ok_or_else(|| SettlementDecodeError::MissingSeparator(trimmed.to_string()))?;

    let code_str = code_str.trim();
    let code = code_str
        .parse::<u8>()
        .map_err(|source| SettlementDecodeError::InvalidBehaviorCode {
            value: code_str.to_string(),
            source,
        })?;
    let behavior = Behavior::from_code(code).ok_or(SettlementDecodeError::UnknownBehavior(code))?;
    let net_load = parse_finite(load_str.trim(), "net load")?;

    Ok(SettlementRequest { behavior, net_load })
}

/// Encodes a bill as a plain decimal string.
pub fn encode_bill(bill: f64) -> String {
    bill.to_string()
}

pub fn decode_bill(payload: &str) -> Result<f64, SettlementDecodeError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(SettlementDecodeError::Empty);
    }
    parse_finite(trimmed, "bill")
}

fn parse_finite(value: &str, context: &'static str) -> Result<f64, SettlementDecodeError> {
    let parsed = value
        .parse::<f64>()
        .map_err(|source| SettlementDecodeError::InvalidNumber {
            value: value.to_string(),
            context,
            source,
        })?;
    if !parsed.is_finite() {
        return Err(SettlementDecodeError::NonFinite {
            value: value.to_string(),
            context,
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_text_matches_wire_format() {
        let request = SettlementRequest {
            behavior: Behavior::GiveThenSell,
            net_load: -12.5,
        };
        insta::assert_snapshot!(encode_request(&request), @"3;-12.5");
    }

    #[test]
    fn decodes_request_with_whitespace() {
        let request = decode_request(" 2; 7.25 ").expect("request decodes");
        assert_eq!(request.behavior, Behavior::Sell);
        assert_eq!(request.net_load, 7.25);
    }

    #[test]
    fn rejects_unknown_behavior() {
        let err = decode_request("4;1.0").expect_err("code 4 is not a behavior");
        assert!(matches!(err, SettlementDecodeError::UnknownBehavior(4)));
    }

    #[test]
    fn rejects_missing_separator_and_bad_numbers() {
        assert!(matches!(
            decode_request("1 3.0"),
            Err(SettlementDecodeError::MissingSeparator(_))
        ));
        assert!(matches!(
            decode_request("1;abc"),
            Err(SettlementDecodeError::InvalidNumber { .. })
        ));
        assert!(matches!(
            decode_request("1;NaN"),
            Err(SettlementDecodeError::NonFinite { .. })
        ));
        assert!(matches!(decode_request("   "), Err(SettlementDecodeError::Empty)));
    }

    #[test]
    fn bill_text_is_plain_decimal() {
        assert_eq!(encode_bill(-5.0), "-5");
        assert_eq!(decode_bill("-5").expect("bill decodes"), -5.0);
        assert_eq!(decode_bill("0.125").expect("bill decodes"), 0.125);
        assert!(decode_bill("inf").is_err());
    }
}
