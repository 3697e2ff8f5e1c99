//! Webhook signature verification for booking providers
//!
//! Both Cal.com and Calendly sign webhook deliveries with HMAC-SHA256:
//! - Cal.com: `X-Cal-Signature-256` = hex(HMAC(secret, raw_body))
//! - Calendly: `Calendly-Webhook-Signature: t=<unix>,v1=<hex>` where the
//!   MAC covers `"{t}.{raw_body}"`
//!
//! Comparisons go through `Mac::verify_slice`, which is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock distance accepted for Calendly signatures
pub const CALENDLY_TOLERANCE_SECS: i64 = 180;

/// Webhook signature failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,
    #[error("Malformed signature header: {0}")]
    Malformed(String),
    #[error("Signature timestamp outside tolerance ({0}s away)")]
    Stale(i64),
    #[error("Signature mismatch")]
    Mismatch,
}

/// Compute hex HMAC-SHA256 of `payload`
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_hex(secret: &str, payload: &[&[u8]], provided_hex: &str) -> Result<(), SignatureError> {
    let provided = hex::decode(provided_hex.trim())
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    for part in payload {
        mac.update(part);
    }
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Verify a Cal.com webhook delivery
pub fn verify_calcom(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    verify_hex(secret, &[body], header)
}

/// Parsed `Calendly-Webhook-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendlySignature {
    pub timestamp: i64,
    pub v1: String,
}

/// Parse `t=<unix>,v1=<hex>`; unknown keys are ignored
pub fn parse_calendly_header(header: &str) -> Result<CalendlySignature, SignatureError> {
    let mut timestamp = None;
    let mut v1 = None;

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| SignatureError::Malformed(format!("segment '{}'", part)))?;
        match key.trim() {
            "t" => {
                timestamp = Some(value.trim().parse::<i64>().map_err(|e| {
                    SignatureError::Malformed(format!("timestamp: {}", e))
                })?)
            }
            "v1" => v1 = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (timestamp, v1) {
        (Some(timestamp), Some(v1)) => Ok(CalendlySignature { timestamp, v1 }),
        _ => Err(SignatureError::Malformed(
            "expected t=<unix>,v1=<signature>".to_string(),
        )),
    }
}

/// Verify a Calendly webhook delivery against `now_unix`
pub fn verify_calendly(
    signing_key: &str,
    body: &[u8],
    header: Option<&str>,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let signature = parse_calendly_header(header.ok_or(SignatureError::Missing)?)?;

    let skew = (now_unix - signature.timestamp).abs();
    if skew > CALENDLY_TOLERANCE_SECS {
        return Err(SignatureError::Stale(skew));
    }

    let prefix = format!("{}.", signature.timestamp);
    verify_hex(signing_key, &[prefix.as_bytes(), body], &signature.v1)
}

/// Build a Calendly signature header (used by tests and local tooling)
pub fn calendly_header(signing_key: &str, body: &[u8], timestamp: i64) -> String {
    let mut payload = format!("{}.", timestamp).into_bytes();
    payload.extend_from_slice(body);
    format!("t={},v1={}", timestamp, sign_hex(signing_key, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"triggerEvent":"BOOKING_CREATED"}"#;

    #[test]
    fn test_sign_hex_known_vector() {
        // RFC 4231 test case 2
        let mac = sign_hex("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_calcom_valid_signature() {
        let header = sign_hex("whsec", BODY);
        assert_eq!(verify_calcom("whsec", BODY, Some(&header)), Ok(()));
    }

    #[test]
    fn test_calcom_rejects_tampered_body() {
        let header = sign_hex("whsec", BODY);
        let tampered = br#"{"triggerEvent":"BOOKING_CANCELLED"}"#;
        assert_eq!(
            verify_calcom("whsec", tampered, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_calcom_missing_and_malformed() {
        assert_eq!(verify_calcom("whsec", BODY, None), Err(SignatureError::Missing));
        assert!(matches!(
            verify_calcom("whsec", BODY, Some("zz-not-hex")),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn test_calendly_header_parse() {
        let parsed = parse_calendly_header("t=1700000000,v1=abcd").unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.v1, "abcd");
        assert!(parse_calendly_header("v1=abcd").is_err());
        assert!(parse_calendly_header("t=soon,v1=abcd").is_err());
    }

    #[test]
    fn test_calendly_valid_signature() {
        let header = calendly_header("key", BODY, 1_700_000_000);
        assert_eq!(
            verify_calendly("key", BODY, Some(&header), 1_700_000_060),
            Ok(())
        );
    }

    #[test]
    fn test_calendly_stale_signature() {
        let header = calendly_header("key", BODY, 1_700_000_000);
        assert_eq!(
            verify_calendly("key", BODY, Some(&header), 1_700_000_000 + 181),
            Err(SignatureError::Stale(181))
        );
    }

    #[test]
    fn test_calendly_wrong_key() {
        let header = calendly_header("key", BODY, 1_700_000_000);
        assert_eq!(
            verify_calendly("other", BODY, Some(&header), 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }
}
