use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing x-signature header")]
    Missing,
    #[error("Malformed x-signature header")]
    Malformed,
    #[error("Invalid webhook signature")]
    Mismatch,
}

/// `ts` and `v1` parts of an `x-signature: ts=...,v1=...` header.
fn parse_header(header: &str) -> Option<(&str, &str)> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.trim()),
            Some(("v1", value)) => v1 = Some(value.trim()),
            _ => {}
        }
    }
    Some((ts.filter(|t| !t.is_empty())?, v1.filter(|v| !v.is_empty())?))
}

fn manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{};request-id:{};ts:{};", data_id.to_lowercase(), request_id, ts)
}

pub fn sign(secret: &str, data_id: &str, request_id: &str, ts: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(manifest(data_id, request_id, ts).as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check a notification's `x-signature` against the shared webhook secret.
pub fn verify(
    secret: &str,
    header: Option<&str>,
    request_id: &str,
    data_id: &str,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let (ts, v1) = parse_header(header).ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(v1).map_err(|_| SignatureError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(manifest(data_id, request_id, ts).as_bytes());
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}
