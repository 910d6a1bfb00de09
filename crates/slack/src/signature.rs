//! Slack request signing, version `v0`.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

const VERSION_PREFIX: &str = "v0=";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),
    #[error("request timestamp `{0}` is not a unix timestamp")]
    InvalidTimestamp(String),
    #[error("request timestamp is {skew_secs}s away from now")]
    Stale { skew_secs: i64 },
    #[error("signature is not a v0 hex digest")]
    Malformed,
    #[error("signature does not match request body")]
    Mismatch,
    #[error("signing secret is unusable")]
    InvalidSecret,
}

pub struct SignatureVerifier {
    signing_secret: SecretString,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(signing_secret: SecretString, tolerance_secs: u64) -> Self {
        Self { signing_secret, tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX) }
    }

    /// `v0=` + hex HMAC-SHA256 of `v0:{timestamp}:{body}`.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let mac = self.mac(timestamp, body)?;
        Ok(format!("{VERSION_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_secs: i64,
    ) -> Result<(), SignatureError> {
        let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
        let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

        let sent_at = timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_owned()))?;
        let skew_secs = now_secs.saturating_sub(sent_at).saturating_abs();
        if skew_secs > self.tolerance_secs {
            return Err(SignatureError::Stale { skew_secs });
        }

        let digest = signature
            .strip_prefix(VERSION_PREFIX)
            .ok_or(SignatureError::Malformed)
            .and_then(|digest| hex::decode(digest).map_err(|_| SignatureError::Malformed))?;

        self.mac(timestamp, body)?.verify_slice(&digest).map_err(|_| SignatureError::Mismatch)
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(b"v0:");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}
