//! Signed QR check-in payloads.
//!
//! A payload is the JSON a class QR code encodes: class, instructor, session
//! id, and an expiry window. Payloads are signed with HMAC-SHA256 under a
//! server-side secret, so a screenshotted or replayed code cannot be forged
//! or altered; verification checks the signature before anything else, then
//! the payload type, then expiry.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only payload type a check-in endpoint accepts.
pub const PAYLOAD_TYPE: &str = "attendance";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("payload is not valid JSON")]
    Malformed,
    #[error("payload signature is invalid")]
    BadSignature,
    #[error("payload is not an attendance code")]
    WrongType,
    #[error("payload has expired")]
    Expired,
}

/// The JSON blob a class QR code carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub class_code: String,
    pub instructor: String,
    pub session_id: String,
    pub issued_at: String,
    pub expiry: String,
    pub valid_minutes: i64,
    pub sig: String,
}

impl QrPayload {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("payload serialization cannot fail")
    }
}

/// Issues and verifies signed payloads.
pub struct QrSigner {
    key: Vec<u8>,
}

impl QrSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Issue a payload valid for `valid_minutes` from `now`.
    pub fn issue(
        &self,
        class_code: &str,
        instructor: &str,
        valid_minutes: i64,
        now: DateTime<Utc>,
    ) -> QrPayload {
        let session_id = uuid::Uuid::new_v4().to_string();
        let expiry = now + Duration::minutes(valid_minutes);

        let mut payload = QrPayload {
            kind: PAYLOAD_TYPE.to_string(),
            class_code: class_code.to_string(),
            instructor: instructor.to_string(),
            session_id,
            issued_at: now.to_rfc3339(),
            expiry: expiry.to_rfc3339(),
            valid_minutes,
            sig: String::new(),
        };
        payload.sig = self.signature(&payload);
        payload
    }

    /// Verify a scanned payload: signature, then type, then expiry.
    /// Class existence and enrollment are the caller's checks.
    pub fn verify(&self, json: &str, now: DateTime<Utc>) -> Result<QrPayload, QrError> {
        let payload: QrPayload = serde_json::from_str(json).map_err(|_| QrError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(Self::canonical(&payload).as_bytes());
        let sig_bytes = hex::decode(&payload.sig).map_err(|_| QrError::BadSignature)?;
        mac.verify_slice(&sig_bytes)
            .map_err(|_| QrError::BadSignature)?;

        if payload.kind != PAYLOAD_TYPE {
            return Err(QrError::WrongType);
        }

        let expiry = DateTime::parse_from_rfc3339(&payload.expiry)
            .map_err(|_| QrError::Malformed)?
            .with_timezone(&Utc);
        if now > expiry {
            return Err(QrError::Expired);
        }

        Ok(payload)
    }

    fn signature(&self, payload: &QrPayload) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(Self::canonical(payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// The signed fields, in a fixed order. `sig` itself is excluded.
    fn canonical(payload: &QrPayload) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            payload.kind,
            payload.class_code,
            payload.instructor,
            payload.session_id,
            payload.issued_at,
            payload.expiry,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> QrSigner {
        QrSigner::new("test-secret")
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let now = Utc::now();
        let payload = signer().issue("CS101", "prof.smith", 30, now);

        let verified = signer().verify(&payload.to_json(), now).unwrap();
        assert_eq!(verified.class_code, "CS101");
        assert_eq!(verified.instructor, "prof.smith");
        assert_eq!(verified.session_id, payload.session_id);
        assert_eq!(verified.valid_minutes, 30);
    }

    #[test]
    fn test_expired_payload_rejected_even_with_valid_class() {
        let now = Utc::now();
        let payload = signer().issue("CS101", "prof.smith", 30, now);

        let later = now + Duration::minutes(31);
        assert_eq!(
            signer().verify(&payload.to_json(), later),
            Err(QrError::Expired)
        );
    }

    #[test]
    fn test_payload_valid_at_last_minute() {
        let now = Utc::now();
        let payload = signer().issue("CS101", "prof.smith", 30, now);

        let almost = now + Duration::minutes(29);
        assert!(signer().verify(&payload.to_json(), almost).is_ok());
    }

    #[test]
    fn test_tampered_class_code_fails_signature() {
        let now = Utc::now();
        let payload = signer().issue("CS101", "prof.smith", 30, now);

        let tampered = payload.to_json().replace("CS101", "CS999");
        assert_eq!(
            signer().verify(&tampered, now),
            Err(QrError::BadSignature)
        );
    }

    #[test]
    fn test_foreign_secret_fails_signature() {
        let now = Utc::now();
        let payload = QrSigner::new("other-secret").issue("CS101", "prof.smith", 30, now);

        assert_eq!(
            signer().verify(&payload.to_json(), now),
            Err(QrError::BadSignature)
        );
    }

    #[test]
    fn test_wrong_type_rejected() {
        let now = Utc::now();
        let mut payload = signer().issue("CS101", "prof.smith", 30, now);
        payload.kind = "meeting".to_string();
        // Re-sign so only the type check can fail.
        payload.sig = signer().signature(&payload);

        assert_eq!(
            signer().verify(&payload.to_json(), now),
            Err(QrError::WrongType)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(
            signer().verify("not json at all", Utc::now()),
            Err(QrError::Malformed)
        );
    }
}
