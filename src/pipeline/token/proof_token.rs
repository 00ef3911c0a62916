use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::warn;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use crate::config::settings::Token;
use crate::error::liveness_error::LivenessError;

pub const VERIFICATION_TYPE: &str = "proof_of_life";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofClaims {
    #[serde(default)]
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub jti: String,
    #[serde(default)]
    pub challenge_type: String,
    #[serde(default)]
    pub proof_hash: String,
    #[serde(default)]
    pub verified_at: String,
    #[serde(default)]
    pub verification_type: String,
}

impl ProofClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of checking a token on behalf of a relying party.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TokenVerification {
    fn rejected(reason: impl Into<String>) -> Self {
        TokenVerification {
            valid: false,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// `hex(SHA-256(frame || nonce || lowercase(identity)))`
pub fn proof_hash(frame_bytes: &[u8], nonce: &str, identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(frame_bytes);
    hasher.update(nonce.as_bytes());
    hasher.update(identity.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Signs and checks HS256 proof-of-liveness tokens.
#[derive(Clone)]
pub struct ProofTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expiry: Duration,
}

impl ProofTokenIssuer {
    pub fn new(secret: &[u8], issuer: &str, expiry_hours: i64) -> Self {
        ProofTokenIssuer {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            expiry: Duration::hours(expiry_hours),
        }
    }

    /// Uses the configured secret, or a random one that only this process
    /// knows when none is set.
    pub fn from_settings(token: &Token) -> Self {
        match token.secret_key.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(secret) => ProofTokenIssuer::new(secret.as_bytes(), &token.issuer, token.expiry_hours),
            None => {
                warn!("JWT_SECRET_KEY is not set, using a generated key; tokens will not verify on other replicas or after restart");
                let mut secret = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                ProofTokenIssuer::new(&secret, &token.issuer, token.expiry_hours)
            }
        }
    }

    pub fn issue(&self, identity: &str, challenge_type: &str, proof_hash: &str, session_id: &str) -> Result<IssuedToken, LivenessError> {
        let now = Utc::now();
        let expires_at = now + self.expiry;
        let claims = ProofClaims {
            iss: self.issuer.clone(),
            sub: identity.to_lowercase(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: session_id.to_string(),
            challenge_type: challenge_type.to_string(),
            proof_hash: proof_hash.to_string(),
            verified_at: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            verification_type: VERIFICATION_TYPE.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| LivenessError::ConfigurationError(format!("failed to sign token: {e}")))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Checks signature and expiry. The subject, proof hash and challenge type
    /// must be present.
    pub fn validate(&self, token: &str) -> Result<ProofClaims, LivenessError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<ProofClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => LivenessError::TokenExpired,
                _ => LivenessError::TokenInvalid(e.to_string()),
            })?
            .claims;

        if claims.sub.is_empty() || claims.proof_hash.is_empty() || claims.challenge_type.is_empty() {
            return Err(LivenessError::TokenInvalid("missing required claims".to_string()));
        }
        Ok(claims)
    }

    pub fn verify(&self, token: &str, identity: &str) -> TokenVerification {
        let claims = match self.validate(token) {
            Ok(claims) => claims,
            Err(e) => return TokenVerification::rejected(e.to_string()),
        };

        if claims.sub.to_lowercase() != identity.trim().to_lowercase() {
            return TokenVerification::rejected("token subject does not match identity");
        }
        if claims.verification_type != VERIFICATION_TYPE {
            return TokenVerification::rejected("token is not a proof of life");
        }

        TokenVerification {
            valid: true,
            expires_at: claims.expires_at().map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            subject: Some(claims.sub),
            proof_hash: Some(claims.proof_hash),
            challenge_type: Some(claims.challenge_type),
            verified_at: Some(claims.verified_at).filter(|v| !v.is_empty()),
            reason: None,
        }
    }

    /// True only for a valid, unexpired proof-of-life token issued to `identity`.
    pub fn verify_for_caller(&self, token: &str, identity: &str) -> bool {
        self.verify(token, identity).valid
    }
}
