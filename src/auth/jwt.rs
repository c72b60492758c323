use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::directory::Role;
use crate::error::{AppError, AppResult};

/// Access tokens shared with the identity provider (HS256, same secret).
/// The service only needs to verify them; `issue` exists for tooling and
/// the integration harness.
#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    expiry: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.jwt_secret.is_empty(),
            "JWT_SECRET must not be empty"
        );
        let mut validation = Validation::default();
        validation.set_audience(&[config.jwt_audience.as_str()]);
        validation.set_issuer(&[config.jwt_issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.expiry).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Any defect in the token surfaces as `unauthenticated`; the reason is
    /// only logged.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => {
                let reason = match err.kind() {
                    JwtErrorKind::ExpiredSignature => "expired",
                    JwtErrorKind::InvalidAudience | JwtErrorKind::InvalidIssuer => "foreign",
                    JwtErrorKind::InvalidSignature => "bad signature",
                    _ => "malformed",
                };
                tracing::debug!(reason, error = %err, "rejected access token");
                Err(AppError::unauthorized())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config(secret: &str, audience: &str) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            jwt_secret: secret.into(),
            jwt_issuer: "consultations".into(),
            jwt_audience: audience.into(),
            jwt_expiry_minutes: 5,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".into(),
            s3_bucket: "bucket".into(),
            max_file_size: 1024,
            allowed_file_types: vec!["pdf".into()],
            download_url_expiry_seconds: 60,
            notify_webhook_url: None,
        }
    }

    #[test]
    fn issued_tokens_carry_subject_and_role() {
        let service = JwtService::from_config(&config("secret", "clients")).unwrap();
        let user = Uuid::new_v4();
        let token = service.issue(user, Role::Operator).unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, Role::Operator);
    }

    #[test]
    fn tokens_for_another_audience_or_secret_are_rejected() {
        let ours = JwtService::from_config(&config("secret", "clients")).unwrap();
        let other_audience = JwtService::from_config(&config("secret", "admins")).unwrap();
        let other_secret = JwtService::from_config(&config("other", "clients")).unwrap();
        let user = Uuid::new_v4();

        for token in [
            other_audience.issue(user, Role::Client).unwrap(),
            other_secret.issue(user, Role::Client).unwrap(),
            "not-a-token".to_string(),
        ] {
            let err = ours.verify(&token).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        }
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert!(JwtService::from_config(&config("", "clients")).is_err());
    }
}
