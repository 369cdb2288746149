// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validates signed session tokens on every gated request and injects
//! the validated identity into the downstream context.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use trac_config::AuthConfig;
use trac_error::{ErrorCode, TracError};

/// Routes that never require a token (spec: login, health).
pub const EXEMPT_ROUTES: &[&str] = &["/auth/login", "/health"];

/// Claims carried by a TRAC session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated user or service identity.
    pub sub: String,
    /// Tenant the token is scoped to.
    pub tenant: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Identity attached to the request context on successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub tenant: String,
}

/// Validates bearer tokens against the configured public key, or the
/// non-production bypass modes.
pub struct AuthGate {
    config: AuthConfig,
    decoding_key: Option<DecodingKey>,
    exempt: HashSet<&'static str>,
}

impl AuthGate {
    /// `public_key_pem` is required unless `config.disable_signing` is set;
    /// callers load it from `auth.public_key_ref`.
    pub fn new(config: AuthConfig, public_key_pem: Option<&[u8]>) -> Result<Self, TracError> {
        let decoding_key = if config.disable_signing {
            None
        } else {
            let pem = public_key_pem.ok_or_else(|| {
                TracError::new(
                    ErrorCode::Validation,
                    "auth.public_key_ref is required unless disable_signing is set",
                )
            })?;
            Some(DecodingKey::from_rsa_pem(pem).map_err(|e| {
                TracError::new(ErrorCode::Validation, format!("invalid public key: {e}"))
            })?)
        };
        Ok(Self {
            config,
            decoding_key,
            exempt: EXEMPT_ROUTES.iter().copied().collect(),
        })
    }

    #[must_use]
    pub fn is_exempt(&self, route: &str) -> bool {
        self.exempt.contains(route)
    }

    /// Validate a bearer token (gRPC metadata header or HTTP cookie,
    /// stripped of any `Bearer ` prefix by the caller) for `route`.
    pub fn authenticate(&self, route: &str, token: Option<&str>) -> Result<Identity, TracError> {
        if self.is_exempt(route) {
            return Ok(Identity {
                user: "anonymous".to_string(),
                tenant: String::new(),
            });
        }

        if self.config.disable_auth {
            return Ok(Identity {
                user: "dev".to_string(),
                tenant: "dev".to_string(),
            });
        }

        let token = token.ok_or_else(|| TracError::new(ErrorCode::Unauthenticated, "missing bearer token"))?;

        let claims = match &self.decoding_key {
            Some(key) => {
                let validation = Validation::new(Algorithm::RS256);
                jsonwebtoken::decode::<Claims>(token, key, &validation)
                    .map_err(|e| TracError::new(ErrorCode::Unauthenticated, format!("token signature invalid: {e}")))?
                    .claims
            }
            None => decode_unverified(token)?,
        };

        let now = Utc::now().timestamp();
        if claims.iat > now {
            return Err(TracError::new(ErrorCode::Unauthenticated, "token issued in the future"));
        }
        if claims.exp < now {
            return Err(TracError::new(ErrorCode::Unauthenticated, "token has expired"));
        }

        Ok(Identity {
            user: claims.sub,
            tenant: claims.tenant,
        })
    }
}

/// Decodes the claims without verifying the signature. Only reachable
/// when `auth.disable_signing` is set, which `trac-config::validate_config`
/// rejects outside non-production environments.
fn decode_unverified(token: &str) -> Result<Claims, TracError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    let dummy_key = DecodingKey::from_secret(&[]);
    jsonwebtoken::decode::<Claims>(token, &dummy_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| TracError::new(ErrorCode::Unauthenticated, format!("malformed token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn claims(iat: i64, exp: i64) -> Claims {
        Claims {
            sub: "alice".into(),
            tenant: "acme".into(),
            iat,
            exp,
        }
    }

    #[test]
    fn exempt_routes_bypass_token_requirement() {
        let gate = AuthGate::new(
            AuthConfig {
                public_key_ref: None,
                disable_auth: false,
                disable_signing: true,
            },
            None,
        )
        .unwrap();
        assert!(gate.authenticate("/health", None).is_ok());
        assert!(gate.authenticate("/auth/login", None).is_ok());
    }

    #[test]
    fn missing_token_is_unauthenticated() {
        let gate = AuthGate::new(
            AuthConfig {
                public_key_ref: None,
                disable_auth: false,
                disable_signing: true,
            },
            None,
        )
        .unwrap();
        let err = gate.authenticate("/metadata/read", None).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthenticated);
    }

    #[test]
    fn disable_auth_bypasses_token_check() {
        let gate = AuthGate::new(
            AuthConfig {
                public_key_ref: None,
                disable_auth: true,
                disable_signing: true,
            },
            None,
        )
        .unwrap();
        let identity = gate.authenticate("/metadata/read", None).unwrap();
        assert_eq!(identity.user, "dev");
    }

    #[test]
    fn disable_signing_accepts_unverified_token_within_window() {
        let gate = AuthGate::new(
            AuthConfig {
                public_key_ref: None,
                disable_auth: false,
                disable_signing: true,
            },
            None,
        )
        .unwrap();
        let now = Utc::now().timestamp();
        let token = encode(
            &Header::default(),
            &claims(now - 10, now + 3600),
            &EncodingKey::from_secret(b"unused"),
        )
        .unwrap();
        let identity = gate.authenticate("/metadata/read", Some(&token)).unwrap();
        assert_eq!(identity.user, "alice");
        assert_eq!(identity.tenant, "acme");
    }

    #[test]
    fn expired_token_is_rejected() {
        let gate = AuthGate::new(
            AuthConfig {
                public_key_ref: None,
                disable_auth: false,
                disable_signing: true,
            },
            None,
        )
        .unwrap();
        let now = Utc::now().timestamp();
        let token = encode(
            &Header::default(),
            &claims(now - 100, now - 10),
            &EncodingKey::from_secret(b"unused"),
        )
        .unwrap();
        let err = gate.authenticate("/metadata/read", Some(&token)).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthenticated);
    }

    #[test]
    fn requires_public_key_unless_signing_disabled() {
        let err = AuthGate::new(
            AuthConfig {
                public_key_ref: Some("file:///key.pem".into()),
                disable_auth: false,
                disable_signing: false,
            },
            None,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }
}
