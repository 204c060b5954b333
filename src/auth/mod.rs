use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Access role ladder. Authorization is a simple ordering: operator implies
/// customer rights, admin implies both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Operator,
    Admin,
}

/// Claims carried by the HS256 bearer token. Token issuance belongs to the
/// identity service; this side only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subscriber id
    pub sub: Uuid,
    /// Customer the subject belongs to, absent for internal staff
    pub customer_id: Option<Uuid>,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

/// Verifies bearer tokens against the shared secret.
#[derive(Clone)]
pub struct AuthService {
    decoding_key: Arc<DecodingKey>,
}

impl AuthService {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(jwt_secret.as_bytes())),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))?;
        Ok(data.claims)
    }
}

/// Authenticated caller extracted from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub subscriber_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn has_role(&self, required: Role) -> bool {
        self.role >= required
    }

    /// Guard for role-gated endpoints.
    pub fn require_role(&self, required: Role) -> Result<(), ServiceError> {
        if self.has_role(required) {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied(format!(
                "requires {:?} role",
                required
            )))
        }
    }

    /// Customer-scoped callers may only touch resources of their own
    /// customer; operators and admins see everything.
    pub fn require_customer_access(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        if self.role >= Role::Operator || self.customer_id == Some(customer_id) {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied(
                "resource belongs to another customer".to_string(),
            ))
        }
    }
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            subscriber_id: claims.sub,
            customer_id: claims.customer_id,
            role: claims.role,
        }
    }
}

impl FromRequestParts<crate::AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".into()))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("expected bearer token".into()))?
            .trim();

        let claims = state.auth.verify(token)?;
        Ok(claims.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn token_for(role: Role, customer_id: Option<Uuid>) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            customer_id,
            role,
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verify_roundtrip() {
        let auth = AuthService::new(SECRET);
        let customer = Uuid::new_v4();
        let claims = auth
            .verify(&token_for(Role::Customer, Some(customer)))
            .unwrap();
        assert_eq!(claims.role, Role::Customer);
        assert_eq!(claims.customer_id, Some(customer));
    }

    #[test]
    fn bad_secret_rejected() {
        let auth = AuthService::new("another-secret-entirely-32chars!");
        assert!(auth.verify(&token_for(Role::Admin, None)).is_err());
    }

    #[test]
    fn role_ladder() {
        let operator = AuthenticatedUser {
            subscriber_id: Uuid::new_v4(),
            customer_id: None,
            role: Role::Operator,
        };
        assert!(operator.require_role(Role::Customer).is_ok());
        assert!(operator.require_role(Role::Operator).is_ok());
        assert!(operator.require_role(Role::Admin).is_err());
    }

    #[test]
    fn customer_scope_enforced() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let customer = AuthenticatedUser {
            subscriber_id: Uuid::new_v4(),
            customer_id: Some(own),
            role: Role::Customer,
        };
        assert!(customer.require_customer_access(own).is_ok());
        assert!(customer.require_customer_access(other).is_err());
    }
}
