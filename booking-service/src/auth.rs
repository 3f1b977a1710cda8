use crate::error::BookingError;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::Customer;
use tracing::warn;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "zeturides-token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, customer: &Customer) -> Result<Session, BookingError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: customer.id.to_string(),
            email: customer.email.clone(),
            exp: expires_at.timestamp().max(0) as usize,
            iat: now.timestamp().max(0) as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| BookingError::Internal(format!("token signing failed: {}", e)))?;
        Ok(Session { token, expires_at })
    }

    /// The customer id a valid, unexpired token was issued for.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| warn!("Rejected session token: {}", e))
            .ok()?;
        Uuid::parse_str(&data.claims.sub).ok()
    }
}

/// Bearer header first, then the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| !token.is_empty())
}

pub fn session_cookie(token: &str, max_age: Duration) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        SESSION_COOKIE,
        token,
        max_age.num_seconds().max(0)
    )
}

pub fn expired_cookie() -> String {
    session_cookie("", Duration::zero())
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, BookingError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| BookingError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| BookingError::Internal(format!("password hashing failed: {}", e)))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, BookingError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| BookingError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| BookingError::Internal(format!("password check failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn customer() -> Customer {
        Customer {
            id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            first_name: "Amina".to_string(),
            last_name: "Njeri".to_string(),
            id_number: None,
            phone_number: None,
            address: None,
            license_number: None,
            license_expiry_date: None,
            is_valid: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_tokens_verify_to_their_customer() {
        let issuer = SessionIssuer::new("secret", Duration::days(7));
        let customer = customer();
        let session = issuer.issue(&customer).unwrap();

        assert_eq!(issuer.verify(&session.token), Some(customer.id));
        assert!(session.expires_at > Utc::now() + Duration::days(6));
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let customer = customer();
        let other = SessionIssuer::new("other", Duration::days(7));
        let issuer = SessionIssuer::new("secret", Duration::days(7));
        let expired = SessionIssuer::new("secret", Duration::days(-1));

        assert_eq!(issuer.verify(&other.issue(&customer).unwrap().token), None);
        assert_eq!(issuer.verify(&expired.issue(&customer).unwrap().token), None);
        assert_eq!(issuer.verify("garbage"), None);
    }

    #[test]
    fn tokens_come_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; zeturides-token=abc.def"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn cookies_are_http_only_with_max_age() {
        let cookie = session_cookie("t", Duration::days(7));
        assert_eq!(
            cookie,
            "zeturides-token=t; HttpOnly; Path=/; Max-Age=604800; SameSite=Lax"
        );
        assert!(expired_cookie().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn passwords_hash_and_verify() {
        let hash = hash_password("password".to_string(), 4).await.unwrap();
        assert!(verify_password("password".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("passw0rd".to_string(), hash).await.unwrap());
    }
}
