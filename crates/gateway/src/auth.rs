//! Identity resolution for HTTP and WebSocket requests.
//!
//! Tokens are compact HS256 JWTs carrying `{iss, role, exp}`, read from the
//! identity cookie or an `Authorization: Bearer` header. Issuance is out of
//! scope apart from [`sign_token`], which the CLI uses to mint operator tokens.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    axum::http::{HeaderMap, header::AUTHORIZATION},
    axum_extra::extract::cookie::CookieJar,
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Admin => "admin",
            Self::User => "user",
        })
    }
}

/// Verified caller: numeric user id plus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// `iss` may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Issuer {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    iss: Issuer,
    role: Role,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no identity token")]
    Missing,
    #[error("malformed identity token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("bad token signature")]
    BadSignature,
    #[error("identity token expired")]
    Expired,
    #[error("invalid token claims")]
    InvalidClaims,
}

/// Resolves the caller of a request. The gateway consults it once per
/// request, before any upgrade.
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> Result<Identity, AuthError>;
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn mac(secret: &Secret<String>) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac keys have no length limit"),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

// ── Token logic ──────────────────────────────────────────────────────────────

/// Mint a token for `identity` valid for `ttl_secs`.
pub fn sign_token(identity: Identity, secret: &Secret<String>, ttl_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = Claims {
        iss: Issuer::Text(identity.id.to_string()),
        role: identity.role,
        exp: now_secs() + ttl_secs,
    };
    // Serializing a struct of strings and integers cannot fail.
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
    let signing_input = format!("{header}.{payload}");
    let mut mac = mac(secret);
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signing_input}.{signature}")
}

/// Check signature, algorithm and expiry, then extract the identity.
pub fn verify_token(token: &str, secret: &Secret<String>) -> Result<Identity, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::Malformed);
    };

    let header: Header = URL_SAFE_NO_PAD
        .decode(header_b64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or(AuthError::Malformed)?;
    if header.alg != "HS256" {
        return Err(AuthError::UnsupportedAlgorithm(header.alg));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::Malformed)?;
    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
    let mut mac = mac(secret);
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;

    let raw = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&raw).map_err(|_| AuthError::InvalidClaims)?;
    if claims.exp <= now_secs() {
        return Err(AuthError::Expired);
    }
    let id = match claims.iss {
        Issuer::Number(n) => n,
        Issuer::Text(s) => s.parse().map_err(|_| AuthError::InvalidClaims)?,
    };
    if id <= 0 {
        return Err(AuthError::InvalidClaims);
    }
    Ok(Identity {
        id,
        role: claims.role,
    })
}

// ── Provider ─────────────────────────────────────────────────────────────────

/// Verifies HS256 tokens from the identity cookie, then the bearer header.
pub struct JwtIdentityProvider {
    secret: Secret<String>,
    cookie_name: String,
}

impl JwtIdentityProvider {
    pub fn new(secret: Secret<String>, cookie_name: impl Into<String>) -> Self {
        Self {
            secret,
            cookie_name: cookie_name.into(),
        }
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn identify(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let jar = CookieJar::from_headers(headers);
        let token = match jar.get(&self.cookie_name) {
            Some(cookie) if !cookie.value().is_empty() => cookie.value().to_string(),
            _ => bearer(headers).ok_or(AuthError::Missing)?.to_string(),
        };
        verify_token(&token, &self.secret)
    }
}
