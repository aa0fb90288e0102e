//! Session-backed authentication
//!
//! The signed-in user id lives under a single session key. [`RequireAuth`]
//! gates routes on its presence. Passwords are stored as
//! `pbkdf2_sha256$<iterations>$<salt>$<hash>` with base64url parts.

use super::csrf::constant_time_eq;
use super::Middleware;
use crate::handler::BoxHandler;
use crate::{Context, Error, HttpError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;

const USER_ID_KEY: &str = "auth.user_id";

const PASSWORD_SCHEME: &str = "pbkdf2_sha256";
/// PBKDF2 rounds for new hashes
pub const PASSWORD_ITERATIONS: u32 = 120_000;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Rejects requests without a signed-in user with 401
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAuth;

impl Middleware for RequireAuth {
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        Arc::new(move |ctx: Context| {
            let next = Arc::clone(&next);
            async move {
                if user_id(&ctx).is_none() {
                    return Err(HttpError::unauthorized("Unauthenticated").into());
                }
                next.call(ctx).await
            }
        })
    }
}

/// Sign `id` in, rotating the session id
pub fn login(ctx: &Context, id: i64) -> Result<()> {
    let session = ctx
        .session()
        .ok_or_else(|| HttpError::internal("Session is not enabled"))?;
    session.regenerate();
    session.put(USER_ID_KEY, id);
    Ok(())
}

/// Sign the current user out; the session itself survives
pub fn logout(ctx: &Context) {
    if let Some(session) = ctx.session() {
        session.forget(USER_ID_KEY);
    }
}

/// The signed-in user id, accepting numbers and numeric strings
pub fn user_id(ctx: &Context) -> Option<i64> {
    let value = ctx.session()?.get(USER_ID_KEY)?;
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Hash a password with a fresh random salt
///
/// Surrounding whitespace is ignored. Blank passwords are rejected.
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with(password, PASSWORD_ITERATIONS)
}

/// [`hash_password`] with an explicit round count
pub fn hash_password_with(password: &str, iterations: u32) -> Result<String> {
    let password = password.trim();
    if password.is_empty() {
        return Err(Error::EmptyPassword);
    }

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations.max(1), &mut key);

    Ok(format!(
        "{}${}${}${}",
        PASSWORD_SCHEME,
        iterations.max(1),
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(key)
    ))
}

/// Check a password against a stored hash
///
/// Malformed or foreign hashes never match.
pub fn check_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != PASSWORD_SCHEME {
        return false;
    }
    let Some(iterations) = iterations.parse::<u32>().ok().filter(|n| *n > 0) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (URL_SAFE_NO_PAD.decode(salt), URL_SAFE_NO_PAD.decode(expected)) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }

    let mut key = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.trim().as_bytes(), &salt, iterations, &mut key);
    constant_time_eq(&key, &expected)
}
