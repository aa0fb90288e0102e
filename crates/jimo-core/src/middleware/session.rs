//! Session Middleware
//!
//! Server-side sessions keyed by a random id carried in a cookie, with
//! pluggable stores. The handle attached to the [`Context`] is shared with
//! the middleware, which persists it after the inner chain returns.

use super::cookie::{Cookie, SameSite};
use super::Middleware;
use crate::handler::BoxHandler;
use crate::{Context, Request};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 32 random bytes, base64url without padding
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Persisted session contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub values: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub flashes: HashMap<String, Value>,
    #[serde(default)]
    pub csrf: String,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie name (default: "jimo_session")
    pub cookie_name: String,
    /// Session lifetime (default: 14 days)
    pub max_age: Duration,
    /// Cookie path
    pub path: String,
    /// Cookie domain
    pub domain: Option<String>,
    /// Secure flag
    pub secure: bool,
    /// HttpOnly flag
    pub http_only: bool,
    /// SameSite attribute
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "jimo_session".to_string(),
            max_age: Duration::from_secs(14 * 24 * 60 * 60),
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn max_age(mut self, duration: Duration) -> Self {
        self.max_age = duration;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    fn cookie(&self, value: impl Into<String>) -> Cookie {
        self.apply(Cookie::new(self.cookie_name.clone(), value))
    }

    fn removal_cookie(&self) -> Cookie {
        self.apply(Cookie::delete(self.cookie_name.clone()))
    }

    fn apply(&self, cookie: Cookie) -> Cookie {
        cookie
            .path(self.path.clone())
            .domain(self.domain.clone())
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site)
    }
}

/// Session store trait
pub trait SessionStore: Send + Sync {
    /// Get session data by ID
    fn get(&self, id: &str) -> Option<SessionData>;
    /// Set session data
    fn set(&self, id: &str, data: SessionData, max_age: Duration);
    /// Delete session
    fn destroy(&self, id: &str);
    /// Drop expired entries; stores that expire on their own keep the default
    fn cleanup(&self) {}
}

/// In-memory session store (single process only)
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

struct StoredSession {
    data: SessionData,
    expires: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all sessions
    pub fn clear(&self) {
        self.sessions.write().clear();
    }

    /// Get session count
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

impl SessionStore for MemoryStore {
    fn get(&self, id: &str) -> Option<SessionData> {
        let sessions = self.sessions.read();
        sessions
            .get(id)
            .filter(|session| session.expires > Instant::now())
            .map(|session| session.data.clone())
    }

    fn set(&self, id: &str, data: SessionData, max_age: Duration) {
        self.sessions.write().insert(
            id.to_string(),
            StoredSession {
                data,
                expires: Instant::now() + max_age,
            },
        );
    }

    fn destroy(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    fn cleanup(&self) {
        let now = Instant::now();
        self.sessions.write().retain(|_, session| session.expires > now);
    }
}

#[derive(Debug)]
struct SessionState {
    id: String,
    data: SessionData,
    is_new: bool,
    dirty: bool,
    destroyed: bool,
    previous_id: Option<String>,
}

/// Session handle for request context
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Wrap loaded (or fresh) data; nothing is persisted until a write
    pub fn new(id: impl Into<String>, data: SessionData, is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                id: id.into(),
                data,
                is_new,
                dirty: false,
                destroyed: false,
                previous_id: None,
            })),
        }
    }

    /// Current session id (the new one after `regenerate`)
    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    /// True until the session has been stored once
    pub fn is_new(&self) -> bool {
        self.inner.lock().is_new
    }

    /// True when the session must be written back
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Get a value from session
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().data.values.get(key).cloned()
    }

    /// Set a value in session
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.inner.lock();
        state.data.values.insert(key.into(), value.into());
        state.dirty = true;
    }

    /// Remove a value from session
    pub fn forget(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.lock();
        let removed = state.data.values.remove(key);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    /// Set a value meant to be read once
    pub fn flash(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.inner.lock();
        state.data.flashes.insert(key.into(), value.into());
        state.dirty = true;
    }

    /// Read and remove a flash value
    pub fn pull_flash(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.lock();
        let value = state.data.flashes.remove(key);
        if value.is_some() {
            state.dirty = true;
        }
        value
    }

    /// CSRF token bound to this session; issued on first use
    pub fn csrf_token(&self) -> String {
        let mut state = self.inner.lock();
        if state.data.csrf.is_empty() {
            state.data.csrf = random_token();
            state.dirty = true;
        }
        state.data.csrf.clone()
    }

    /// CSRF token if one was already issued
    pub fn existing_csrf_token(&self) -> Option<String> {
        let state = self.inner.lock();
        (!state.data.csrf.is_empty()).then(|| state.data.csrf.clone())
    }

    /// Regenerate session ID (for security after login)
    pub fn regenerate(&self) {
        let mut state = self.inner.lock();
        let old = std::mem::replace(&mut state.id, random_token());
        if !state.is_new && state.previous_id.is_none() {
            state.previous_id = Some(old);
        }
        state.dirty = true;
    }

    /// Mark session for destruction
    pub fn destroy(&self) {
        self.inner.lock().destroyed = true;
    }

    /// True once [`destroy`](Self::destroy) was called
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }
}

/// Sessions middleware
///
/// Loads the session named by the request cookie (or starts a new one),
/// attaches it to the context, and persists it once the inner chain is
/// done. A `Set-Cookie` is emitted whenever the session was written. A new
/// session the chain never wrote to is neither stored nor sent.
pub struct Sessions {
    store: Arc<dyn SessionStore>,
    config: Arc<SessionConfig>,
}

impl Sessions {
    /// Sessions kept in `store`
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// In-memory store with default cookie settings
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), SessionConfig::default())
    }
}

fn load(store: &dyn SessionStore, config: &SessionConfig, req: &Request) -> Session {
    let existing = req
        .cookie(&config.cookie_name)
        .and_then(|id| store.get(&id).map(|data| (id, data)));

    match existing {
        Some((id, data)) => Session::new(id, data, false),
        None => Session::new(random_token(), SessionData::default(), true),
    }
}

/// Persist the session; returns the cookie to send, if any
fn save(store: &dyn SessionStore, config: &SessionConfig, session: &Session) -> Option<Cookie> {
    let mut state = session.inner.lock();

    if let Some(previous) = state.previous_id.take() {
        store.destroy(&previous);
    }

    if state.destroyed {
        store.destroy(&state.id);
        return (!state.is_new).then(|| config.removal_cookie());
    }

    if !state.dirty {
        return None;
    }

    store.set(&state.id, state.data.clone(), config.max_age);
    state.dirty = false;
    state.is_new = false;
    Some(config.cookie(state.id.clone()).max_age(config.max_age.as_secs() as i64))
}

impl Middleware for Sessions {
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        Arc::new(move |mut ctx: Context| {
            let next = Arc::clone(&next);
            let store = Arc::clone(&store);
            let config = Arc::clone(&config);
            async move {
                let session = load(store.as_ref(), &config, ctx.request());
                ctx.attach_session(session.clone());

                let result = next.call(ctx).await;

                // Persist even when the chain failed; only the cookie is lost.
                let cookie = save(store.as_ref(), &config, &session);
                let mut res = result?;
                if let Some(cookie) = cookie {
                    res.append_header("set-cookie", cookie.to_header_value());
                }
                Ok(res)
            }
        })
    }
}
