// crates/trellis-core/src/session.rs
// ============================================================================
// Module: Sessions
// Description: Server-side sessions, authenticity tokens, and request context.
// Purpose: Give handlers and templates per-user state keyed by a session cookie.
// Dependencies: axum, base64, rand, subtle
// ============================================================================

//! ## Overview
//! A [`Session`] holds string values for one browser plus a lazily generated
//! authenticity token. [`SessionStore`] keeps sessions in memory keyed by an
//! opaque id carried in the `<PREFIX>_SESSION` cookie. The [`session_layer`]
//! middleware resolves the session for each request and exposes it through an
//! [`HttpContext`] request extension; a session is only persisted (and its
//! cookie issued) once something has been written to it, and a stored session
//! that ends a request empty is dropped and its cookie expired.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use axum::extract::FromRequestParts;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::COOKIE;
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use subtle::ConstantTimeEq;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Session key under which the authenticity token is stored.
const AUTHENTICITY_KEY: &str = "_authenticity";
/// Random bytes in a generated authenticity token.
const TOKEN_BYTES: usize = 16;
/// Random bytes in a generated session id.
const SESSION_ID_BYTES: usize = 24;
/// Sessions kept before the oldest is evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

// ============================================================================
// SECTION: Session
// ============================================================================

/// Per-browser session state.
pub trait Session: Send + Sync {
    /// Returns the authenticity token, generating and storing one if absent.
    fn authenticity_token(&self) -> String;

    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`.
    fn put(&self, key: &str, value: &str);

    /// Removes `key`.
    fn remove(&self, key: &str);

    /// Removes every value, including the authenticity token.
    fn clear(&self);

    /// Returns true when the session holds no values.
    fn is_empty(&self) -> bool;

    /// Compares `candidate` with the stored authenticity token in constant
    /// time. A session without a token rejects every candidate and stays empty.
    fn verify_authenticity_token(&self, candidate: &str) -> bool {
        self.get(AUTHENTICITY_KEY)
            .is_some_and(|token| bool::from(token.as_bytes().ct_eq(candidate.as_bytes())))
    }
}

/// In-memory session values.
#[derive(Debug, Default)]
pub struct SessionData {
    /// Stored values.
    values: Mutex<BTreeMap<String, String>>,
}

impl SessionData {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with the locked values, recovering from poisoning.
    fn with_values<R>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> R {
        let mut guard = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Session for SessionData {
    fn authenticity_token(&self) -> String {
        self.with_values(|values| {
            values.entry(AUTHENTICITY_KEY.to_string()).or_insert_with(generate_token).clone()
        })
    }

    fn get(&self, key: &str) -> Option<String> {
        self.with_values(|values| values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) {
        self.with_values(|values| {
            values.insert(key.to_string(), value.to_string());
        });
    }

    fn remove(&self, key: &str) {
        self.with_values(|values| {
            values.remove(key);
        });
    }

    fn clear(&self) {
        self.with_values(|values| values.clear());
    }

    fn is_empty(&self) -> bool {
        self.with_values(|values| values.is_empty())
    }
}

// ============================================================================
// SECTION: Session Store
// ============================================================================

/// In-memory session store keyed by session id.
///
/// Holds at most `capacity` sessions; inserting past the limit evicts the
/// oldest session first.
#[derive(Debug)]
pub struct SessionStore {
    /// Live sessions and their insertion order.
    sessions: Mutex<SessionMap>,
    /// Maximum number of live sessions.
    capacity: usize,
}

/// Sessions by id plus insertion order for eviction.
#[derive(Debug, Default)]
struct SessionMap {
    /// Sessions by id.
    by_id: HashMap<String, Arc<SessionData>>,
    /// Ids, oldest first.
    order: VecDeque<String>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    /// Creates an empty store holding up to [`DEFAULT_MAX_SESSIONS`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store holding up to `capacity` sessions (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(SessionMap::default()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the session stored under `id`.
    #[must_use]
    pub fn load(&self, id: &str) -> Option<Arc<SessionData>> {
        self.lock().by_id.get(id).cloned()
    }

    /// Stores `session` under a fresh id and returns the id.
    pub fn insert(&self, session: Arc<SessionData>) -> String {
        let id = random_token(SESSION_ID_BYTES);
        let mut sessions = self.lock();
        while sessions.by_id.len() >= self.capacity {
            let Some(oldest) = sessions.order.pop_front() else {
                break;
            };
            sessions.by_id.remove(&oldest);
        }
        sessions.order.push_back(id.clone());
        sessions.by_id.insert(id.clone(), session);
        id
    }

    /// Drops the session stored under `id`.
    pub fn remove(&self, id: &str) {
        let mut sessions = self.lock();
        if sessions.by_id.remove(id).is_some() {
            sessions.order.retain(|stored| stored != id);
        }
    }

    /// Returns the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    /// Returns true when no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the session map, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Request-scoped view handed to templates and handlers.
pub trait RequestContext: Send + Sync {
    /// Returns the session of the current request.
    fn session(&self) -> &dyn Session;
}

/// Request context installed by [`session_layer`].
#[derive(Debug, Clone)]
pub struct HttpContext {
    /// Session of the current request.
    session: Arc<SessionData>,
}

impl HttpContext {
    /// Wraps a session.
    #[must_use]
    pub const fn new(session: Arc<SessionData>) -> Self {
        Self {
            session,
        }
    }
}

impl RequestContext for HttpContext {
    fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for HttpContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "session layer not installed"))
    }
}

// ============================================================================
// SECTION: Middleware
// ============================================================================

/// State for [`session_layer`].
#[derive(Debug, Clone)]
pub struct SessionLayerState {
    /// Backing session store.
    store: Arc<SessionStore>,
    /// Session cookie name.
    cookie_name: Arc<str>,
}

impl SessionLayerState {
    /// Creates middleware state for a store and cookie name.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, cookie_name: &str) -> Self {
        Self {
            store,
            cookie_name: Arc::from(cookie_name),
        }
    }
}

/// Resolves the request session and issues the cookie for new sessions.
pub async fn session_layer(
    State(state): State<SessionLayerState>,
    mut request: Request,
    next: Next,
) -> Response {
    let existing = read_cookie(request.headers(), &state.cookie_name)
        .and_then(|id| state.store.load(&id).map(|session| (id, session)));
    let session = existing.as_ref().map(|(_, session)| Arc::clone(session)).unwrap_or_default();
    request.extensions_mut().insert(HttpContext::new(Arc::clone(&session)));

    let mut response = next.run(request).await;
    let cookie = match existing {
        None if !session.is_empty() => {
            let id = state.store.insert(session);
            Some(format!("{}={id}; Path=/; HttpOnly; SameSite=Lax", state.cookie_name))
        }
        Some((id, session)) if session.is_empty() => {
            state.store.remove(&id);
            Some(format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", state.cookie_name))
        }
        _ => None,
    };
    if let Some(value) = cookie.and_then(|cookie| HeaderValue::from_str(&cookie).ok()) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the value of cookie `name` from request headers.
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Generates an authenticity token.
fn generate_token() -> String {
    random_token(TOKEN_BYTES)
}

/// Generates a URL-safe random token from `len` bytes.
fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
