#![allow(dead_code)]

use async_trait::async_trait;
use desk_session::{
    CredentialError, CredentialResult, EndpointState, Role, SessionManager, TokenExchangeResponse,
    TokenRefreshResponse, TokenTransport,
};
use desk_storage::{
    EntryReader, EntryRemover, EntryWriter, MemoryStore, StoreError, StoreResult,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BASE_URL: &str = "https://desk.example.com";
pub const LEEWAY: Duration = Duration::from_secs(60);

/// Exchange response for code `ABC123`: tok_a valid 900s, ref_a valid 30 days.
pub fn exchange_response() -> TokenExchangeResponse {
    TokenExchangeResponse {
        access_token: "tok_a".to_string(),
        access_expiry_interval: 900,
        refresh_token: "ref_a".to_string(),
        refresh_expiry_interval: 2_592_000,
        role_scope: Role::Member,
        capabilities: None,
        specialties: None,
    }
}

/// Refresh response that does not rotate the refresh token.
pub fn refresh_response() -> TokenRefreshResponse {
    TokenRefreshResponse {
        access_token: "tok_b".to_string(),
        access_expiry_interval: 900,
        role_scope: Role::Member,
        refresh_token: None,
        refresh_expiry_interval: None,
    }
}

/// Scripted token transport that counts calls.
pub struct StubTransport {
    exchange: Mutex<CredentialResult<TokenExchangeResponse>>,
    refresh: Mutex<CredentialResult<TokenRefreshResponse>>,
    refresh_delay: Mutex<Duration>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    codes: Mutex<Vec<String>>,
    refresh_tokens: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exchange: Mutex::new(Ok(exchange_response())),
            refresh: Mutex::new(Ok(refresh_response())),
            refresh_delay: Mutex::new(Duration::ZERO),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            codes: Mutex::new(Vec::new()),
            refresh_tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn set_exchange(&self, response: CredentialResult<TokenExchangeResponse>) {
        *self.exchange.lock() = response;
    }

    pub fn set_refresh(&self, response: CredentialResult<TokenRefreshResponse>) {
        *self.refresh.lock() = response;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().clone()
    }

    pub fn refresh_tokens(&self) -> Vec<String> {
        self.refresh_tokens.lock().clone()
    }
}

#[async_trait]
impl TokenTransport for StubTransport {
    async fn exchange_code(&self, code: &str) -> CredentialResult<TokenExchangeResponse> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().push(code.to_string());
        self.exchange.lock().clone()
    }

    async fn refresh(&self, refresh_token: &str) -> CredentialResult<TokenRefreshResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens.lock().push(refresh_token.to_string());

        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refresh.lock().clone()
    }
}

/// In-memory store whose writes can be switched off.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl EntryWriter for FlakyStore {
    fn put(&self, subject: &str, value: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unknown("keychain is locked".to_string()));
        }
        self.inner.put(subject, value)
    }
}

impl EntryReader for FlakyStore {
    fn get(&self, subject: &str) -> StoreResult<String> {
        self.inner.get(subject)
    }
}

impl EntryRemover for FlakyStore {
    fn delete(&self, subject: &str) -> StoreResult<()> {
        self.inner.delete(subject)
    }
}

/// A session manager over `store` driven by `transport`.
pub fn manager(store: Arc<FlakyStore>, transport: Arc<StubTransport>) -> SessionManager {
    SessionManager::with_transport(store, Arc::new(EndpointState::new()), transport, LEEWAY)
}

/// A manager that has already logged in with code `ABC123`.
pub async fn logged_in(
    store: Arc<FlakyStore>,
    transport: Arc<StubTransport>,
) -> SessionManager {
    let manager = manager(store, transport);
    manager
        .login_with_code(BASE_URL, "ABC123")
        .await
        .expect("login should succeed");
    manager
}

pub fn unreachable() -> CredentialError {
    CredentialError::Unreachable("connection refused".to_string())
}
