//! Single-flight access token renewal.

use crate::memento::MementoAgent;
use crate::proxy::DeferredBindingProxy;
use crate::renewal_fsm::{
    RenewalMachine, RenewalMachineInput, RenewalMachineState, RenewalStatus,
};
use crate::snapshot::{CredentialSnapshot, Role, POST_REFRESH_TAG};
use crate::state::SessionCredentialState;
use crate::transport::{RefreshGrant, TokenTransport};
use crate::{CredentialError, CredentialResult};
use chrono::{DateTime, Duration, Utc};
use desk_storage::{SecureKeyValueStore, StoreSubjects};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

type SharedRenewal = Shared<BoxFuture<'static, CredentialResult<RenewalOutcome>>>;

/// The renewal currently owning the single-flight slot.
struct InFlight {
    id: u64,
    renewal: SharedRenewal,
}

/// Result of a completed renewal, shared by every caller that joined it.
#[derive(Clone, PartialEq)]
pub struct RenewalOutcome {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub role: Role,
    pub refresh_token_rotated: bool,
    /// False when the renewed credentials could not be written to the store.
    pub persisted: bool,
}

impl fmt::Debug for RenewalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewalOutcome")
            .field("access_token", &"<redacted>")
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("role", &self.role)
            .field("refresh_token_rotated", &self.refresh_token_rotated)
            .field("persisted", &self.persisted)
            .finish()
    }
}

struct RenewalInner {
    credentials: Arc<DeferredBindingProxy<SessionCredentialState>>,
    transport: Arc<dyn TokenTransport>,
    agent: MementoAgent<SessionCredentialState, CredentialSnapshot>,
    /// Lock order: `machine`, then `in_flight`, then `last_failure`, then the
    /// credential state.
    machine: Mutex<RenewalMachine>,
    last_failure: Mutex<Option<CredentialError>>,
    /// Cleared under `machine` whenever the session is replaced or ended, so
    /// a renewal only applies its result while it still owns this slot.
    in_flight: Mutex<Option<InFlight>>,
    next_renewal_id: AtomicU64,
    leeway: Duration,
}

/// Keeps the access token valid and is the only post-login writer of the
/// session credentials.
///
/// Concurrent [`renew`](Self::renew) calls share one network request. The
/// request runs on its own task, so it completes and persists even if every
/// caller stops waiting.
#[derive(Clone)]
pub struct TokenRenewalCoordinator {
    inner: Arc<RenewalInner>,
}

impl TokenRenewalCoordinator {
    pub fn new(
        credentials: Arc<DeferredBindingProxy<SessionCredentialState>>,
        transport: Arc<dyn TokenTransport>,
        store: Arc<dyn SecureKeyValueStore>,
        near_expiry_leeway: std::time::Duration,
    ) -> Self {
        let leeway = Duration::from_std(near_expiry_leeway).unwrap_or_else(|_| Duration::zero());

        Self {
            inner: Arc::new(RenewalInner {
                credentials,
                transport,
                agent: MementoAgent::new(store, StoreSubjects::SESSION_IDENTITY),
                machine: Mutex::new(RenewalMachine::new()),
                last_failure: Mutex::new(None),
                in_flight: Mutex::new(None),
                next_renewal_id: AtomicU64::new(1),
                leeway,
            }),
        }
    }

    /// Install credentials from a login or a resumed snapshot and mark the
    /// session active.
    ///
    /// `install` runs while renewal is locked out, so a refresh that was in
    /// flight cannot overwrite what it installs. With a `persist_tag` the
    /// installed credentials are also snapshotted; the return value says
    /// whether that write succeeded.
    pub fn provision<F>(&self, install: F, persist_tag: Option<&str>) -> CredentialResult<bool>
    where
        F: FnOnce() -> CredentialResult<Arc<SessionCredentialState>>,
    {
        let mut machine = self.inner.machine.lock();
        let credentials = install()?;
        RenewalInner::transition(&mut machine, &RenewalMachineInput::Provisioned)?;
        self.inner.abandon_in_flight();
        *self.inner.last_failure.lock() = None;

        Ok(match persist_tag {
            Some(tag) => self.inner.persist(&credentials, tag),
            None => false,
        })
    }

    /// End the session: clear the in-memory credentials and delete the
    /// identity snapshot. A renewal still in flight is discarded when it
    /// returns.
    pub fn terminate(&self) -> CredentialResult<()> {
        let mut machine = self.inner.machine.lock();
        if *machine.state() != RenewalMachineState::Unauthenticated {
            RenewalInner::transition(&mut machine, &RenewalMachineInput::Terminated)?;
        }
        self.inner.abandon_in_flight();
        *self.inner.last_failure.lock() = None;

        if let Ok(credentials) = self.inner.credentials.get() {
            credentials.clear();
        }
        blocking(|| self.inner.agent.discard())?;
        Ok(())
    }

    /// Current renewal status, with the time-derived views resolved
    /// against the clock.
    pub fn status(&self) -> RenewalStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RenewalStatus {
        let machine = self.inner.machine.lock();
        match machine.state() {
            RenewalMachineState::Unauthenticated => RenewalStatus::Unauthenticated,
            RenewalMachineState::RefreshInFlight => RenewalStatus::RefreshInFlight,
            RenewalMachineState::RefreshTokenExpired => RenewalStatus::RefreshTokenExpired,
            RenewalMachineState::RefreshFailed => {
                if !self.inner.refresh_window_open(now) {
                    return RenewalStatus::RefreshTokenExpired;
                }
                let reason = self.inner.last_failure.lock().clone().unwrap_or_else(|| {
                    CredentialError::Unknown("renewal failed".to_string())
                });
                RenewalStatus::RefreshFailed(reason)
            }
            RenewalMachineState::Active => self.inner.active_status(now),
        }
    }

    /// An access token valid beyond the near-expiry leeway, renewing first
    /// if needed.
    pub async fn access_token(&self) -> CredentialResult<String> {
        let credentials = self.inner.credentials.get()?;
        if credentials.is_access_token_fresh(Utc::now(), self.inner.leeway) {
            if let Some(token) = credentials.access_token() {
                return Ok(token);
            }
        }

        Ok(self.renew().await?.access_token)
    }

    /// Refresh the access token.
    ///
    /// Fails with `ExpiredRefreshToken` without any network traffic once the
    /// refresh token is past its expiry. Joins the outstanding renewal when
    /// one is already in flight.
    pub async fn renew(&self) -> CredentialResult<RenewalOutcome> {
        let renewal = self.join_or_start()?;
        renewal.await
    }

    fn join_or_start(&self) -> CredentialResult<SharedRenewal> {
        let mut machine = self.inner.machine.lock();
        let mut slot = self.inner.in_flight.lock();
        if let Some(existing) = slot.as_ref() {
            debug!(renewal_id = existing.id, "Joining in-flight token renewal");
            return Ok(existing.renewal.clone());
        }

        let credentials = self.inner.credentials.get()?;
        let refresh_token = RenewalInner::begin(&mut machine, &credentials)?;
        let id = self.inner.next_renewal_id.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.perform(id, credentials, refresh_token).await;
            inner.release(id);
            outcome
        });

        let renewal = async move {
            task.await.unwrap_or_else(|e| {
                Err(CredentialError::Unknown(format!(
                    "renewal task failed: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            renewal: renewal.clone(),
        });
        Ok(renewal)
    }
}

impl RenewalInner {
    fn transition(
        machine: &mut RenewalMachine,
        input: &RenewalMachineInput,
    ) -> CredentialResult<()> {
        let old_state = machine.state().clone();

        machine.consume(input).map_err(|_| {
            CredentialError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                machine.state()
            ))
        })?;

        if old_state != *machine.state() {
            debug!(
                old_state = ?old_state,
                new_state = ?machine.state(),
                "Renewal state transition"
            );
        }
        Ok(())
    }

    fn owns_slot(&self, id: u64) -> bool {
        self.in_flight.lock().as_ref().is_some_and(|f| f.id == id)
    }

    /// Free the slot if renewal `id` still holds it.
    fn release(&self, id: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
    }

    /// Detach the current renewal; callers hold the `machine` lock.
    fn abandon_in_flight(&self) {
        if let Some(stale) = self.in_flight.lock().take() {
            debug!(renewal_id = stale.id, "Abandoning in-flight token renewal");
        }
    }

    fn refresh_window_open(&self, now: DateTime<Utc>) -> bool {
        self.credentials
            .get()
            .map(|credentials| credentials.is_refresh_token_usable(now))
            .unwrap_or(false)
    }

    fn active_status(&self, now: DateTime<Utc>) -> RenewalStatus {
        let Ok(credentials) = self.credentials.get() else {
            return RenewalStatus::Unauthenticated;
        };

        if !credentials.is_refresh_token_usable(now) {
            RenewalStatus::RefreshTokenExpired
        } else if credentials.is_access_token_fresh(now, self.leeway) {
            RenewalStatus::Fresh
        } else if credentials.is_access_token_fresh(now, Duration::zero()) {
            RenewalStatus::NearExpiry
        } else {
            RenewalStatus::Expired
        }
    }

    /// Validate that a renewal may start and move the machine in flight.
    fn begin(
        machine: &mut RenewalMachine,
        credentials: &SessionCredentialState,
    ) -> CredentialResult<String> {
        let now = Utc::now();

        let refresh_token = credentials
            .refresh_token()
            .ok_or_else(|| CredentialError::UnloadedEntry("refresh token".to_string()))?;

        if !credentials.is_refresh_token_usable(now) {
            if *machine.state() != RenewalMachineState::RefreshTokenExpired
                && Self::transition(machine, &RenewalMachineInput::RefreshWindowClosed).is_ok()
            {
                info!("Refresh token expired; a new login is required");
            }
            return Err(CredentialError::ExpiredRefreshToken);
        }

        Self::transition(machine, &RenewalMachineInput::RenewalStarted)?;
        Ok(refresh_token)
    }

    async fn perform(
        &self,
        id: u64,
        credentials: Arc<SessionCredentialState>,
        refresh_token: String,
    ) -> CredentialResult<RenewalOutcome> {
        info!(renewal_id = id, "Refreshing access token");

        let grant = match self.transport.refresh(&refresh_token).await {
            Ok(response) => response.into_grant(Utc::now()),
            Err(error) => Err(error),
        };

        match grant {
            Ok(grant) => self.complete(id, &credentials, grant),
            Err(error) => Err(self.fail(id, error)),
        }
    }

    fn complete(
        &self,
        id: u64,
        credentials: &SessionCredentialState,
        grant: RefreshGrant,
    ) -> CredentialResult<RenewalOutcome> {
        let mut machine = self.machine.lock();
        if !self.owns_slot(id) || *machine.state() != RenewalMachineState::RefreshInFlight {
            warn!(
                renewal_id = id,
                state = ?machine.state(),
                "Discarding renewal result; the session changed while it was in flight"
            );
            return Err(CredentialError::SessionEnded);
        }

        credentials.apply_refresh(&grant);
        Self::transition(&mut machine, &RenewalMachineInput::RenewalSucceeded)?;
        self.release(id);
        *self.last_failure.lock() = None;

        let persisted = self.persist(credentials, POST_REFRESH_TAG);

        info!(
            role = %grant.role,
            refresh_token_rotated = grant.rotated.is_some(),
            persisted,
            "Access token refreshed"
        );

        Ok(RenewalOutcome {
            access_token: grant.access_token,
            access_token_expires_at: grant.access_token_expires_at,
            role: grant.role,
            refresh_token_rotated: grant.rotated.is_some(),
            persisted,
        })
    }

    fn fail(&self, id: u64, error: CredentialError) -> CredentialError {
        let mut machine = self.machine.lock();
        if self.owns_slot(id)
            && *machine.state() == RenewalMachineState::RefreshInFlight
            && Self::transition(&mut machine, &RenewalMachineInput::RenewalFailed).is_ok()
        {
            self.release(id);
            *self.last_failure.lock() = Some(error.clone());
        }

        warn!(error = %error, "Token renewal failed");
        error
    }

    fn persist(&self, credentials: &SessionCredentialState, tag: &str) -> bool {
        match blocking(|| self.agent.take_snapshot(credentials, Some(tag))) {
            Ok(_) => true,
            Err(error) => {
                warn!(
                    subject = %self.agent.subject(),
                    error = %error,
                    "Could not persist session credentials; in-memory session stays valid"
                );
                false
            }
        }
    }
}

/// Run a blocking store call. On a multi-threaded runtime the worker hands its
/// other tasks off first; elsewhere the call runs inline.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TokenExchangeResponse, TokenRefreshResponse, TokenGrant};
    use async_trait::async_trait;
    use desk_storage::{EntryReader, MemoryStore};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        calls: AtomicUsize,
        response: CredentialResult<TokenRefreshResponse>,
    }

    impl ScriptedTransport {
        fn new(response: CredentialResult<TokenRefreshResponse>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response,
            })
        }
    }

    #[async_trait]
    impl TokenTransport for ScriptedTransport {
        async fn exchange_code(&self, _code: &str) -> CredentialResult<TokenExchangeResponse> {
            Err(CredentialError::Unknown("not scripted".to_string()))
        }

        async fn refresh(&self, _refresh_token: &str) -> CredentialResult<TokenRefreshResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn refreshed() -> TokenRefreshResponse {
        TokenRefreshResponse {
            access_token: "tok_b".to_string(),
            access_expiry_interval: 900,
            role_scope: Role::Crew,
            refresh_token: None,
            refresh_expiry_interval: None,
        }
    }

    fn grant(access_in: Duration, refresh_in: Duration) -> TokenGrant {
        let now = Utc::now();
        TokenGrant {
            access_token: "tok_a".to_string(),
            access_token_expires_at: now + access_in,
            refresh_token: "ref_a".to_string(),
            refresh_token_expires_at: now + refresh_in,
            role: Role::Member,
            capabilities: BTreeSet::new(),
            specialties: Vec::new(),
        }
    }

    struct Fixture {
        coordinator: TokenRenewalCoordinator,
        proxy: Arc<DeferredBindingProxy<SessionCredentialState>>,
        store: Arc<MemoryStore>,
    }

    fn fixture(transport: Arc<ScriptedTransport>, grant: TokenGrant) -> Fixture {
        let proxy = Arc::new(DeferredBindingProxy::new());
        let store = Arc::new(MemoryStore::new());
        let coordinator = TokenRenewalCoordinator::new(
            proxy.clone(),
            transport,
            store.clone(),
            std::time::Duration::from_secs(60),
        );

        let state = Arc::new(SessionCredentialState::from_exchange(&grant));
        coordinator
            .provision(
                || {
                    proxy.bind(state.clone())?;
                    Ok(state)
                },
                None,
            )
            .unwrap();

        Fixture {
            coordinator,
            proxy,
            store,
        }
    }

    #[tokio::test]
    async fn test_renew_updates_state_and_persists() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport.clone(), grant(Duration::seconds(10), Duration::days(30)));

        let outcome = fx.coordinator.renew().await.unwrap();

        assert_eq!(outcome.access_token, "tok_b");
        assert_eq!(outcome.role, Role::Crew);
        assert!(!outcome.refresh_token_rotated);
        assert!(outcome.persisted);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let state = fx.proxy.get().unwrap();
        assert_eq!(state.access_token().as_deref(), Some("tok_b"));
        assert_eq!(state.refresh_token().as_deref(), Some("ref_a"));
        assert!(fx.store.exists(StoreSubjects::SESSION_IDENTITY).unwrap());
        assert_eq!(fx.coordinator.status(), RenewalStatus::Fresh);
    }

    #[tokio::test]
    async fn test_expired_refresh_token_short_circuits() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport.clone(), grant(-Duration::seconds(10), -Duration::seconds(1)));

        let err = fx.coordinator.renew().await.unwrap_err();

        assert_eq!(err, CredentialError::ExpiredRefreshToken);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.coordinator.status(), RenewalStatus::RefreshTokenExpired);

        // Still no network traffic on a second attempt.
        assert!(fx.coordinator.renew().await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_state_unchanged() {
        let transport =
            ScriptedTransport::new(Err(CredentialError::Unreachable("offline".to_string())));
        let fx = fixture(transport, grant(Duration::seconds(10), Duration::days(30)));

        let err = fx.coordinator.renew().await.unwrap_err();

        assert!(err.is_transient());
        let state = fx.proxy.get().unwrap();
        assert_eq!(state.access_token().as_deref(), Some("tok_a"));
        assert_eq!(
            fx.coordinator.status(),
            RenewalStatus::RefreshFailed(CredentialError::Unreachable("offline".to_string()))
        );
        assert!(!fx.store.exists(StoreSubjects::SESSION_IDENTITY).unwrap());
    }

    #[tokio::test]
    async fn test_forbidden_requires_reauthentication() {
        let transport = ScriptedTransport::new(Err(CredentialError::Forbidden("revoked".into())));
        let fx = fixture(transport, grant(Duration::seconds(10), Duration::days(30)));

        let err = fx.coordinator.renew().await.unwrap_err();

        assert!(err.requires_reauthentication());
        assert!(!fx.coordinator.status().is_usable());
    }

    #[tokio::test]
    async fn test_access_token_skips_network_when_fresh() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport.clone(), grant(Duration::seconds(900), Duration::days(30)));

        assert_eq!(fx.coordinator.access_token().await.unwrap(), "tok_a");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_access_token_renews_inside_leeway() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport.clone(), grant(Duration::seconds(30), Duration::days(30)));
        assert_eq!(fx.coordinator.status(), RenewalStatus::NearExpiry);

        assert_eq!(fx.coordinator.access_token().await.unwrap(), "tok_b");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_reports_expired_access_token() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport, grant(-Duration::seconds(1), Duration::days(30)));
        assert_eq!(fx.coordinator.status(), RenewalStatus::Expired);
        assert!(fx.coordinator.status().is_usable());
    }

    #[tokio::test]
    async fn test_terminate_clears_state_and_snapshot() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport, grant(Duration::seconds(10), Duration::days(30)));
        fx.coordinator.renew().await.unwrap();

        fx.coordinator.terminate().unwrap();

        assert_eq!(fx.coordinator.status(), RenewalStatus::Unauthenticated);
        assert!(!fx.proxy.get().unwrap().is_loaded());
        assert!(!fx.store.exists(StoreSubjects::SESSION_IDENTITY).unwrap());
        assert!(matches!(
            fx.coordinator.renew().await,
            Err(CredentialError::UnloadedEntry(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_renew_persists_on_multi_thread_runtime() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport, grant(Duration::seconds(10), Duration::days(30)));

        let outcome = fx.coordinator.renew().await.unwrap();

        assert!(outcome.persisted);
        assert!(fx.store.exists(StoreSubjects::SESSION_IDENTITY).unwrap());
    }

    #[tokio::test]
    async fn test_reprovision_detaches_in_flight_slot() {
        let transport = ScriptedTransport::new(Ok(refreshed()));
        let fx = fixture(transport.clone(), grant(Duration::seconds(10), Duration::days(30)));

        let stale = fx.coordinator.join_or_start().unwrap();
        let state = fx.proxy.get().unwrap();
        fx.coordinator.provision(|| Ok(state), None).unwrap();
        assert!(fx.coordinator.inner.in_flight.lock().is_none());

        assert_eq!(stale.await.unwrap_err(), CredentialError::SessionEnded);
        let fresh = fx.coordinator.renew().await.unwrap();
        assert_eq!(fresh.access_token, "tok_b");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_renew_unbound_fails() {
        let coordinator = TokenRenewalCoordinator::new(
            Arc::new(DeferredBindingProxy::new()),
            ScriptedTransport::new(Ok(refreshed())),
            Arc::new(MemoryStore::new()),
            std::time::Duration::from_secs(60),
        );

        assert_eq!(coordinator.renew().await.unwrap_err(), CredentialError::Unbound);
        assert_eq!(coordinator.status(), RenewalStatus::Unauthenticated);
    }
}
