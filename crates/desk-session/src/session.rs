//! Session lifecycle façade: resume, login, authorized requests, logout.
//!
//! `SessionManager` wires the store, the endpoint, the credential state, and
//! the renewal coordinator together. Application code talks to this type
//! only; the pieces behind it stay testable on their own.

use crate::bootstrap::BootstrapVerifier;
use crate::endpoint::EndpointState;
use crate::memento::MementoAgent;
use crate::proxy::DeferredBindingProxy;
use crate::renewal::TokenRenewalCoordinator;
use crate::renewal_fsm::RenewalStatus;
use crate::snapshot::{EndpointSnapshot, Role, Snapshotable, POST_ENROLL_TAG, POST_SUBMIT_TAG};
use crate::state::SessionCredentialState;
use crate::transport::{HttpTokenClient, TokenGrant, TokenTransport};
use crate::{BootstrapError, CredentialError, CredentialResult};
use chrono::Utc;
use desk_config_and_utils::Config;
use desk_storage::{EntryRemover, SecureKeyValueStore, StoreSubjects};
use reqwest::RequestBuilder;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What startup should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// The persisted session was loaded.
    Resumed { role: Role },
    /// Snapshots decode but the refresh token is past its expiry.
    ReauthenticationRequired,
    /// Nothing usable was persisted; run enrollment.
    EnrollmentRequired(BootstrapError),
}

/// Result of a successful code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub role: Role,
    /// False when either snapshot could not be written.
    pub persisted: bool,
}

/// Session manager for the signed-in user.
pub struct SessionManager {
    store: Arc<dyn SecureKeyValueStore>,
    endpoint: Arc<EndpointState>,
    endpoint_agent: MementoAgent<EndpointState, EndpointSnapshot>,
    credentials: Arc<DeferredBindingProxy<SessionCredentialState>>,
    transport: Arc<dyn TokenTransport>,
    coordinator: TokenRenewalCoordinator,
}

impl SessionManager {
    /// Create a session manager over the platform secure store, namespaced
    /// by `config.keychain_service`.
    pub fn from_config(config: &Config) -> CredentialResult<Self> {
        let store: Arc<dyn SecureKeyValueStore> =
            Arc::from(desk_storage::create_store(&config.keychain_service)?);
        Self::new(config, store)
    }

    /// Create a session manager talking HTTP to the enrolled endpoint, or to
    /// `config.service_url` until one is enrolled.
    pub fn new(config: &Config, store: Arc<dyn SecureKeyValueStore>) -> CredentialResult<Self> {
        let endpoint = Arc::new(EndpointState::with_fallback(&config.service_url)?);
        let transport = Arc::new(HttpTokenClient::new(
            endpoint.clone(),
            config.request_timeout(),
        )?);

        Ok(Self::with_transport(
            store,
            endpoint,
            transport,
            config.near_expiry_leeway(),
        ))
    }

    /// Create a session manager with a custom transport.
    pub fn with_transport(
        store: Arc<dyn SecureKeyValueStore>,
        endpoint: Arc<EndpointState>,
        transport: Arc<dyn TokenTransport>,
        near_expiry_leeway: std::time::Duration,
    ) -> Self {
        let credentials = Arc::new(DeferredBindingProxy::new());
        let coordinator = TokenRenewalCoordinator::new(
            credentials.clone(),
            transport.clone(),
            store.clone(),
            near_expiry_leeway,
        );

        Self {
            endpoint_agent: MementoAgent::new(store.clone(), StoreSubjects::NETWORKING_CLIENT),
            store,
            endpoint,
            credentials,
            transport,
            coordinator,
        }
    }

    /// Load the persisted session, if there is a usable one.
    ///
    /// Returns `EnrollmentRequired` when bootstrap verification fails or a
    /// decoded snapshot is refused on restore; the store is left as it was
    /// so enrollment can overwrite it.
    pub fn resume(&self) -> CredentialResult<ResumeOutcome> {
        let verifier = BootstrapVerifier::new(self.store.clone());
        let (identity, endpoint) = match verifier.verify_bootstrapped() {
            Ok(snapshots) => snapshots,
            Err(error) => {
                info!(
                    subject = %error.subject(),
                    error = %error,
                    "No resumable session; enrollment required"
                );
                return Ok(ResumeOutcome::EnrollmentRequired(error));
            }
        };

        if !identity.is_usable(Utc::now()) {
            info!("Persisted refresh token has expired; login required");
            return Ok(ResumeOutcome::ReauthenticationRequired);
        }

        if let Err(error) = self.endpoint.restore_snapshot(&endpoint) {
            return Ok(Self::rejected(StoreSubjects::NETWORKING_CLIENT, error));
        }
        let provisioned = self.coordinator.provision(
            || {
                let state = Arc::new(SessionCredentialState::from_snapshot(&identity)?);
                self.install(state)
            },
            None,
        );
        match provisioned {
            Ok(_) => {}
            Err(error @ CredentialError::RejectedSnapshot(_)) => {
                return Ok(Self::rejected(StoreSubjects::SESSION_IDENTITY, error));
            }
            Err(error) => return Err(error),
        }

        info!(role = %identity.role, snapshot_id = %identity.meta.id, "Session resumed");
        Ok(ResumeOutcome::Resumed {
            role: identity.role,
        })
    }

    /// Enroll `base_url` and exchange a one-time authorization code for
    /// session credentials.
    pub async fn login_with_code(
        &self,
        base_url: &str,
        code: &str,
    ) -> CredentialResult<LoginOutcome> {
        if code.trim().is_empty() {
            return Err(CredentialError::IllegalArgument(
                "authorization code must not be empty".to_string(),
            ));
        }
        self.endpoint.set_base_url(base_url)?;

        info!("Exchanging authorization code");
        let response = self.transport.exchange_code(code.trim()).await?;
        let grant = response.into_grant(Utc::now())?;
        let role = grant.role;

        let endpoint_persisted = match self
            .endpoint_agent
            .take_snapshot(&self.endpoint, Some(POST_ENROLL_TAG))
        {
            Ok(_) => true,
            Err(error) => {
                warn!(error = %error, "Could not persist service endpoint");
                false
            }
        };

        let identity_persisted = self
            .coordinator
            .provision(|| self.install_grant(&grant), Some(POST_SUBMIT_TAG))?;

        info!(role = %role, "Login complete");
        Ok(LoginOutcome {
            role,
            persisted: endpoint_persisted && identity_persisted,
        })
    }

    /// An access token valid beyond the near-expiry leeway.
    pub async fn valid_access_token(&self) -> CredentialResult<String> {
        self.coordinator.access_token().await
    }

    /// Attach `Authorization: Bearer <token>` to an outgoing request.
    pub async fn authorize(&self, request: RequestBuilder) -> CredentialResult<RequestBuilder> {
        let token = self.valid_access_token().await?;
        Ok(request.bearer_auth(token))
    }

    pub fn status(&self) -> RenewalStatus {
        self.coordinator.status()
    }

    /// True while an access token can be produced without a new login.
    pub fn is_session_usable(&self) -> bool {
        self.status().is_usable()
    }

    /// The bound credential state. Fails with `Unbound` before the first
    /// login or resume.
    pub fn credentials(&self) -> CredentialResult<Arc<SessionCredentialState>> {
        self.credentials.get()
    }

    pub fn role(&self) -> Option<Role> {
        self.credentials.get().ok().and_then(|state| state.role())
    }

    pub fn endpoint(&self) -> &Arc<EndpointState> {
        &self.endpoint
    }

    /// The renewal coordinator, for callers that drive renewal directly.
    pub fn coordinator(&self) -> &TokenRenewalCoordinator {
        &self.coordinator
    }

    /// Sign out: clear credentials and delete the identity and onboarding
    /// entries. The enrolled endpoint is kept.
    pub fn logout(&self) -> CredentialResult<()> {
        self.coordinator.terminate()?;

        match self.store.delete(StoreSubjects::ONBOARDING_SERVICE) {
            Ok(()) => debug!("Onboarding entry removed"),
            Err(e) if e.is_missing() => {}
            Err(e) => return Err(e.into()),
        }

        info!("Logged out");
        Ok(())
    }

    fn rejected(subject: &str, error: CredentialError) -> ResumeOutcome {
        let error = BootstrapError::classify(subject, error);
        warn!(
            subject = %error.subject(),
            error = %error,
            "Persisted snapshot rejected; enrollment required"
        );
        ResumeOutcome::EnrollmentRequired(error)
    }

    fn install_grant(&self, grant: &TokenGrant) -> CredentialResult<Arc<SessionCredentialState>> {
        if let Ok(state) = self.credentials.get() {
            state.apply_exchange(grant);
            return Ok(state);
        }
        self.install(Arc::new(SessionCredentialState::from_exchange(grant)))
    }

    /// Bind `state`, or copy it into the already-bound state.
    fn install(
        &self,
        state: Arc<SessionCredentialState>,
    ) -> CredentialResult<Arc<SessionCredentialState>> {
        match self.credentials.bind(state.clone()) {
            Ok(()) => Ok(state),
            Err(CredentialError::AlreadyBound) => {
                let bound = self.credentials.get()?;
                bound.restore_snapshot(&state.capture_snapshot()?)?;
                Ok(bound)
            }
            Err(e) => Err(e),
        }
    }
}
