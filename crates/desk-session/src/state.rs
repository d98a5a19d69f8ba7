//! In-memory session credentials.
//!
//! Readers interleave freely; every mutation and every capture or restore
//! takes the write side of one lock. The lock is never held across an await.

use crate::snapshot::{CredentialSnapshot, Role, Snapshot, SnapshotMetadata, Snapshotable, Specialty};
use crate::transport::{RefreshGrant, TokenGrant};
use crate::{CredentialError, CredentialResult};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Default)]
struct Credentials {
    access_token: Option<String>,
    access_token_expires_at: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
    refresh_token_expires_at: Option<DateTime<Utc>>,
    role: Option<Role>,
    capabilities: BTreeSet<String>,
    specialties: Vec<Specialty>,
}

impl Credentials {
    fn set_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }

    fn set_access_token_expires_at(&mut self, at: DateTime<Utc>) {
        self.access_token_expires_at = Some(at);
    }

    fn set_refresh_token(&mut self, token: String) {
        self.refresh_token = Some(token);
    }

    fn set_refresh_token_expires_at(&mut self, at: DateTime<Utc>) {
        self.refresh_token_expires_at = Some(at);
    }

    fn set_role(&mut self, role: Role) {
        self.role = Some(role);
    }

    fn set_capabilities(&mut self, capabilities: BTreeSet<String>) {
        self.capabilities = capabilities;
    }

    fn set_specialties(&mut self, specialties: Vec<Specialty>) {
        self.specialties = specialties;
    }

    fn apply_exchange(&mut self, grant: &TokenGrant) {
        self.set_access_token(grant.access_token.clone());
        self.set_access_token_expires_at(grant.access_token_expires_at);
        self.set_refresh_token(grant.refresh_token.clone());
        self.set_refresh_token_expires_at(grant.refresh_token_expires_at);
        self.set_role(grant.role);
        self.set_capabilities(grant.capabilities.clone());
        self.set_specialties(grant.specialties.clone());
    }
}

/// The live credential set for the signed-in user.
///
/// Outside this crate fields change one at a time through the named setters.
/// Whole grants are applied only by login and renewal:
///
/// ```compile_fail
/// use desk_session::{SessionCredentialState, TokenGrant};
///
/// fn replace_all(state: &SessionCredentialState, grant: &TokenGrant) {
///     state.apply_exchange(grant);
/// }
/// ```
#[derive(Default)]
pub struct SessionCredentialState {
    inner: RwLock<Credentials>,
}

impl SessionCredentialState {
    /// An empty state; nothing can be captured until it is populated.
    pub fn new() -> Self {
        Self::default()
    }

    /// State populated from a code exchange.
    pub fn from_exchange(grant: &TokenGrant) -> Self {
        let mut credentials = Credentials::default();
        credentials.apply_exchange(grant);
        Self {
            inner: RwLock::new(credentials),
        }
    }

    /// State populated from a decoded snapshot.
    pub fn from_snapshot(snapshot: &CredentialSnapshot) -> CredentialResult<Self> {
        let state = Self::new();
        state.restore_snapshot(snapshot)?;
        Ok(state)
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.read().access_token.clone()
    }

    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().access_token_expires_at
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.read().refresh_token.clone()
    }

    pub fn refresh_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().refresh_token_expires_at
    }

    pub fn role(&self) -> Option<Role> {
        self.inner.read().role
    }

    pub fn capabilities(&self) -> BTreeSet<String> {
        self.inner.read().capabilities.clone()
    }

    pub fn specialties(&self) -> Vec<Specialty> {
        self.inner.read().specialties.clone()
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.inner.write().set_access_token(token.into());
    }

    pub fn set_access_token_expires_at(&self, at: DateTime<Utc>) {
        self.inner.write().set_access_token_expires_at(at);
    }

    pub fn set_refresh_token(&self, token: impl Into<String>) {
        self.inner.write().set_refresh_token(token.into());
    }

    pub fn set_refresh_token_expires_at(&self, at: DateTime<Utc>) {
        self.inner.write().set_refresh_token_expires_at(at);
    }

    pub fn set_role(&self, role: Role) {
        self.inner.write().set_role(role);
    }

    pub fn set_capabilities(&self, capabilities: BTreeSet<String>) {
        self.inner.write().set_capabilities(capabilities);
    }

    pub fn set_specialties(&self, specialties: Vec<Specialty>) {
        self.inner.write().set_specialties(specialties);
    }

    /// Replace every field with a fresh code exchange result.
    pub(crate) fn apply_exchange(&self, grant: &TokenGrant) {
        self.inner.write().apply_exchange(grant);
    }

    /// Apply a refresh result in one critical section.
    ///
    /// The refresh token and its expiry change only when the server rotated
    /// them; capabilities and specialties are left alone.
    pub(crate) fn apply_refresh(&self, grant: &RefreshGrant) {
        let mut credentials = self.inner.write();
        credentials.set_access_token(grant.access_token.clone());
        credentials.set_access_token_expires_at(grant.access_token_expires_at);
        credentials.set_role(grant.role);
        if let Some(rotated) = &grant.rotated {
            credentials.set_refresh_token(rotated.token.clone());
            credentials.set_refresh_token_expires_at(rotated.expires_at);
        }
    }

    /// Drop every field.
    pub fn clear(&self) {
        *self.inner.write() = Credentials::default();
    }

    /// True once an access token and its expiry are both present.
    pub fn is_loaded(&self) -> bool {
        let credentials = self.inner.read();
        credentials.access_token.is_some() && credentials.access_token_expires_at.is_some()
    }

    /// True if the access token stays valid for more than `leeway` past `now`.
    pub fn is_access_token_fresh(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        let credentials = self.inner.read();
        match (&credentials.access_token, credentials.access_token_expires_at) {
            (Some(_), Some(expires_at)) => expires_at
                .checked_sub_signed(leeway)
                .is_some_and(|fresh_until| fresh_until > now),
            _ => false,
        }
    }

    pub fn is_refresh_token_usable(&self, now: DateTime<Utc>) -> bool {
        let credentials = self.inner.read();
        match (&credentials.refresh_token, credentials.refresh_token_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now,
            _ => false,
        }
    }

    /// Value for the `Authorization` header.
    pub fn bearer_header(&self) -> CredentialResult<String> {
        self.access_token()
            .map(|token| format!("Bearer {}", token))
            .ok_or_else(|| CredentialError::UnloadedEntry("access token".to_string()))
    }
}

impl Snapshotable<CredentialSnapshot> for SessionCredentialState {
    fn capture_snapshot(&self) -> CredentialResult<CredentialSnapshot> {
        let credentials = self.inner.write();
        let missing = |field: &str| CredentialError::UnloadedEntry(field.to_string());

        Ok(CredentialSnapshot {
            meta: SnapshotMetadata::stamp(None, CredentialSnapshot::SCHEMA_VERSION),
            access_token: credentials
                .access_token
                .clone()
                .ok_or_else(|| missing("access token"))?,
            access_token_expires_at: credentials
                .access_token_expires_at
                .ok_or_else(|| missing("access token expiry"))?,
            refresh_token: credentials
                .refresh_token
                .clone()
                .ok_or_else(|| missing("refresh token"))?,
            refresh_token_expires_at: credentials
                .refresh_token_expires_at
                .ok_or_else(|| missing("refresh token expiry"))?,
            role: credentials.role.ok_or_else(|| missing("role"))?,
            capabilities: credentials.capabilities.clone(),
            specialties: credentials.specialties.clone(),
        })
    }

    fn restore_snapshot(&self, snapshot: &CredentialSnapshot) -> CredentialResult<()> {
        if snapshot.access_token.is_empty() {
            return Err(CredentialError::RejectedSnapshot(
                "access token is empty".to_string(),
            ));
        }
        if snapshot.refresh_token.is_empty() {
            return Err(CredentialError::RejectedSnapshot(
                "refresh token is empty".to_string(),
            ));
        }

        let mut credentials = self.inner.write();
        credentials.set_access_token(snapshot.access_token.clone());
        credentials.set_access_token_expires_at(snapshot.access_token_expires_at);
        credentials.set_refresh_token(snapshot.refresh_token.clone());
        credentials.set_refresh_token_expires_at(snapshot.refresh_token_expires_at);
        credentials.set_role(snapshot.role);
        credentials.set_capabilities(snapshot.capabilities.clone());
        credentials.set_specialties(snapshot.specialties.clone());
        Ok(())
    }
}

impl fmt::Debug for SessionCredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credentials = self.inner.read();
        f.debug_struct("SessionCredentialState")
            .field("access_token", &credentials.access_token.as_ref().map(|_| "<redacted>"))
            .field("access_token_expires_at", &credentials.access_token_expires_at)
            .field("refresh_token", &credentials.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token_expires_at", &credentials.refresh_token_expires_at)
            .field("role", &credentials.role)
            .finish()
    }
}
