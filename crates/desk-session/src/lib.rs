//! # desk-session
//!
//! Session credential lifecycle for the service desk client.
//!
//! This crate provides:
//! - Authorization-code exchange and token refresh over HTTP
//! - Single-flight access token renewal backed by an explicit state machine
//! - Snapshots of credentials and endpoint in the platform secure store
//! - Cold-start verification of a persisted session
//!
//! ## Architecture
//!
//! - [`SessionManager`] is the façade application code uses.
//! - [`TokenRenewalCoordinator`] is the only writer of credentials after login.
//! - [`MementoAgent`] persists any [`Snapshotable`] target under one store
//!   subject, encoded by [`SnapshotCodec`].
//! - [`DeferredBindingProxy`] lets consumers hold the credential state before
//!   login has created it.
//! - [`BootstrapVerifier`] decides at startup between resume and enrollment.

mod bootstrap;
mod codec;
mod endpoint;
mod error;
mod memento;
mod proxy;
mod renewal;
mod renewal_fsm;
mod session;
mod snapshot;
mod state;
mod transport;

pub use bootstrap::BootstrapVerifier;
pub use codec::{CredentialSnapshotCodec, EndpointSnapshotCodec, SnapshotCodec};
pub use endpoint::EndpointState;
pub use error::{BootstrapError, CredentialError, CredentialResult};
pub use memento::MementoAgent;
pub use proxy::DeferredBindingProxy;
pub use renewal::{RenewalOutcome, TokenRenewalCoordinator};
pub use renewal_fsm::{RenewalMachine, RenewalMachineInput, RenewalMachineState, RenewalStatus};
pub use session::{LoginOutcome, ResumeOutcome, SessionManager};
pub use snapshot::{
    CredentialSnapshot, EndpointSnapshot, Role, Snapshot, SnapshotMetadata, Snapshotable,
    Specialty, POST_ENROLL_TAG, POST_REFRESH_TAG, POST_SUBMIT_TAG,
};
pub use state::SessionCredentialState;
pub use transport::{
    HttpTokenClient, RefreshGrant, RotatedRefreshToken, TokenExchangeResponse, TokenGrant,
    TokenRefreshResponse, TokenTransport,
};
