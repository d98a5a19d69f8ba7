//! Token renewal state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │ Unauthenticated │ (initial)
//! └────────┬────────┘
//!          │ Provisioned
//!          ▼
//! ┌─────────────────┐  RenewalStarted   ┌─────────────────┐
//! │     Active      │ ────────────────► │ RefreshInFlight │
//! │ (Fresh /        │ ◄──────────────── │                 │
//! │  NearExpiry /   │  RenewalSucceeded └────────┬────────┘
//! │  Expired)       │                            │ RenewalFailed
//! └────────┬────────┘                            ▼
//!          │ RefreshWindowClosed        ┌─────────────────┐
//!          ▼                            │  RefreshFailed  │
//! ┌─────────────────────┐               └─────────────────┘
//! │ RefreshTokenExpired │ (terminal until Provisioned)
//! └─────────────────────┘
//!
//! Terminated returns every state to Unauthenticated. Provisioned (a new
//! login) returns every state to Active.
//! ```

use crate::CredentialError;
use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub renewal_machine(Unauthenticated)

    Unauthenticated => {
        Provisioned => Active
    },
    Active => {
        Provisioned => Active,
        RenewalStarted => RefreshInFlight,
        RefreshWindowClosed => RefreshTokenExpired,
        Terminated => Unauthenticated
    },
    RefreshInFlight => {
        Provisioned => Active,
        RenewalSucceeded => Active,
        RenewalFailed => RefreshFailed,
        Terminated => Unauthenticated
    },
    RefreshFailed => {
        Provisioned => Active,
        RenewalStarted => RefreshInFlight,
        RefreshWindowClosed => RefreshTokenExpired,
        Terminated => Unauthenticated
    },
    RefreshTokenExpired => {
        Provisioned => Active,
        Terminated => Unauthenticated
    }
}

pub use renewal_machine::Input as RenewalMachineInput;
pub use renewal_machine::State as RenewalMachineState;
pub use renewal_machine::StateMachine as RenewalMachine;

/// Externally visible renewal status.
///
/// `Fresh`, `NearExpiry`, and `Expired` are time-derived views of the
/// machine's `Active` state.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalStatus {
    /// No credentials have been provisioned.
    Unauthenticated,
    /// Access token valid beyond the near-expiry leeway.
    Fresh,
    /// Access token still valid but inside the leeway.
    NearExpiry,
    /// Access token past its expiry; the refresh token is still usable.
    Expired,
    /// A refresh request is outstanding.
    RefreshInFlight,
    /// The last refresh failed for the given reason.
    RefreshFailed(CredentialError),
    /// The refresh token is past its expiry. Only a new login recovers.
    RefreshTokenExpired,
}

impl RenewalStatus {
    /// Returns true if an access token can still be produced without a new
    /// login.
    pub fn is_usable(&self) -> bool {
        match self {
            RenewalStatus::Fresh
            | RenewalStatus::NearExpiry
            | RenewalStatus::Expired
            | RenewalStatus::RefreshInFlight => true,
            RenewalStatus::RefreshFailed(reason) => !reason.requires_reauthentication(),
            RenewalStatus::Unauthenticated | RenewalStatus::RefreshTokenExpired => false,
        }
    }

    /// Returns true for statuses only a new login can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenewalStatus::RefreshTokenExpired)
    }
}
