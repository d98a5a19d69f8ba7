//! Storage subject constants.

/// Well-known subjects for entries persisted by the client.
///
/// The write path and the read path must use the same constant.
pub struct StoreSubjects;

impl StoreSubjects {
    /// Onboarding service snapshot.
    pub const ONBOARDING_SERVICE: &'static str = "app.servicedesk.onboarding";

    /// Session identity snapshot (tokens, role, capabilities).
    pub const SESSION_IDENTITY: &'static str = "app.servicedesk.session-identity";

    /// Networking client snapshot (service endpoint).
    pub const NETWORKING_CLIENT: &'static str = "app.servicedesk.networking-client";

    /// Every subject the client may write.
    pub const ALL: [&'static str; 3] = [
        Self::ONBOARDING_SERVICE,
        Self::SESSION_IDENTITY,
        Self::NETWORKING_CLIENT,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_store_subjects_constants() {
        for subject in StoreSubjects::ALL {
            assert!(!subject.is_empty());
        }

        let unique: HashSet<_> = StoreSubjects::ALL.iter().collect();
        assert_eq!(unique.len(), StoreSubjects::ALL.len(), "Store subjects must be unique");
    }
}
