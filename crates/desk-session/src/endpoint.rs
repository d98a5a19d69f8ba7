//! Networking client endpoint.

use crate::snapshot::{EndpointSnapshot, Snapshot, SnapshotMetadata, Snapshotable};
use crate::{CredentialError, CredentialResult};
use parking_lot::RwLock;
use url::Url;

/// Base URL of the service the client talks to, chosen at enrollment.
#[derive(Debug, Default)]
pub struct EndpointState {
    base_url: RwLock<Option<Url>>,
    /// Answered by [`base_url`](Self::base_url) until one is enrolled.
    fallback: Option<Url>,
}

fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("invalid base url {:?}: {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme {:?}", other)),
    }
}

impl EndpointState {
    pub fn new() -> Self {
        Self::default()
    }

    /// An endpoint that uses `fallback` until a base URL is enrolled.
    pub fn with_fallback(fallback: &str) -> CredentialResult<Self> {
        let fallback = parse_base_url(fallback).map_err(CredentialError::IllegalArgument)?;
        Ok(Self {
            base_url: RwLock::new(None),
            fallback: Some(fallback),
        })
    }

    /// Set the base URL. Only `http` and `https` URLs are accepted.
    pub fn set_base_url(&self, raw: &str) -> CredentialResult<()> {
        let url = parse_base_url(raw).map_err(CredentialError::IllegalArgument)?;
        *self.base_url.write() = Some(url);
        Ok(())
    }

    /// The enrolled base URL, or the fallback when nothing is enrolled.
    pub fn base_url(&self) -> Option<Url> {
        self.base_url
            .read()
            .clone()
            .or_else(|| self.fallback.clone())
    }

    pub fn is_enrolled(&self) -> bool {
        self.base_url.read().is_some()
    }
}

impl Snapshotable<EndpointSnapshot> for EndpointState {
    fn capture_snapshot(&self) -> CredentialResult<EndpointSnapshot> {
        let base_url = self
            .base_url
            .read()
            .as_ref()
            .map(|url| url.to_string())
            .ok_or_else(|| CredentialError::UnloadedEntry("base url".to_string()))?;

        Ok(EndpointSnapshot {
            meta: SnapshotMetadata::stamp(None, EndpointSnapshot::SCHEMA_VERSION),
            base_url,
        })
    }

    fn restore_snapshot(&self, snapshot: &EndpointSnapshot) -> CredentialResult<()> {
        let url = parse_base_url(&snapshot.base_url).map_err(CredentialError::RejectedSnapshot)?;
        *self.base_url.write() = Some(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_base_url() {
        let endpoint = EndpointState::new();
        assert!(!endpoint.is_enrolled());

        endpoint.set_base_url("https://desk.example.com").unwrap();
        assert!(endpoint.is_enrolled());
        assert_eq!(endpoint.base_url().unwrap().host_str(), Some("desk.example.com"));
    }

    #[test]
    fn test_set_base_url_rejects_garbage() {
        let endpoint = EndpointState::new();
        assert!(matches!(
            endpoint.set_base_url("not a url"),
            Err(CredentialError::IllegalArgument(_))
        ));
        assert!(matches!(
            endpoint.set_base_url("ftp://desk.example.com"),
            Err(CredentialError::IllegalArgument(_))
        ));
        assert!(!endpoint.is_enrolled());
    }

    #[test]
    fn test_fallback_until_enrolled() {
        let endpoint = EndpointState::with_fallback("https://api.example.com").unwrap();
        assert!(!endpoint.is_enrolled());
        assert_eq!(endpoint.base_url().unwrap().host_str(), Some("api.example.com"));
        assert!(endpoint.capture_snapshot().is_err());

        endpoint.set_base_url("https://desk.example.com").unwrap();
        assert!(endpoint.is_enrolled());
        assert_eq!(endpoint.base_url().unwrap().host_str(), Some("desk.example.com"));

        assert!(matches!(
            EndpointState::with_fallback("ftp://api.example.com"),
            Err(CredentialError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_capture_requires_url() {
        let endpoint = EndpointState::new();
        assert!(matches!(
            endpoint.capture_snapshot(),
            Err(CredentialError::UnloadedEntry(_))
        ));
    }

    #[test]
    fn test_capture_then_restore() {
        let endpoint = EndpointState::new();
        endpoint.set_base_url("https://desk.example.com/tenant").unwrap();
        let snapshot = endpoint.capture_snapshot().unwrap();

        let restored = EndpointState::new();
        restored.restore_snapshot(&snapshot).unwrap();
        assert_eq!(restored.base_url(), endpoint.base_url());
    }

    #[test]
    fn test_restore_rejects_invalid_url() {
        let snapshot = EndpointSnapshot {
            meta: SnapshotMetadata::stamp(None, "1"),
            base_url: "::".to_string(),
        };
        let endpoint = EndpointState::new();
        assert!(matches!(
            endpoint.restore_snapshot(&snapshot),
            Err(CredentialError::RejectedSnapshot(_))
        ));
    }
}
