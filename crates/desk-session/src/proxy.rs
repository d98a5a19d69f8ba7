//! Late binding for values that are created after their consumers.

use crate::{CredentialError, CredentialResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A handle that consumers can hold before the value it points to exists.
///
/// The value is published once with [`bind`](Self::bind). Until then every
/// access fails with `Unbound`; afterwards every access sees the same `Arc`.
pub struct DeferredBindingProxy<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> DeferredBindingProxy<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Publish `value`. Fails with `AlreadyBound` if a value is already set.
    pub fn bind(&self, value: Arc<T>) -> CredentialResult<()> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(CredentialError::AlreadyBound);
        }
        *slot = Some(value);
        Ok(())
    }

    /// Get the bound value.
    pub fn get(&self) -> CredentialResult<Arc<T>> {
        self.slot.read().clone().ok_or(CredentialError::Unbound)
    }

    pub fn is_bound(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl<T> Default for DeferredBindingProxy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DeferredBindingProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredBindingProxy")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unbound_access_fails() {
        let proxy: DeferredBindingProxy<String> = DeferredBindingProxy::new();
        assert!(!proxy.is_bound());
        assert_eq!(proxy.get().unwrap_err(), CredentialError::Unbound);
    }

    #[test]
    fn test_bind_then_get() {
        let proxy = DeferredBindingProxy::new();
        let value = Arc::new("state".to_string());
        proxy.bind(value.clone()).unwrap();

        assert!(proxy.is_bound());
        assert!(Arc::ptr_eq(&proxy.get().unwrap(), &value));
    }

    #[test]
    fn test_second_bind_is_rejected() {
        let proxy = DeferredBindingProxy::new();
        proxy.bind(Arc::new(1)).unwrap();

        assert_eq!(proxy.bind(Arc::new(2)), Err(CredentialError::AlreadyBound));
        assert_eq!(*proxy.get().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_bind_has_one_winner() {
        let proxy = Arc::new(DeferredBindingProxy::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let proxy = proxy.clone();
                thread::spawn(move || proxy.bind(Arc::new(i)).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
