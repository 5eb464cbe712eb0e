//! Provider reference counting.
//!
//! A [`Provider`] stands for a module that supplies items or behaviour: a
//! hardware collaborator supplying adapters and channels, or a protocol module
//! bound to channels. Every registered item (or binding) holds a
//! [`ProviderRef`]; the supplier must not go away while [`Provider::users`] is
//! non-zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    name: String,
    users: AtomicUsize,
}

/// A module that can be kept alive by the items it supplies.
#[derive(Debug, Clone)]
pub struct Provider {
    inner: Arc<Inner>,
}

impl Provider {
    /// Creates a provider with no users.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                users: AtomicUsize::new(0),
            }),
        }
    }

    /// Provider name, used in log messages.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Takes one reference.
    pub fn acquire(&self) -> ProviderRef {
        self.inner.users.fetch_add(1, Ordering::AcqRel);
        ProviderRef {
            inner: self.inner.clone(),
        }
    }

    /// Number of outstanding references.
    pub fn users(&self) -> usize {
        self.inner.users.load(Ordering::Acquire)
    }

    /// Whether any reference is outstanding.
    pub fn is_in_use(&self) -> bool {
        self.users() > 0
    }
}

/// One outstanding reference on a [`Provider`], released on drop.
#[derive(Debug)]
pub struct ProviderRef {
    inner: Arc<Inner>,
}

impl ProviderRef {
    /// Name of the referenced provider.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Clone for ProviderRef {
    fn clone(&self) -> Self {
        self.inner.users.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for ProviderRef {
    fn drop(&mut self) {
        self.inner.users.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_counting() {
        let provider = Provider::new("cxmock");
        assert!(!provider.is_in_use());
        let a = provider.acquire();
        let b = a.clone();
        assert_eq!(provider.users(), 2);
        drop(a);
        assert_eq!(provider.users(), 1);
        assert_eq!(b.name(), "cxmock");
        drop(b);
        assert!(!provider.is_in_use());
    }
}
