//! Session context consumed by the sync engine

use std::sync::{Arc, PoisonError, RwLock};

/// Source of the currently valid session identifier.
///
/// The engine treats an absent session as offline for drain purposes.
pub trait SessionProvider: Send + Sync {
    /// The current session identifier, if one is valid
    fn current_session(&self) -> Option<String>;
}

/// Shared session holder with an explicit login/logout lifecycle.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<String>>>,
}

impl SessionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh session (login or token refresh)
    pub fn set(&self, session_id: impl Into<String>) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(session_id.into());
    }

    /// Drop the session (logout or expiry)
    pub fn clear(&self) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}

impl SessionProvider for SessionHandle {
    fn current_session(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let handle = SessionHandle::new();
        assert!(handle.current_session().is_none());

        handle.set("session-1");
        assert_eq!(handle.current_session().as_deref(), Some("session-1"));

        handle.clear();
        assert!(handle.current_session().is_none());
    }
}
