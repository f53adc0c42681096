//! Current-actor identity supplied by an external authentication provider.
//!
//! The provider owns sign-in. It reports identity changes to an
//! [`AuthSession`], which forwards them to any registered listeners. Services
//! receive the session explicitly; there is no process-wide current user.

use std::fmt;
use std::sync::Arc;

use quiz_core::model::UserId;

use crate::error::AuthError;

/// Observer of identity changes, e.g. to drop cached per-user state.
pub trait IdentityListener: Send + Sync {
    fn identity_changed(&self, user: Option<&UserId>);
}

impl<F> IdentityListener for F
where
    F: Fn(Option<&UserId>) + Send + Sync,
{
    fn identity_changed(&self, user: Option<&UserId>) {
        self(user);
    }
}

#[derive(Clone, Default)]
pub struct AuthSession {
    user: Option<UserId>,
    listeners: Vec<Arc<dyn IdentityListener>>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl AuthSession {
    /// A session with nobody signed in.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        Self {
            user: Some(user),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn IdentityListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Called by the provider when its current user changes.
    pub fn set_identity(&mut self, user: Option<UserId>) {
        if self.user == user {
            return;
        }
        self.user = user;
        tracing::info!(user = ?self.user.as_ref().map(UserId::as_str), "identity changed");
        for listener in &self.listeners {
            listener.identity_changed(self.user.as_ref());
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// # Errors
    ///
    /// Returns `AuthError::NotSignedIn` when nobody is signed in.
    pub fn require_user(&self) -> Result<&UserId, AuthError> {
        self.user.as_ref().ok_or(AuthError::NotSignedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn anonymous_session_requires_sign_in() {
        let auth = AuthSession::anonymous();
        assert_eq!(auth.require_user(), Err(AuthError::NotSignedIn));
    }

    #[test]
    fn listeners_see_each_change_once() {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let mut auth = AuthSession::anonymous().with_listener(Arc::new(
            move |user: Option<&UserId>| {
                sink.lock()
                    .unwrap()
                    .push(user.map(|u| u.as_str().to_owned()));
            },
        ));

        auth.set_identity(Some(UserId::new("u1")));
        auth.set_identity(Some(UserId::new("u1")));
        auth.set_identity(None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("u1".to_owned()), None]
        );
        assert!(auth.current_user().is_none());
    }
}
