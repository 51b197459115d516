use crate::usecases::{contracts::StoreError, session::SessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub session_found: bool,
}

/// Ends the local session. No backend round trip is involved, so this works
/// offline and is idempotent.
pub async fn logout_and_reset(session: &SessionManager) -> Result<LogoutOutcome, StoreError> {
    let session_found = session.restore().await?;
    session.logout().await;

    Ok(LogoutOutcome { session_found })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::{FakeChatApi, MemoryStore},
        usecases::session::{SessionEvent, SessionSettings},
    };

    fn settings() -> SessionSettings {
        SessionSettings {
            refresh_interval: None,
            expiry_skew_secs: 30,
        }
    }

    #[tokio::test]
    async fn logout_removes_credentials_but_keeps_push_token() {
        let store = MemoryStore::with(&[
            ("token", "a1"),
            ("refreshToken", "r1"),
            ("pushToken", "device"),
        ]);
        let api = FakeChatApi::new();
        let session = SessionManager::new(store.clone(), api.clone(), settings());
        let mut events = session.subscribe();

        let outcome = logout_and_reset(&session).await.expect("logout");

        assert!(outcome.session_found);
        assert!(!session.is_authenticated());
        assert_eq!(store.value("token"), None);
        assert_eq!(store.value("refreshToken"), None);
        assert_eq!(store.value("pushToken").as_deref(), Some("device"));
        assert_eq!(events.try_recv().ok(), Some(SessionEvent::LoggedOut));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn logout_is_idempotent_when_nothing_is_stored() {
        let store = MemoryStore::with(&[]);
        let session = SessionManager::new(store.clone(), FakeChatApi::new(), settings());

        let first = logout_and_reset(&session).await.expect("logout");
        let second = logout_and_reset(&session).await.expect("logout");

        assert!(!first.session_found);
        assert!(!second.session_found);
        assert_eq!(store.value("token"), None);
    }

    #[tokio::test]
    async fn logout_succeeds_even_when_removal_fails() {
        let store = MemoryStore::with(&[("token", "a1")]);
        store.fail_removals();
        let session = SessionManager::new(store.clone(), FakeChatApi::new(), settings());

        let outcome = logout_and_reset(&session).await.expect("logout");

        assert!(outcome.session_found);
        assert!(!session.is_authenticated());
        assert_eq!(store.removal_count("token"), 1);
        assert_eq!(store.removal_count("refreshToken"), 1);
    }
}
