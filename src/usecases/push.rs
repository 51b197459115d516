//! Device push-token bookkeeping. The token is kept across logouts so the
//! next session can register it again.

use crate::{
    domain::session::PUSH_TOKEN_KEY,
    usecases::{
        contracts::{ChatApi, FailureClass, KeyValueStore, StoreError},
        session::SessionManager,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    NoToken,
    /// Stored, waiting for an authenticated session.
    Deferred,
    Registered,
    Failed(FailureClass),
}

/// Registers the stored push token, if any, for the current session.
pub async fn register_stored(
    store: &dyn KeyValueStore,
    api: &dyn ChatApi,
    session: &SessionManager,
) -> Result<PushOutcome, StoreError> {
    let Some(push_token) = store.get(PUSH_TOKEN_KEY).await? else {
        return Ok(PushOutcome::NoToken);
    };

    Ok(register(api, session, &push_token).await)
}

/// Saves `push_token`, then registers it when a session is active.
pub async fn save_and_register(
    store: &dyn KeyValueStore,
    api: &dyn ChatApi,
    session: &SessionManager,
    push_token: &str,
) -> Result<PushOutcome, StoreError> {
    store.set(PUSH_TOKEN_KEY, push_token).await?;
    Ok(register(api, session, push_token).await)
}

async fn register(api: &dyn ChatApi, session: &SessionManager, push_token: &str) -> PushOutcome {
    let Some(access_token) = session.access_token() else {
        tracing::debug!("push token stored; no session to register it with");
        return PushOutcome::Deferred;
    };

    match api.register_push_token(&access_token, push_token).await {
        Ok(()) => {
            tracing::info!("push token registered");
            PushOutcome::Registered
        }
        Err(error) => PushOutcome::Failed(session.report_failure(&error).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::{ApiCall, FakeChatApi, MemoryStore},
        usecases::{contracts::ApiError, session::SessionSettings},
    };

    fn settings() -> SessionSettings {
        SessionSettings {
            refresh_interval: None,
            expiry_skew_secs: 30,
        }
    }

    #[tokio::test]
    async fn nothing_to_register_without_a_stored_token() {
        let store = MemoryStore::with(&[("token", "access")]);
        let api = FakeChatApi::new();
        let session = SessionManager::new(store.clone(), api.clone(), settings());
        session.restore().await.expect("restore");

        let outcome = register_stored(store.as_ref(), api.as_ref(), &session)
            .await
            .expect("store");

        assert_eq!(outcome, PushOutcome::NoToken);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn token_saved_while_signed_out_is_deferred() {
        let store = MemoryStore::with(&[]);
        let api = FakeChatApi::new();
        let session = SessionManager::new(store.clone(), api.clone(), settings());

        let outcome = save_and_register(store.as_ref(), api.as_ref(), &session, "device-1")
            .await
            .expect("store");

        assert_eq!(outcome, PushOutcome::Deferred);
        assert_eq!(store.value(PUSH_TOKEN_KEY).as_deref(), Some("device-1"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn stored_token_is_registered_for_the_session() {
        let store = MemoryStore::with(&[("token", "access"), ("pushToken", "device-1")]);
        let api = FakeChatApi::new();
        let session = SessionManager::new(store.clone(), api.clone(), settings());
        session.restore().await.expect("restore");

        let outcome = register_stored(store.as_ref(), api.as_ref(), &session)
            .await
            .expect("store");

        assert_eq!(outcome, PushOutcome::Registered);
        assert_eq!(api.calls(), vec![ApiCall::RegisterPush("device-1".to_owned())]);
    }

    #[tokio::test]
    async fn transient_registration_failure_keeps_the_session() {
        let store = MemoryStore::with(&[("token", "access"), ("pushToken", "device-1")]);
        let api = FakeChatApi::new();
        *api.push_result.borrow_mut() = Err(ApiError::Timeout);
        let session = SessionManager::new(store.clone(), api.clone(), settings());
        session.restore().await.expect("restore");

        let outcome = register_stored(store.as_ref(), api.as_ref(), &session)
            .await
            .expect("store");

        assert_eq!(outcome, PushOutcome::Failed(FailureClass::Transient));
        assert!(session.is_authenticated());
    }
}
