mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, json};
use sessionguard_sdk::{
    ErrorCode, MemorySessionStorage, SessionConfig, SessionError, SessionRecipe, SessionState,
    SessionStorageBackend, UserContext,
};

use common::{TestRequest, init_tracing, payload, recipe_with};

#[tokio::test]
async fn test_refresh_rotates_token_pair() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;
    let ctx = UserContext::new();
    let session = recipe
        .create_new_session("u1", payload(json!({"plan": "pro"})), Map::new(), &ctx)
        .await
        .unwrap();
    let first_refresh = session.tokens().refresh_token.clone().unwrap();

    let refreshed = recipe.refresh_session(&first_refresh, &ctx).await.unwrap();

    assert_eq!(refreshed.state(), SessionState::Refreshed);
    assert_eq!(refreshed.session_handle(), session.session_handle());
    assert_eq!(refreshed.access_token_payload(), &payload(json!({"plan": "pro"})));
    assert_eq!(refreshed.time_created_ms(), session.time_created_ms());
    let second_refresh = refreshed.tokens().refresh_token.clone().unwrap();
    assert_ne!(second_refresh, first_refresh);

    let verified = recipe
        .verify_session(&TestRequest::bearer(refreshed.access_token()), &ctx)
        .await
        .unwrap();
    assert_eq!(verified.user_id(), "u1");

    // the rotated token keeps working
    assert!(recipe.refresh_session(&second_refresh, &ctx).await.is_ok());
}

#[tokio::test]
async fn test_refresh_picks_up_stored_payload_changes() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;
    let ctx = UserContext::new();
    let session = recipe
        .create_new_session("u1", Map::new(), Map::new(), &ctx)
        .await
        .unwrap();

    recipe
        .merge_into_access_token_payload(session.session_handle(), payload(json!({"role": "admin"})), &ctx)
        .await
        .unwrap();

    let refreshed = recipe
        .refresh_session(session.tokens().refresh_token.as_deref().unwrap(), &ctx)
        .await
        .unwrap();
    assert_eq!(refreshed.access_token_payload(), &payload(json!({"role": "admin"})));
}

#[tokio::test]
async fn test_replayed_refresh_token_revokes_session() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;
    let ctx = UserContext::new();
    let session = recipe
        .create_new_session("u1", Map::new(), Map::new(), &ctx)
        .await
        .unwrap();
    let original = session.tokens().refresh_token.clone().unwrap();

    let refreshed = recipe.refresh_session(&original, &ctx).await.unwrap();
    let rotated = refreshed.tokens().refresh_token.clone().unwrap();

    let err = recipe.refresh_session(&original, &ctx).await.unwrap_err();
    match &err {
        SessionError::TokenTheftDetected {
            session_handle,
            user_id,
        } => {
            assert_eq!(session_handle, session.session_handle());
            assert_eq!(user_id, "u1");
        }
        other => panic!("expected token theft, got {other:?}"),
    }
    assert_eq!(err.code(), ErrorCode::TokenTheftDetected);

    assert!(
        recipe
            .get_session_information(session.session_handle(), &ctx)
            .await
            .unwrap()
            .is_none()
    );
    assert!(matches!(
        recipe.refresh_session(&rotated, &ctx).await,
        Err(SessionError::TokenInvalid(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_single_winner() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;
    let ctx = UserContext::new();
    let session = recipe
        .create_new_session("u1", Map::new(), Map::new(), &ctx)
        .await
        .unwrap();
    let refresh_token = session.tokens().refresh_token.clone().unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let recipe = recipe.clone();
            let refresh_token = refresh_token.clone();
            tokio::spawn(async move {
                recipe
                    .refresh_session(&refresh_token, &UserContext::new())
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut theft = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(SessionError::TokenTheftDetected { .. }) => theft += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(theft, 1);
    assert!(
        recipe
            .get_session_information(session.session_handle(), &ctx)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_unknown_refresh_token() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;

    let err = recipe
        .refresh_session("never-issued", &UserContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TokenInvalid(_)));
}

#[tokio::test]
async fn test_refresh_from_cookie() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;
    let ctx = UserContext::new();
    let session = recipe
        .create_new_session("u1", Map::new(), Map::new(), &ctx)
        .await
        .unwrap();

    let request = TestRequest::default().with_header(
        "cookie",
        &format!(
            "sRefreshToken={}",
            session.tokens().refresh_token.as_deref().unwrap()
        ),
    );
    assert!(recipe.refresh_session_from_request(&request, &ctx).await.is_ok());

    assert!(matches!(
        recipe
            .refresh_session_from_request(&TestRequest::default(), &ctx)
            .await,
        Err(SessionError::TokenInvalid(ref reason)) if reason == "no refresh token"
    ));
}

#[tokio::test]
async fn test_revoke_all_sessions_for_user() {
    let recipe = recipe_with(Arc::new(MemorySessionStorage::new())).await;
    let ctx = UserContext::new();

    let mut sessions = Vec::new();
    for _ in 0..2 {
        sessions.push(
            recipe
                .create_new_session("u1", Map::new(), Map::new(), &ctx)
                .await
                .unwrap(),
        );
    }
    let other = recipe
        .create_new_session("u2", Map::new(), Map::new(), &ctx)
        .await
        .unwrap();

    let mut revoked = recipe.revoke_all_sessions_for_user("u1", &ctx).await.unwrap();
    revoked.sort();
    let mut expected: Vec<String> = sessions
        .iter()
        .map(|s| s.session_handle().to_string())
        .collect();
    expected.sort();
    assert_eq!(revoked, expected);

    for session in &sessions {
        assert!(matches!(
            recipe
                .refresh_session(session.tokens().refresh_token.as_deref().unwrap(), &ctx)
                .await,
            Err(SessionError::TokenInvalid(_))
        ));
    }
    assert!(
        recipe
            .refresh_session(other.tokens().refresh_token.as_deref().unwrap(), &ctx)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_refresh_without_signing_key_keeps_token_usable() {
    init_tracing();
    let storage = Arc::new(MemorySessionStorage::new());
    let config = SessionConfig {
        key_refresh_interval: Duration::ZERO,
        ..Default::default()
    };
    let recipe = SessionRecipe::builder(config, storage.clone())
        .build()
        .await
        .unwrap();
    let ctx = UserContext::new();
    let session = recipe
        .create_new_session("u1", Map::new(), Map::new(), &ctx)
        .await
        .unwrap();
    let refresh_token = session.tokens().refresh_token.clone().unwrap();

    for key in storage.get_trusted_signing_keys().await.unwrap() {
        storage.retire_signing_key(&key.id);
    }

    assert!(matches!(
        recipe.refresh_session(&refresh_token, &ctx).await,
        Err(SessionError::Config(_))
    ));
    assert!(matches!(
        recipe.create_new_session("u2", Map::new(), Map::new(), &ctx).await,
        Err(SessionError::Config(_))
    ));
    assert!(recipe.revoke_all_sessions_for_user("u2", &ctx).await.unwrap().is_empty());

    storage.rotate_signing_key();
    let refreshed = recipe.refresh_session(&refresh_token, &ctx).await.unwrap();
    assert_eq!(refreshed.session_handle(), session.session_handle());
    assert!(
        recipe
            .get_session_information(session.session_handle(), &ctx)
            .await
            .unwrap()
            .is_some()
    );
}
