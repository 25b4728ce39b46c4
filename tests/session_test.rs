use chat_ragent::core::Config;
use chat_ragent::testing::{MockCall, MockHandle, TestHelper, MOCK_SESSION_TOKEN, MOCK_URL};
use chat_ragent::{AgentError, SessionManager, SessionOrigin};
use tempfile::TempDir;

fn setup() -> (MockHandle, TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let config = TestHelper::config(&dir.path().join("auth_state.json"));
    (TestHelper::chat_site().into_handle(), dir, config)
}

fn login_fills(handle: &MockHandle) -> usize {
    handle.count(|call| matches!(call, MockCall::Fill { .. }))
}

#[tokio::test(start_paused = true)]
async fn valid_state_resumes_without_login() {
    let (handle, _dir, config) = setup();
    std::fs::write(&config.session.state_path, MOCK_SESSION_TOKEN).unwrap();
    let factory = handle.factory();
    let credentials = TestHelper::credentials();

    let session = SessionManager::new(&factory, &config, Some(&credentials))
        .obtain(MOCK_URL, "resume")
        .await
        .unwrap();

    assert_eq!(session.origin(), SessionOrigin::Resumed);
    assert_eq!(
        session.persisted_state_path(),
        Some(config.session.state_path.as_path())
    );
    assert_eq!(login_fills(&handle), 0);
    assert_eq!(handle.count(|c| matches!(c, MockCall::PersistState(_))), 0);
    assert!(handle
        .calls()
        .contains(&MockCall::NewTab { seeded: true }));
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_state_falls_back_to_login_and_is_overwritten() {
    let (handle, _dir, config) = setup();
    std::fs::write(&config.session.state_path, "expired-token").unwrap();
    let factory = handle.factory();
    let credentials = TestHelper::credentials();

    let session = SessionManager::new(&factory, &config, Some(&credentials))
        .obtain(MOCK_URL, "fallback")
        .await
        .unwrap();

    assert_eq!(session.origin(), SessionOrigin::Authenticated);
    assert_eq!(login_fills(&handle), 2);
    assert_eq!(handle.launches(), 2);
    assert_eq!(handle.closes(), 1, "the rejected resume browser is closed");
    assert_eq!(
        std::fs::read_to_string(&config.session.state_path).unwrap(),
        MOCK_SESSION_TOKEN
    );
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fresh_login_persists_state() {
    let (handle, _dir, config) = setup();
    let factory = handle.factory();
    let credentials = TestHelper::credentials();

    let session = SessionManager::new(&factory, &config, Some(&credentials))
        .obtain(MOCK_URL, "fresh")
        .await
        .unwrap();

    assert!(session.is_authenticated());
    assert_eq!(handle.launches(), 1);
    assert!(config.session.state_path.exists());
    assert!(handle
        .calls()
        .contains(&MockCall::Fill {
            selector: config.selectors.email_input.clone(),
            text: credentials.email.clone(),
        }));
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_state_without_credentials_fails_authentication() {
    let (handle, _dir, config) = setup();
    std::fs::write(&config.session.state_path, "expired-token").unwrap();
    let factory = handle.factory();

    let err = SessionManager::new(&factory, &config, None)
        .obtain(MOCK_URL, "no-creds")
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AgentError::AuthenticationFailed(_)));
    assert_eq!(handle.launches(), 1);
    assert_eq!(handle.closes(), 1);
    assert_eq!(
        std::fs::read_to_string(&config.session.state_path).unwrap(),
        "expired-token"
    );
}
