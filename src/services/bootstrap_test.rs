use super::*;
use crate::provider::AuthChangeEvent;
use crate::provider::test_helpers::{ScriptedProvider, dummy_session, dummy_user};

fn spawn_with(provider: &Arc<ScriptedProvider>, timeout: Duration) -> BootstrapHandle {
    spawn_bootstrapper(provider.clone(), AuthStore::new(), BootstrapOptions { fetch_timeout: timeout })
}

async fn wait_for_revision(store: &AuthStore, revision: u64) -> AuthState {
    let mut rx = store.subscribe();
    rx.wait_for(|s| s.revision >= revision).await.unwrap().clone()
}

// =============================================================================
// role_from_metadata / resolve_session
// =============================================================================

#[test]
fn missing_metadata_role_defaults_to_student() {
    assert_eq!(role_from_metadata(&dummy_user(None)), Role::Student);
}

#[test]
fn metadata_role_is_honoured() {
    assert_eq!(role_from_metadata(&dummy_user(Some("faculty"))), Role::Faculty);
    assert_eq!(role_from_metadata(&dummy_user(Some("Superadmin"))), Role::Superadmin);
}

#[test]
fn unknown_metadata_role_falls_back_to_student() {
    assert_eq!(role_from_metadata(&dummy_user(Some("dean"))), Role::Student);
    assert_eq!(role_from_metadata(&dummy_user(Some(""))), Role::Student);
}

#[test]
fn resolve_none_is_signed_out() {
    assert_eq!(resolve_session(None), Resolution::signed_out());
}

#[test]
fn resolve_session_carries_user_and_role() {
    let session = dummy_session(Some("faculty"));
    let resolution = resolve_session(Some(&session));
    assert_eq!(resolution.user, Some(session.user.clone()));
    assert_eq!(resolution.role, Some(Role::Faculty));
}

#[test]
fn options_follow_config_timeout() {
    let config = PortalConfig::from_lookup(|key| match key {
        "SUPABASE_URL" => Some("https://demo.supabase.co".into()),
        "SUPABASE_ANON_KEY" => Some("anon".into()),
        "SESSION_FETCH_TIMEOUT_MS" => Some("1500".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(BootstrapOptions::from(&config).fetch_timeout, Duration::from_millis(1500));
}

// =============================================================================
// Initial resolution
// =============================================================================

#[tokio::test]
async fn spawn_raises_loading_before_returning() {
    let provider = Arc::new(ScriptedProvider::new(None).with_delay(Duration::from_secs(1)));
    let store = AuthStore::new();
    store.set_loading(false);
    let handle = spawn_bootstrapper(provider.clone(), store.clone(), BootstrapOptions::default());
    assert!(store.snapshot().loading);
    handle.shutdown().await;
}

#[tokio::test]
async fn session_without_role_settles_as_student() {
    let session = dummy_session(None);
    let provider = Arc::new(ScriptedProvider::new(Some(session.clone())));
    let handle = spawn_with(&provider, Duration::from_secs(5));

    let state = handle.ready().await;
    assert!(!state.loading);
    assert_eq!(state.user, Some(session.user));
    assert_eq!(state.role, Some(Role::Student));
    assert_eq!(state.revision, 1);
}

#[tokio::test]
async fn session_with_metadata_role_settles_with_that_role() {
    let provider = Arc::new(ScriptedProvider::new(Some(dummy_session(Some("superadmin")))));
    let handle = spawn_with(&provider, Duration::from_secs(5));
    assert_eq!(handle.ready().await.role, Some(Role::Superadmin));
}

#[tokio::test]
async fn no_session_settles_signed_out() {
    let provider = Arc::new(ScriptedProvider::new(None));
    let handle = spawn_with(&provider, Duration::from_secs(5));

    let state = handle.ready().await;
    assert!(!state.loading);
    assert!(state.user.is_none());
    assert!(state.role.is_none());
}

#[tokio::test]
async fn provider_failure_fails_closed() {
    let provider = Arc::new(ScriptedProvider::failing("connection refused"));
    let handle = spawn_with(&provider, Duration::from_secs(5));

    let state = handle.ready().await;
    assert!(!state.loading);
    assert!(state.user.is_none());
    assert!(state.role.is_none());
}

#[tokio::test(start_paused = true)]
async fn hung_provider_times_out_to_signed_out() {
    let provider =
        Arc::new(ScriptedProvider::new(Some(dummy_session(Some("faculty")))).with_delay(Duration::from_secs(600)));
    let handle = spawn_with(&provider, Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    let state = handle.ready().await;
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(600));
    assert!(!state.loading);
    assert!(state.user.is_none());
}

// =============================================================================
// Change notifications
// =============================================================================

#[tokio::test]
async fn sign_out_notification_clears_identity_without_touching_loading() {
    let provider = Arc::new(ScriptedProvider::new(Some(dummy_session(Some("faculty")))));
    let handle = spawn_with(&provider, Duration::from_secs(5));
    assert!(handle.ready().await.user.is_some());

    provider.events.emit(AuthChangeEvent::SignedOut, None);
    let state = wait_for_revision(handle.store(), 2).await;

    assert!(state.user.is_none());
    assert!(state.role.is_none());
    assert!(!state.loading);
}

#[tokio::test]
async fn sign_in_notification_populates_identity() {
    let provider = Arc::new(ScriptedProvider::new(None));
    let handle = spawn_with(&provider, Duration::from_secs(5));
    assert!(handle.ready().await.user.is_none());

    let session = dummy_session(Some("faculty"));
    provider.events.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
    let state = wait_for_revision(handle.store(), 2).await;

    assert_eq!(state.user, Some(session.user));
    assert_eq!(state.role, Some(Role::Faculty));
}

#[tokio::test(start_paused = true)]
async fn late_initial_fetch_does_not_overwrite_newer_notification() {
    // The initial fetch answers "no session", but only after a sign-in
    // notification has already been applied.
    let provider = Arc::new(ScriptedProvider::new(None).with_delay(Duration::from_secs(5)));
    let handle = spawn_with(&provider, Duration::from_secs(30));

    let session = dummy_session(Some("faculty"));
    provider.events.emit(AuthChangeEvent::SignedIn, Some(session.clone()));

    let state = handle.ready().await;
    assert!(!state.loading);
    assert_eq!(state.user, Some(session.user));
    assert_eq!(state.role, Some(Role::Faculty));
    assert_eq!(state.revision, 2);
}

#[tokio::test(start_paused = true)]
async fn notification_before_initial_resolution_keeps_loading_raised() {
    let provider = Arc::new(ScriptedProvider::new(None).with_delay(Duration::from_secs(5)));
    let handle = spawn_with(&provider, Duration::from_secs(30));

    provider.events.emit(AuthChangeEvent::SignedIn, Some(dummy_session(None)));
    let state = wait_for_revision(handle.store(), 2).await;
    assert!(state.loading);

    assert!(!handle.ready().await.loading);
}

#[tokio::test]
async fn notifications_apply_in_emission_order() {
    let provider = Arc::new(ScriptedProvider::new(None));
    let handle = spawn_with(&provider, Duration::from_secs(5));
    handle.ready().await;

    let student = dummy_session(Some("student"));
    let faculty = dummy_session(Some("faculty"));
    provider.events.emit(AuthChangeEvent::SignedIn, Some(student));
    provider.events.emit(AuthChangeEvent::SignedOut, None);
    provider.events.emit(AuthChangeEvent::SignedIn, Some(faculty.clone()));

    let state = wait_for_revision(handle.store(), 4).await;
    assert_eq!(state.user, Some(faculty.user));
    assert_eq!(state.role, Some(Role::Faculty));
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn shutdown_releases_subscription() {
    let provider = Arc::new(ScriptedProvider::new(None));
    let handle = spawn_with(&provider, Duration::from_secs(5));
    assert_eq!(provider.events.subscriber_count(), 1);

    handle.ready().await;
    handle.shutdown().await;
    assert_eq!(provider.events.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_stops_bootstrapper() {
    let provider = Arc::new(ScriptedProvider::new(None).with_delay(Duration::from_secs(60)));
    let handle = spawn_with(&provider, Duration::from_secs(120));
    assert_eq!(provider.events.subscriber_count(), 1);

    drop(handle);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(provider.events.subscriber_count(), 0);
}

#[tokio::test]
async fn shutdown_before_resolution_still_clears_loading() {
    let provider = Arc::new(ScriptedProvider::new(None).with_delay(Duration::from_secs(60)));
    let store = AuthStore::new();
    let handle = spawn_bootstrapper(provider.clone(), store.clone(), BootstrapOptions::default());
    handle.shutdown().await;

    let state = store.snapshot();
    assert!(!state.loading);
    assert_eq!(state.revision, 0);
}

// =============================================================================
// Pinned identity (development role bypass)
// =============================================================================

#[tokio::test]
async fn pinned_identity_drains_changes_until_shutdown() {
    let provider = ScriptedProvider::new(None);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(hold_fixed_identity(provider.subscribe(), shutdown_rx));

    provider.events.emit(AuthChangeEvent::SignedOut, None);
    provider.events.emit(AuthChangeEvent::SignedIn, Some(dummy_session(Some("faculty"))));
    tokio::task::yield_now().await;
    assert!(!task.is_finished());
    assert_eq!(provider.events.subscriber_count(), 1);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert_eq!(provider.events.subscriber_count(), 0);
}

#[tokio::test]
async fn pinned_identity_survives_a_closed_change_channel() {
    let provider = ScriptedProvider::new(None);
    let changes = provider.subscribe();
    drop(provider);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(hold_fixed_identity(changes, shutdown_rx));

    tokio::task::yield_now().await;
    assert!(!task.is_finished());
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}
