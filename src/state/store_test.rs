use super::*;
use crate::provider::test_helpers::dummy_user;

// =============================================================================
// Plain setters
// =============================================================================

#[test]
fn new_store_starts_loading_and_empty() {
    let store = AuthStore::new();
    assert_eq!(store.snapshot(), AuthState::default());
}

#[test]
fn setters_touch_only_their_field() {
    let store = AuthStore::new();
    let user = dummy_user(None);

    store.set_user(Some(user.clone()));
    let state = store.snapshot();
    assert_eq!(state.user.as_ref(), Some(&user));
    assert!(state.role.is_none());
    assert!(state.loading);

    store.set_role(Some(Role::Faculty));
    let state = store.snapshot();
    assert_eq!(state.user.as_ref(), Some(&user));
    assert_eq!(state.role, Some(Role::Faculty));

    store.set_loading(false);
    let state = store.snapshot();
    assert!(!state.loading);
    assert_eq!(state.role, Some(Role::Faculty));
}

#[test]
fn role_may_be_set_without_identity() {
    let store = AuthStore::new();
    store.set_role(Some(Role::Student));
    let state = store.snapshot();
    assert!(state.user.is_none());
    assert_eq!(state.role, Some(Role::Student));
}

#[test]
fn last_call_per_field_wins() {
    let store = AuthStore::new();
    let first = dummy_user(None);
    let second = dummy_user(None);

    store.set_user(Some(first));
    store.set_role(Some(Role::Superadmin));
    store.set_user(Some(second.clone()));
    store.clear();
    store.set_role(Some(Role::Student));
    store.set_user(Some(second.clone()));

    let state = store.snapshot();
    assert_eq!(state.user, Some(second));
    assert_eq!(state.role, Some(Role::Student));
    assert!(state.loading);
}

#[test]
fn clear_leaves_loading_untouched() {
    let store = AuthStore::new();
    store.set_user(Some(dummy_user(None)));
    store.set_role(Some(Role::Faculty));
    store.set_loading(false);

    store.clear();
    let state = store.snapshot();
    assert!(state.user.is_none());
    assert!(state.role.is_none());
    assert!(!state.loading);
}

#[test]
fn clones_share_one_state() {
    let store = AuthStore::new();
    let other = store.clone();
    other.set_role(Some(Role::Faculty));
    assert_eq!(store.snapshot().role, Some(Role::Faculty));
}

// =============================================================================
// Sequenced apply
// =============================================================================

#[test]
fn apply_writes_identity_and_role_together() {
    let store = AuthStore::new();
    let mut rx = store.subscribe();
    let user = dummy_user(Some("faculty"));

    assert!(store.apply(1, Resolution::signed_in(user.clone(), Role::Faculty)));
    assert!(rx.has_changed().unwrap());

    let state = rx.borrow_and_update().clone();
    assert_eq!(state.user, Some(user));
    assert_eq!(state.role, Some(Role::Faculty));
    assert_eq!(state.revision, 1);
}

#[test]
fn apply_discards_stale_sequence() {
    let store = AuthStore::new();
    let newer = dummy_user(None);
    assert!(store.apply(2, Resolution::signed_in(newer.clone(), Role::Student)));

    let mut rx = store.subscribe();
    assert!(!store.apply(1, Resolution::signed_out()));
    assert!(!rx.has_changed().unwrap());

    let state = store.snapshot();
    assert_eq!(state.user, Some(newer));
    assert_eq!(state.revision, 2);
}

#[test]
fn apply_discards_equal_sequence() {
    let store = AuthStore::new();
    assert!(store.apply(3, Resolution::signed_out()));
    assert!(!store.apply(3, Resolution::signed_in(dummy_user(None), Role::Faculty)));
    assert!(store.snapshot().user.is_none());
}

#[test]
fn apply_does_not_touch_loading() {
    let store = AuthStore::new();
    store.apply(1, Resolution::signed_out());
    assert!(store.snapshot().loading);
}

// =============================================================================
// Loading guard
// =============================================================================

#[test]
fn loading_guard_clears_flag_on_drop() {
    let store = AuthStore::new();
    store.set_loading(false);
    let guard = store.begin_loading();
    assert!(store.snapshot().loading);
    drop(guard);
    assert!(!store.snapshot().loading);
}

#[test]
fn loading_guard_clears_flag_on_panic() {
    let store = AuthStore::new();
    let inner = store.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        let _guard = inner.begin_loading();
        panic!("resolution blew up");
    }));
    assert!(result.is_err());
    assert!(!store.snapshot().loading);
}

#[tokio::test]
async fn wait_until_loaded_returns_first_settled_snapshot() {
    let store = AuthStore::new();
    let waiter = store.clone();
    let task = tokio::spawn(async move { waiter.wait_until_loaded().await });

    store.set_role(Some(Role::Faculty));
    store.set_loading(false);

    let state = task.await.unwrap();
    assert!(!state.loading);
    assert_eq!(state.role, Some(Role::Faculty));
}
