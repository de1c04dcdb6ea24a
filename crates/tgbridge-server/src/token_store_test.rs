use super::*;
use crate::testing::{FakeMarketplace, TEST_UA};

fn session() -> Session {
    let mut session = Session::anonymous(TEST_UA);
    session.access_token = Some("access".to_string());
    session.refresh_token = Some("refresh".to_string());
    session.user_id = Some("42".to_string());
    session.cookie = Some("datadome=abc".to_string());
    session.last_refreshed_at = Some(
        DateTime::parse_from_rfc3339("2022-01-01T17:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    session
}

#[test]
fn missing_file_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "24.3.1");
    assert!(store.load().unwrap().is_none());
    assert!(store.load_usable().unwrap().is_none());
}

#[test]
fn saved_session_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "24.3.1");
    store.save_session(&session()).unwrap();

    let bundle = store.load_usable().unwrap().expect("bundle should be usable");
    assert_eq!(bundle.revision, Some(TOKEN_REVISION));
    assert_eq!(bundle.client_version.as_deref(), Some("24.3.1"));
    assert_eq!(bundle.to_session(), Some(session()));
    assert!(!dir.path().join("tokens.json.tmp").exists());
}

#[test]
fn file_uses_established_field_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "24.3.1");
    store.save_session(&session()).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    for key in [
        "access_token",
        "access_token_lifetime",
        "refresh_token",
        "user_id",
        "last_time_token_refreshed",
        "ua",
        "token_version",
        "cookie_datadome",
        "rev",
    ] {
        assert!(raw.get(key).is_some(), "missing key {key}");
    }
}

#[test]
fn bundle_without_revision_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "24.3.1");
    std::fs::write(
        store.path(),
        r#"{"access_token":"a","refresh_token":"r","user_id":"1","ua":"TGTG/22.1.0 x","token_version":"22.1.0"}"#,
    )
    .unwrap();

    assert!(store.load_usable().unwrap().is_none());
    assert!(!store.path().exists(), "unusable bundle must be deleted");
}

#[test]
fn bundle_with_old_revision_is_not_usable() {
    let mut bundle = TokenBundle::from_session(&session(), "24.3.1");
    bundle.revision = Some(TOKEN_REVISION - 1);
    assert!(!bundle.is_usable());
    assert!(bundle.to_session().is_none());
}

#[test]
fn bundle_without_user_agent_or_version_is_not_usable() {
    let mut bundle = TokenBundle::from_session(&session(), "24.3.1");
    bundle.user_agent = None;
    assert!(!bundle.is_usable());

    let mut bundle = TokenBundle::from_session(&session(), "24.3.1");
    bundle.client_version = None;
    assert!(!bundle.is_usable());
}

#[test]
fn garbage_file_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "24.3.1");
    std::fs::write(store.path(), "{ not json").unwrap();

    assert!(store.load_usable().unwrap().is_none());
    assert!(!store.path().exists());
}

#[test]
fn legacy_timestamp_format_is_accepted() {
    let bundle: TokenBundle = serde_json::from_str(
        r#"{"access_token":"a","last_time_token_refreshed":"2022-01-01 17:00:00.123456","rev":1}"#,
    )
    .unwrap();
    assert_eq!(
        bundle.last_refreshed_at.unwrap().to_rfc3339(),
        "2022-01-01T17:00:00.123456+00:00"
    );

    let bundle: TokenBundle =
        serde_json::from_str(r#"{"last_time_token_refreshed":"None"}"#).unwrap();
    assert!(bundle.last_refreshed_at.is_none());
}

#[test]
fn loading_usable_bundle_adopts_its_version() {
    let dir = tempfile::tempdir().unwrap();
    let writer = TokenStore::new(dir.path(), "23.9.0");
    writer.save_session(&session()).unwrap();

    let reader = TokenStore::new(dir.path(), "24.11.0");
    reader.load_usable().unwrap().unwrap();
    assert_eq!(reader.client_version(), "23.9.0");
}

#[test]
fn varies_with_device_is_always_stale() {
    assert!(version_is_stale("Varies with device", "24.3.1"));
    assert!(version_is_stale("Varies with device", "1.0.0"));
}

#[test]
fn minor_distance_above_two_is_stale() {
    assert!(!version_is_stale("24.1.0", "24.3.5"));
    assert!(version_is_stale("24.1.0", "24.4.0"));
}

#[test]
fn major_increase_is_stale() {
    assert!(version_is_stale("23.12.0", "24.1.0"));
    assert!(!version_is_stale("24.3.0", "24.3.0"));
}

#[test]
fn unparsable_latest_version_is_treated_as_current() {
    assert!(!version_is_stale("24.3.0", "garbage"));
}

#[test]
fn stale_version_rebuilds_user_agent_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "Varies with device");
    let marketplace = FakeMarketplace::default();
    marketplace.restore_session(session());

    assert!(store.apply_latest_version(&marketplace, "24.11.0").unwrap());

    let ua = marketplace.session().user_agent;
    assert_eq!(ua, "TGTG/24.11.0 Dalvik/2.1.0 (Linux; U; Android 13; Pixel 7)");
    assert_eq!(store.client_version(), "24.11.0");

    let bundle = store.load().unwrap().unwrap();
    assert_eq!(bundle.user_agent.as_deref(), Some(ua.as_str()));
    assert_eq!(bundle.client_version.as_deref(), Some("24.11.0"));
}

#[test]
fn current_version_leaves_session_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path(), "24.3.1");
    let marketplace = FakeMarketplace::default();
    marketplace.restore_session(session());

    assert!(!store.apply_latest_version(&marketplace, "24.4.0").unwrap());
    assert_eq!(marketplace.session().user_agent, TEST_UA);
    assert!(!store.path().exists());
}
