//! End-to-end scenario tests (§8): a real `upspin-server` router bound to a
//! loopback `TcpListener`, driven by the real `upspin-rpc`/`upspin-client`
//! client stack — no mocked transport, matching the integration-test
//! convention already used inside `upspin-rpc` itself (§8.1).

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use upspin_client::{DirClient, KeyClient, ServiceBinder, StoreClient};
use upspin_crypto::{Factotum, LocalFactotum};
use upspin_error::Kind;
use upspin_rpc::{ClientConfig, ClientIdentity, Security, TransportClient};
use upspin_types::{DirEntry, Endpoint, PathName, User, UserName};

fn user_name(s: &str) -> UserName {
    UserName::parse(s).expect("valid test user name")
}

/// Scenario (a): handshake + echo. A first call against a fresh server
/// mints a token and the call's payload round-trips intact.
#[tokio::test]
async fn handshake_mints_token_and_call_round_trips() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let transport = common::dial(&server.endpoint, "Key", identity.clone());
    let key = KeyClient::new(transport);

    let looked_up = key.lookup(&identity.user).await.unwrap();
    assert_eq!(looked_up.name, identity.user);
    assert_eq!(looked_up.public_key, factotum.public_key());
}

/// Scenario (a) extended across all three services: a record written
/// through one service's `Put` is visible through the same session's
/// subsequent calls, covering Key, Store and Dir in one authenticated
/// session per service.
#[tokio::test]
async fn put_then_get_round_trips_on_every_service() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let store = StoreClient::new(common::dial(&server.endpoint, "Store", identity.clone()));
    let ref_data = store.put(b"hello upspin".to_vec()).await.unwrap();
    let (data, got_ref, _locations) = store.get(&ref_data.reference).await.unwrap();
    assert_eq!(data, b"hello upspin");
    assert_eq!(got_ref.reference, ref_data.reference);

    let dir = DirClient::new(common::dial(&server.endpoint, "Dir", identity.clone()));
    let path = PathName::parse("alice@example.com/greeting.txt").unwrap();
    let entry = DirEntry::new_dir(path.clone(), 0, 0);
    let put = dir.put(&entry).await.unwrap();
    assert_eq!(put.name, path);

    let looked_up = dir.lookup(&path).await.unwrap();
    assert_eq!(looked_up.name, path);
    assert!(looked_up.sequence > 0, "Put assigns a fresh sequence/order");
}

/// §8 Property 4: minting many tokens across distinct handshakes never
/// collides — each successful handshake grows the server's session cache by
/// exactly one entry, which is only possible if every minted token is a
/// fresh cache key.
#[tokio::test]
async fn tokens_are_unique_across_many_handshakes() {
    let server = common::spawn().await;

    let mut seen_users = HashSet::new();
    for i in 0..25 {
        let (identity, factotum) =
            common::new_identity(&format!("user{i}@example.com"));
        server.seed(&identity.user, &factotum);
        let key = KeyClient::new(common::dial(&server.endpoint, "Key", identity.clone()));
        key.lookup(&identity.user).await.unwrap();

        assert_eq!(server.authenticator.session_count(), i + 1);
        seen_users.insert(identity.user.to_string());
    }
    assert_eq!(seen_users.len(), 25);
}

/// §8 Property 7: cache coherence. After `Key.Put`, a subsequent
/// `Key.Lookup` through the same cache reflects the new record even though
/// a stale entry was cached.
#[tokio::test]
async fn user_key_cache_reflects_put_even_with_a_warm_cache() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let key = KeyClient::new(common::dial(&server.endpoint, "Key", identity.clone()));
    let cache = upspin_client::UserKeyCache::new(
        key.clone(),
        16,
        std::time::Duration::from_secs(3600),
    );

    let first = cache.lookup(&identity.user).await.unwrap();
    assert_eq!(first.dirs.len(), 1);

    let mut updated = first.clone();
    updated.dirs.push(Endpoint::remote("dir2.example.com:443"));
    cache.put(&updated).await.unwrap();

    let second = cache.lookup(&identity.user).await.unwrap();
    assert_eq!(second.dirs.len(), 2, "cache must not serve the stale Put-invalidated entry");
}

/// §8 scenario (c): an `AuthRequest` whose signature doesn't verify is
/// rejected with `Upspin-Auth-Error` and no token, driven over raw HTTP
/// since the real `TransportClient` only ever signs correctly.
#[tokio::test]
async fn invalid_signature_is_rejected_with_auth_error_header() {
    let server = common::spawn().await;
    let alice = user_name("alice@example.com");
    let factotum = LocalFactotum::generate();
    let impostor = LocalFactotum::generate();
    server.seed(&alice, &factotum);

    let timestamp = upspin_rpc::auth::format_ansic(chrono::Utc::now());
    let msg = upspin_crypto::client_auth_message(alice.as_str(), &timestamp);
    let bad_sig = impostor.sign(&msg);

    let client = reqwest::Client::new();
    let body = upspin_rpc::message::encode_request(&()).unwrap();
    let response = client
        .post(format!("http://{}/api/Key.Endpoint", server.addr))
        .header(
            "Upspin-Auth-Request",
            format!(
                "{alice},{timestamp},{},{}",
                bad_sig.r_hex(),
                bad_sig.s_hex()
            ),
        )
        .body(body)
        .send()
        .await
        .unwrap();

    assert!(response.headers().get("Upspin-Auth-Error").is_some());
    assert!(response.headers().get("Upspin-Auth-Token").is_none());
}

/// §8 scenario (d): dialing a loopback destination without TLS succeeds;
/// dialing a non-loopback destination without TLS fails synchronously.
#[test]
fn insecure_dial_requires_a_loopback_destination() {
    let (identity, _factotum) = common::new_identity("alice@example.com");

    let mut loopback = ClientConfig::new(Endpoint::remote("127.0.0.1:1"), "Store", identity.clone());
    loopback.security = Security::NoSecurity;
    TransportClient::dial(loopback).expect("loopback insecure dial should succeed");

    let mut remote = ClientConfig::new(Endpoint::remote("203.0.113.1:1"), "Store", identity);
    remote.security = Security::NoSecurity;
    let err = TransportClient::dial(remote).unwrap_err();
    assert_eq!(err.kind, Kind::Io);
}

/// §8 scenario (e) / Property 6: proxy mutual auth symmetry. A client
/// configured as `alice@example.com` but proxying through a server whose own
/// identity is `proxy@example.com` must reject the reciprocal handshake,
/// because the server's signed name doesn't match the client's own user.
#[tokio::test]
async fn proxy_handshake_is_rejected_when_server_identity_mismatches_client() {
    let proxy_user = user_name("proxy@example.com");
    let proxy_factotum = Arc::new(LocalFactotum::generate());
    let server = common::spawn_with_identity(&proxy_user, Arc::clone(&proxy_factotum)).await;

    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);
    // The server's own identity must also resolve through its Key backend
    // for the reciprocal signature to be checkable.
    server.seed(&proxy_user, &proxy_factotum);

    let mut config = ClientConfig::new(server.endpoint.clone(), "Store", identity);
    config.security = Security::NoSecurity;
    config.proxy_for = Some(Endpoint::remote("store.example.com:443"));
    let client = TransportClient::dial(config).expect("dial should succeed");

    let err = client.ping(7).await.unwrap_err();
    assert_eq!(err.kind, Kind::Permission);
}

/// §8 scenario (f): a `Glob` pattern with fewer than two path elements that
/// targets another user's namespace returns `Private`, never `NotExist` —
/// it must not leak whether the namespace exists.
#[tokio::test]
async fn glob_outside_own_namespace_is_private_not_not_exist() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let dir = DirClient::new(common::dial(&server.endpoint, "Dir", identity));

    let err = dir.glob("bob@example.com").await.unwrap_err();
    assert_eq!(err.kind, Kind::Private);
}

/// §8 scenario (f), positive case: a `Glob` within the caller's own
/// namespace succeeds and only matches entries with the right arity.
#[tokio::test]
async fn glob_within_own_namespace_matches_by_pattern() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let dir = DirClient::new(common::dial(&server.endpoint, "Dir", identity));
    for name in ["notes.txt", "photo.png", "notes.md"] {
        let path = PathName::parse(format!("alice@example.com/{name}")).unwrap();
        dir.put(&DirEntry::new_dir(path, 0, 0)).await.unwrap();
    }

    let matches = dir.glob("alice@example.com/notes.*").await.unwrap();
    assert_eq!(matches.len(), 2);
    assert!(
        matches
            .iter()
            .all(|e| e.name.elements()[0].starts_with("notes."))
    );
}

/// Directory `Watch` (§4.10): the leading event carries no entry, and a
/// subsequent `Put` shows up as an upsert with a strictly increasing order.
#[tokio::test]
async fn watch_observes_leading_event_then_a_live_upsert() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let dir = DirClient::new(common::dial(&server.endpoint, "Dir", identity));
    let watched = PathName::parse("alice@example.com/dir").unwrap();
    let mut subscription = dir.watch(&watched, -1).await.unwrap();

    let leading = subscription.recv().await.unwrap().unwrap();
    assert!(leading.error.is_none() && leading.entry.is_none());

    let path = PathName::parse("alice@example.com/dir/file").unwrap();
    dir.put(&DirEntry::new_dir(path.clone(), 0, 0)).await.unwrap();

    let event = subscription.recv().await.unwrap().unwrap();
    assert!(!event.delete);
    assert_eq!(event.entry.unwrap().name, path);
    assert!(event.order > 0);

    subscription.close();
}

/// Directory `Watch` with `start_order == 0` (§4.10: "start from current
/// state snapshot"): entries already in the subtree are replayed before any
/// live mutation, and a subsequent `Put` still arrives exactly once, not
/// duplicated by the snapshot.
#[tokio::test]
async fn watch_from_snapshot_replays_existing_entries_once() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let dir = DirClient::new(common::dial(&server.endpoint, "Dir", identity));
    let watched = PathName::parse("alice@example.com/dir").unwrap();
    let existing = PathName::parse("alice@example.com/dir/existing").unwrap();
    dir.put(&DirEntry::new_dir(existing.clone(), 0, 0))
        .await
        .unwrap();

    let mut subscription = dir.watch(&watched, 0).await.unwrap();

    let leading = subscription.recv().await.unwrap().unwrap();
    assert!(leading.error.is_none() && leading.entry.is_none());

    let snapshot_event = subscription.recv().await.unwrap().unwrap();
    assert_eq!(snapshot_event.entry.unwrap().name, existing);

    let new_path = PathName::parse("alice@example.com/dir/new").unwrap();
    dir.put(&DirEntry::new_dir(new_path.clone(), 0, 0))
        .await
        .unwrap();
    let live_event = subscription.recv().await.unwrap().unwrap();
    assert_eq!(live_event.entry.unwrap().name, new_path);

    subscription.close();
}

/// §4.5: repeated `ServiceBinder::bind_dir`/`bind_store` calls for the same
/// `(user, endpoint)` converge on the same underlying [`TransportClient`]
/// instead of redialing, because the binder holds its `BoundService` alive
/// for as long as the binder itself lives.
#[tokio::test]
async fn service_binder_reuses_the_same_connection_across_binds() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let binder = ServiceBinder::new(identity.clone(), server.endpoint.clone(), Security::NoSecurity)
        .expect("binder construction dials lazily and should succeed");

    let first_dir = binder.bind_dir(&identity.user).await.unwrap();
    let second_dir = binder.bind_dir(&identity.user).await.unwrap();
    assert!(
        first_dir.transport().is_same_connection(second_dir.transport()),
        "a second bind_dir for the same user must reuse the cached connection"
    );

    let first_store = binder.bind_store(&identity.user).await.unwrap();
    let second_store = binder.bind_store(&identity.user).await.unwrap();
    assert!(
        first_store.transport().is_same_connection(second_store.transport()),
        "a second bind_store for the same user must reuse the cached connection"
    );
}

/// §8 Property 9: `Close` is safe to call more than once, even on a client
/// that has already performed real network I/O against a live server.
#[tokio::test]
async fn close_after_live_use_is_idempotent() {
    let server = common::spawn().await;
    let (identity, factotum) = common::new_identity("alice@example.com");
    server.seed(&identity.user, &factotum);

    let transport = common::dial(&server.endpoint, "Key", identity.clone());
    let key = KeyClient::new(transport.clone());
    key.lookup(&identity.user).await.unwrap();

    transport.close();
    transport.close();
}
