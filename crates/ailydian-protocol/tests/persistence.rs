//! Restart, storage failure and concurrency behavior

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use ailydian_core::{
    storage::{namespace, MemoryStore},
    ProtocolConfig,
};
use ailydian_protocol::{Envelope, ErrorKind, MemoryDirectory, SignalContext};
use common::{party, party_with, FlakyStore};

#[test_log::test(tokio::test)]
async fn sessions_survive_restart() {
    let directory = Arc::new(MemoryDirectory::new());
    let store = Arc::new(MemoryStore::new());
    let bob = party("bob", &directory).await;

    let alice = SignalContext::new(ProtocolConfig::default(), "alice", store.clone(), directory.clone()).unwrap();
    let device = alice.initialize().await.unwrap();
    let msg = alice.encrypt_message("bob", "before restart").await.unwrap();
    bob.ctx.decrypt_message("alice", &msg).await.unwrap();
    drop(alice);

    let alice = SignalContext::new(ProtocolConfig::default(), "alice", store, directory.clone()).unwrap();
    assert_eq!(alice.initialize().await.unwrap(), device);
    assert!(alice.has_session("bob").await.unwrap());

    let msg = alice.encrypt_message("bob", "after restart").await.unwrap();
    assert_eq!(
        bob.ctx.decrypt_message("alice", &msg).await.unwrap(),
        "after restart"
    );

    let reply = bob.ctx.encrypt_message("alice", "welcome back").await.unwrap();
    assert_eq!(alice.decrypt_message("bob", &reply).await.unwrap(), "welcome back");
}

#[test_log::test(tokio::test)]
async fn failed_persist_on_send_keeps_previous_state() {
    let directory = Arc::new(MemoryDirectory::new());
    let bob = party("bob", &directory).await;
    let store = Arc::new(FlakyStore::default());
    let alice = SignalContext::new(ProtocolConfig::default(), "alice", store.clone(), directory.clone()).unwrap();
    alice.initialize().await.unwrap();

    let first = alice.encrypt_bytes("bob", b"first").await.unwrap();

    store.fail_writes(true);
    let err = alice.encrypt_bytes("bob", b"lost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    store.fail_writes(false);

    let second = alice.encrypt_bytes("bob", b"second").await.unwrap();
    assert_eq!(Envelope::decode(&second).unwrap().message.counter, 1);

    assert_eq!(bob.ctx.decrypt_bytes("alice", &first).await.unwrap().as_slice(), b"first");
    assert_eq!(bob.ctx.decrypt_bytes("alice", &second).await.unwrap().as_slice(), b"second");
}

#[test_log::test(tokio::test)]
async fn failed_persist_on_receive_allows_retry() {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = party("alice", &directory).await;
    let store = Arc::new(FlakyStore::default());
    let bob = SignalContext::new(ProtocolConfig::default(), "bob", store.clone(), directory.clone()).unwrap();
    bob.initialize().await.unwrap();
    directory.publish("bob", bob.publish_bundle().await.unwrap());

    let msg = alice.ctx.encrypt_bytes("bob", b"hello").await.unwrap();

    store.fail_writes(true);
    let err = bob.decrypt_bytes("alice", &msg).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert!(!bob.has_session("alice").await.unwrap());
    store.fail_writes(false);

    assert_eq!(bob.decrypt_bytes("alice", &msg).await.unwrap().as_slice(), b"hello");
    assert!(bob.has_session("alice").await.unwrap());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_sends_get_distinct_counters() {
    let directory = Arc::new(MemoryDirectory::new());
    let alice = Arc::new(party("alice", &directory).await);
    let bob = party("bob", &directory).await;

    let tasks = (0..10).map(|i| {
        let alice = alice.clone();
        tokio::spawn(async move {
            alice
                .ctx
                .encrypt_bytes("bob", format!("msg {}", i).as_bytes())
                .await
                .unwrap()
        })
    });
    let envelopes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let counters: HashSet<u32> = envelopes
        .iter()
        .map(|e| Envelope::decode(e).unwrap().message.counter)
        .collect();
    assert_eq!(counters, (0..10).collect());

    for envelope in envelopes.iter().rev() {
        bob.ctx.decrypt_bytes("alice", envelope).await.unwrap();
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_initialize_provisions_once() {
    let ctx = Arc::new(
        SignalContext::new(
            ProtocolConfig::default(),
            "alice",
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDirectory::new()),
        )
        .unwrap(),
    );

    let tasks = (0..4).map(|_| {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.initialize().await.unwrap() })
    });
    let ids: HashSet<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(ids.len(), 1);
}

#[test_log::test(tokio::test)]
async fn publishing_replenishes_the_pool() {
    let config = ProtocolConfig {
        pre_key_batch_size: 4,
        pre_key_low_water_mark: 2,
        pre_key_replenish_count: 3,
        ..ProtocolConfig::default()
    };
    let directory = Arc::new(MemoryDirectory::new());
    let bob = party_with("bob", &directory, config).await;

    let mut ids = Vec::new();
    for _ in 0..6 {
        let bundle = bob.ctx.publish_bundle().await.unwrap();
        ids.push(bundle.one_time_pre_key.unwrap().id);
    }

    // key 1 went out when the party was set up
    assert_eq!(ids, vec![2, 3, 4, 5, 6, 7]);
    assert!(!bob.ctx.rotate_signed_pre_key_if_due().await.unwrap());
}

#[test_log::test(tokio::test)]
async fn failed_session_write_leaves_no_identity_pin() {
    let directory = Arc::new(MemoryDirectory::new());
    let bob = party("bob", &directory).await;
    let store = Arc::new(FlakyStore::default());
    let alice = SignalContext::new(ProtocolConfig::default(), "alice", store.clone(), directory.clone()).unwrap();
    alice.initialize().await.unwrap();

    store.fail_writes_to(Some(namespace::SESSIONS));
    let err = alice.encrypt_bytes("bob", b"lost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert!(alice.peer_identity("bob").await.unwrap().is_none());
    assert!(!alice.has_session("bob").await.unwrap());

    store.fail_writes_to(None);
    let msg = alice.encrypt_bytes("bob", b"kept").await.unwrap();
    assert!(alice.peer_identity("bob").await.unwrap().is_some());
    assert_eq!(bob.ctx.decrypt_bytes("alice", &msg).await.unwrap().as_slice(), b"kept");
}

#[test_log::test(tokio::test)]
async fn session_identity_guards_handshakes_without_a_pin() {
    let directory = Arc::new(MemoryDirectory::new());
    let bob = party("bob", &directory).await;
    let store = Arc::new(FlakyStore::default());
    let alice = SignalContext::new(ProtocolConfig::default(), "alice", store.clone(), directory.clone()).unwrap();
    alice.initialize().await.unwrap();
    directory.publish("alice", alice.publish_bundle().await.unwrap());

    store.fail_writes_to(Some(namespace::IDENTITIES));
    let msg = alice.encrypt_bytes("bob", b"hi").await.unwrap();
    bob.ctx.decrypt_bytes("alice", &msg).await.unwrap();
    assert!(alice.peer_identity("bob").await.unwrap().is_none());

    let impostor = SignalContext::new(
        ProtocolConfig::default(),
        "bob",
        Arc::new(MemoryStore::new()),
        directory.clone(),
    )
    .unwrap();
    impostor.initialize().await.unwrap();
    let forged = impostor.encrypt_bytes("alice", b"trust me").await.unwrap();

    let err = alice.decrypt_bytes("bob", &forged).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Untrusted);
}
