//! Concurrency properties of presence tracking and fan-out.

use parley_core::{
    BroadcastEvent, BroadcastHub, HubConfig, PresenceRegistry, PresenceTransition, Session,
    SessionId, UserIdentity,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

fn observer(hub: &BroadcastHub) -> tokio::sync::mpsc::Receiver<Arc<BroadcastEvent>> {
    hub.register(&Session::new(UserIdentity::new("observer", "observer", true)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn distinct_users_each_transition_once() {
    let registry = Arc::new(PresenceRegistry::new());
    let sessions: Vec<(String, SessionId)> = (0..100)
        .map(|i| (format!("user-{i}"), SessionId::generate()))
        .collect();

    let mut adds = JoinSet::new();
    for (user, session) in sessions.clone() {
        let registry = registry.clone();
        adds.spawn(async move { registry.add_session(&user, session) });
    }

    let mut online = HashSet::new();
    while let Some(result) = adds.join_next().await {
        match result.unwrap() {
            Some(PresenceTransition::Online(user)) => assert!(online.insert(user)),
            other => panic!("unexpected transition: {other:?}"),
        }
    }
    assert_eq!(online.len(), 100);
    assert_eq!(registry.stats().online_users, 100);

    let mut removes = JoinSet::new();
    for (user, session) in sessions {
        let registry = registry.clone();
        removes.spawn(async move { registry.remove_session(&user, session) });
    }

    let mut offline = HashSet::new();
    while let Some(result) = removes.join_next().await {
        match result.unwrap() {
            Some(PresenceTransition::Offline(user)) => assert!(offline.insert(user)),
            other => panic!("unexpected transition: {other:?}"),
        }
    }
    assert_eq!(offline, online);
    assert_eq!(registry.stats().online_users, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_sessions_announce_online_once() {
    let registry = Arc::new(PresenceRegistry::new());
    let hub = Arc::new(BroadcastHub::new());
    let mut rx = observer(&hub);
    let alice = Arc::new(UserIdentity::new("u-1", "alice", true));

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let registry = registry.clone();
        let hub = hub.clone();
        let alice = alice.clone();
        tasks.spawn(async move {
            registry.add_session_with(&alice.id, SessionId::generate(), |t| {
                hub.announce(BroadcastEvent::from_transition(t, &alice), None);
            })
        });
    }

    let mut transitions = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().is_some() {
            transitions += 1;
        }
    }

    assert_eq!(transitions, 1);
    assert_eq!(registry.session_count("u-1"), 32);
    assert!(matches!(
        rx.try_recv().as_deref(),
        Ok(BroadcastEvent::UserOnline { .. })
    ));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn churn_for_one_user_keeps_announcements_alternating() {
    let registry = Arc::new(PresenceRegistry::new());
    let hub = Arc::new(BroadcastHub::with_config(HubConfig {
        queue_capacity: 100_000,
    }));
    let mut rx = observer(&hub);
    let alice = Arc::new(UserIdentity::new("u-1", "alice", true));

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let registry = registry.clone();
        let hub = hub.clone();
        let alice = alice.clone();
        tasks.spawn(async move {
            for _ in 0..200 {
                let session = SessionId::generate();
                registry.add_session_with(&alice.id, session, |t| {
                    hub.announce(BroadcastEvent::from_transition(t, &alice), None);
                });
                tokio::task::yield_now().await;
                registry.remove_session_with(&alice.id, session, |t| {
                    hub.announce(BroadcastEvent::from_transition(t, &alice), None);
                });
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let mut online = false;
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        match &*event {
            BroadcastEvent::UserOnline { .. } => {
                assert!(!online, "online announced twice in a row");
                online = true;
            }
            BroadcastEvent::UserOffline { .. } => {
                assert!(online, "offline announced while already offline");
                online = false;
            }
            other => panic!("unexpected event: {other:?}"),
        }
        count += 1;
    }

    assert!(count > 0);
    assert!(!online);
    assert!(!registry.is_online("u-1"));
    assert_eq!(hub.dropped_events(), 0);
}
