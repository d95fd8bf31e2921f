//! Unit tests for the plugin registry.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;

fn namespace(name: &str) -> Namespace {
    Namespace::new(name).expect("valid namespace")
}

fn request(registry: &PluginRegistry, name: &str, endpoint: &str) -> RegistrationRequest {
    RegistrationRequest {
        namespace: namespace(name),
        endpoint: endpoint.to_owned(),
        connection_id: registry.next_connection_id(),
        reclaim: None,
        actions: Vec::new(),
    }
}

#[fixture]
fn registry() -> PluginRegistry {
    PluginRegistry::with_reserved([namespace("time"), namespace("date"), namespace("day")])
}

#[rstest]
fn sequential_registrations_increment_generations(registry: PluginRegistry) {
    for expected in 1..=5 {
        let generation = registry.register(request(&registry, "music", "127.0.0.1:8081"));
        assert_eq!(generation, expected);
    }
    let current = registry.lookup(&namespace("music")).expect("registered");
    assert_eq!(current.generation(), 5);
}

#[rstest]
fn concurrent_registrations_yield_distinct_generations(registry: PluginRegistry) {
    let registry = Arc::new(registry);
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..25)
                    .map(|_| registry.register(request(&registry, "music", "127.0.0.1:8081")))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut generations: Vec<u64> = workers
        .into_iter()
        .flat_map(|worker| worker.join().expect("worker panicked"))
        .collect();
    generations.sort_unstable();
    assert_eq!(generations, (1..=200).collect::<Vec<_>>());
    let current = registry.lookup(&namespace("music")).expect("registered");
    assert_eq!(current.generation(), 200);
}

#[rstest]
fn mark_stale_is_idempotent(registry: PluginRegistry) {
    let first = request(&registry, "weather", "127.0.0.1:8080");
    let connection = first.connection_id;
    registry.register(first);
    assert!(registry.is_current(connection));

    let removed = registry.mark_stale(connection).expect("first removal");
    assert_eq!(removed.generation(), 1);
    assert!(registry.mark_stale(connection).is_none());
    assert!(!registry.is_current(connection));
    assert!(registry.lookup(&namespace("weather")).is_none());
}

#[rstest]
fn mark_stale_ignores_superseded_connections(registry: PluginRegistry) {
    let old = request(&registry, "weather", "127.0.0.1:8080");
    let old_connection = old.connection_id;
    registry.register(old);
    registry.register(request(&registry, "weather", "127.0.0.1:9090"));

    assert!(registry.mark_stale(old_connection).is_none());
    let current = registry.lookup(&namespace("weather")).expect("still registered");
    assert_eq!(current.endpoint(), "127.0.0.1:9090");
    assert_eq!(current.generation(), 2);
}

#[rstest]
fn generations_keep_increasing_after_staleness(registry: PluginRegistry) {
    let first = request(&registry, "music", "127.0.0.1:8081");
    let connection = first.connection_id;
    registry.register(first);
    registry.mark_stale(connection);
    let generation = registry
        .claim(request(&registry, "music", "127.0.0.1:8081"))
        .expect("namespace is free again");
    assert_eq!(generation, 2);
}

#[rstest]
fn lookup_never_returns_a_stale_registration(registry: PluginRegistry) {
    let registry = Arc::new(registry);
    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    if let Some(found) = registry.lookup(&namespace("music")) {
                        observed.push(found.connection_id());
                    }
                }
                observed
            })
        })
        .collect();

    let mut staled = Vec::new();
    for _ in 0..200 {
        let next = request(&registry, "music", "127.0.0.1:8081");
        let connection = next.connection_id;
        registry.register(next);
        registry.mark_stale(connection);
        staled.push(connection);
        // Once mark_stale has returned, no reader may observe the connection.
        assert!(
            registry
                .lookup(&namespace("music"))
                .is_none_or(|found| found.connection_id() != connection)
        );
    }
    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().expect("reader panicked");
    }
    assert!(registry.lookup(&namespace("music")).is_none());
}

#[rstest]
fn second_live_claim_conflicts(registry: PluginRegistry) {
    registry
        .claim(request(&registry, "music", "127.0.0.1:8081"))
        .expect("first claim wins");
    let error = registry
        .claim(request(&registry, "music", "127.0.0.1:9999"))
        .expect_err("second claim conflicts");
    assert_eq!(
        error,
        ClaimError::Conflict {
            namespace: namespace("music"),
            generation: 1
        }
    );
    let current = registry.lookup(&namespace("music")).expect("registered");
    assert_eq!(current.endpoint(), "127.0.0.1:8081");
}

#[rstest]
fn reclaim_token_supersedes_live_registration(registry: PluginRegistry) {
    let first = request(&registry, "music", "127.0.0.1:8081");
    let old_connection = first.connection_id;
    let generation = registry.claim(first).expect("first claim");

    let mut reclaim = request(&registry, "music", "127.0.0.1:8082");
    reclaim.reclaim = Some(generation);
    let new_connection = reclaim.connection_id;
    assert_eq!(registry.claim(reclaim).expect("reclaim succeeds"), 2);
    assert!(!registry.is_current(old_connection));
    assert!(registry.is_current(new_connection));
}

#[rstest]
fn wrong_reclaim_token_conflicts(registry: PluginRegistry) {
    registry
        .claim(request(&registry, "music", "127.0.0.1:8081"))
        .expect("first claim");
    let mut reclaim = request(&registry, "music", "127.0.0.1:8082");
    reclaim.reclaim = Some(7);
    assert!(matches!(
        registry.claim(reclaim),
        Err(ClaimError::Conflict { .. })
    ));
}

#[rstest]
#[case("time")]
#[case("date")]
#[case("day")]
fn reserved_namespaces_cannot_be_claimed(registry: PluginRegistry, #[case] name: &str) {
    let error = registry
        .claim(request(&registry, name, "127.0.0.1:8081"))
        .expect_err("reserved");
    assert!(matches!(error, ClaimError::Reserved { .. }));
    assert!(registry.is_reserved(&namespace(name)));
}

#[rstest]
fn subscribers_observe_events_in_order(registry: PluginRegistry) {
    let events = registry.subscribe();
    let first = request(&registry, "music", "127.0.0.1:8081");
    let first_connection = first.connection_id;
    registry.register(first);
    let second = request(&registry, "music", "127.0.0.1:8082");
    let second_connection = second.connection_id;
    registry.register(second);
    registry.mark_stale(second_connection);

    let received: Vec<RegistryEvent> = (0..4)
        .map(|_| {
            events
                .recv_timeout(Duration::from_secs(1))
                .expect("event should arrive")
        })
        .collect();
    assert_eq!(
        received,
        vec![
            RegistryEvent::Registered {
                namespace: namespace("music"),
                generation: 1,
                connection_id: first_connection,
            },
            RegistryEvent::Stale {
                namespace: namespace("music"),
                generation: 1,
                connection_id: first_connection,
            },
            RegistryEvent::Registered {
                namespace: namespace("music"),
                generation: 2,
                connection_id: second_connection,
            },
            RegistryEvent::Stale {
                namespace: namespace("music"),
                generation: 2,
                connection_id: second_connection,
            },
        ]
    );
}

#[rstest]
fn dropped_subscribers_are_pruned(registry: PluginRegistry) {
    drop(registry.subscribe());
    registry.register(request(&registry, "music", "127.0.0.1:8081"));
    assert!(registry.read().subscribers.is_empty());
}

#[rstest]
fn snapshot_lists_entries_by_namespace(registry: PluginRegistry) {
    registry.register(request(&registry, "weather", "127.0.0.1:8080"));
    registry.register(request(&registry, "music", "127.0.0.1:8081"));
    let names: Vec<String> = registry
        .snapshot()
        .into_iter()
        .map(|entry| entry.namespace.to_string())
        .collect();
    assert_eq!(names, ["music", "weather"]);
}

#[test]
fn undeclared_actions_are_served() {
    let registry = PluginRegistry::new();
    let mut declared = request(&registry, "music", "127.0.0.1:8081");
    declared.actions = vec!["play".to_owned()];
    registry.register(declared);
    let registration = registry.lookup(&namespace("music")).expect("registered");
    assert!(registration.serves("play"));
    assert!(!registration.serves("pause"));

    registry.register(request(&registry, "weather", "127.0.0.1:8080"));
    let open = registry.lookup(&namespace("weather")).expect("registered");
    assert!(open.serves("anything"));
}

#[rstest]
fn stale_namespaces_resolve_as_unavailable(registry: PluginRegistry) {
    let first = request(&registry, "weather", "127.0.0.1:8080");
    let connection = first.connection_id;
    registry.register(first);
    registry.mark_stale(connection);

    assert!(registry.lookup(&namespace("weather")).is_none());
    assert_eq!(
        registry.resolve(&namespace("weather")),
        Resolution::Unavailable {
            last_endpoint: Some("127.0.0.1:8080".to_owned())
        }
    );
    assert_eq!(registry.resolve(&namespace("music")), Resolution::Unknown);
}

#[rstest]
fn reregistration_clears_the_retired_entry(registry: PluginRegistry) {
    let first = request(&registry, "weather", "127.0.0.1:8080");
    let connection = first.connection_id;
    registry.register(first);
    registry.mark_stale(connection);
    registry.register(request(&registry, "weather", "127.0.0.1:9090"));

    let Resolution::Live(live) = registry.resolve(&namespace("weather")) else {
        panic!("weather should be live again");
    };
    assert_eq!(live.endpoint(), "127.0.0.1:9090");
    assert_eq!(live.generation(), 2);
}

#[rstest]
fn supervised_namespaces_are_known_before_registering(registry: PluginRegistry) {
    registry.supervise(namespace("weather"), vec!["get".to_owned()]);

    assert_eq!(
        registry.resolve(&namespace("weather")),
        Resolution::Unavailable {
            last_endpoint: None
        }
    );
    assert!(registry.permits(&namespace("weather"), "get"));
    assert!(!registry.permits(&namespace("weather"), "forecast"));
    assert!(registry.permits(&namespace("music"), "play"));
}

#[rstest]
fn supervised_namespaces_without_actions_permit_everything(registry: PluginRegistry) {
    registry.supervise(namespace("weather"), Vec::new());
    assert!(registry.permits(&namespace("weather"), "anything"));
}
