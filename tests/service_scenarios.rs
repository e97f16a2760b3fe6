mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rollcall::cache::ProfileSyncService;
use rollcall::domain::entities::{ProfilePatch, UserProfile};
use rollcall::domain::normalize::normalize;

use support::{CountingStore, row};

fn service(store: &Arc<CountingStore>) -> ProfileSyncService {
    ProfileSyncService::builder(Arc::clone(store) as _).build()
}

fn recorder() -> (
    impl Fn(&UserProfile) + Send + Sync + 'static,
    Arc<Mutex<Vec<UserProfile>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&seen);
    let callback = move |profile: &UserProfile| {
        inner.lock().expect("recorder lock").push(profile.clone());
    };
    (callback, seen)
}

#[tokio::test(start_paused = true)]
async fn concurrent_lookups_share_one_slow_fetch() {
    let store = CountingStore::with_rows([row("42", "Ana", "Berisha")]);
    store.set_delay(Duration::from_secs(3));
    let service = service(&store);

    let started = tokio::time::Instant::now();
    let (first, second) = tokio::join!(service.get_user("42"), service.get_user("42"));

    assert_eq!(first, second);
    assert_eq!(first.display_name, "Ana Berisha");
    assert_eq!(first.initials, "AB");
    assert_eq!(store.fetch_by_id_calls(), 1);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(!service.is_fetching("42"));
}

#[tokio::test]
async fn many_callers_observe_the_same_profile() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    store.set_delay(Duration::from_millis(20));
    let service = service(&store);

    let lookups = (0..16).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.get_user("1").await })
    });
    let results = futures::future::join_all(lookups).await;

    let first = results[0].as_ref().expect("lookup task").clone();
    for result in results {
        assert_eq!(result.expect("lookup task"), first);
    }
    assert_eq!(store.fetch_by_id_calls(), 1);
    assert_eq!(service.in_flight_len(), 0);
}

#[tokio::test]
async fn cached_profiles_are_served_without_io() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    let service = service(&store);

    let fetched = service.get_user("1").await;
    let cached = service.get_user("1").await;

    assert_eq!(fetched, cached);
    assert_eq!(service.get("1"), Some(fetched));
    assert_eq!(store.fetch_by_id_calls(), 1);
}

#[tokio::test]
async fn missing_profile_comes_back_as_error_entity() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);

    let profile = service.get_user("404").await;

    assert_eq!(profile.id, "404");
    assert!(!profile.loading);
    assert!(profile.error.as_deref().is_some_and(|e| e.contains("not found")));
    assert_eq!(profile.display_name, "User");
    assert!(profile.email.is_none());
    assert!(service.is_cached("404"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_fetch_is_an_error_entity_and_can_be_retried() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    store.set_delay(Duration::from_secs(10));
    let service = service(&store);

    let timed_out = service.get_user("1").await;
    assert!(timed_out.error.as_deref().is_some_and(|e| e.contains("timed out")));
    assert!(!timed_out.loading);
    assert!(!service.is_fetching("1"));

    store.set_delay(Duration::ZERO);
    let retried = service.get_user("1").await;
    assert!(retried.error.is_none());
    assert_eq!(retried.display_name, "Ana Berisha");
    assert_eq!(store.fetch_by_id_calls(), 2);
}

#[tokio::test]
async fn refresh_twice_yields_equal_profiles() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    let service = service(&store);
    service.get_user("1").await;

    let first = service.refresh_user("1").await;
    let second = service.refresh_user("1").await;

    assert_eq!(first, second);
    assert_eq!(store.fetch_by_id_calls(), 3);
}

#[tokio::test]
async fn batch_lookup_makes_one_remote_call_for_uncached_ids() {
    let store = CountingStore::with_rows([
        row("1", "Ana", "Berisha"),
        row("2", "Bo", "Chen"),
        row("3", "Cy", "Diaz"),
    ]);
    let service = service(&store);
    service.set("1", normalize(&row("1", "Ana", "Berisha")));

    let ids: Vec<String> = ["1", "2", "3", "404", "2"]
        .into_iter()
        .map(String::from)
        .collect();
    let profiles = service.get_users(&ids).await;

    assert_eq!(profiles.len(), 4);
    assert_eq!(profiles["2"].display_name, "Bo Chen");
    assert_eq!(profiles["3"].initials, "CD");
    assert!(profiles["404"].error.is_some());
    assert_eq!(store.fetch_batch_calls(), 1);
    assert_eq!(store.fetch_by_id_calls(), 0);
    assert_eq!(store.batches(), vec![vec!["2", "3", "404"]]);
    assert_eq!(service.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn single_lookup_joins_an_outstanding_batch() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha"), row("2", "Bo", "Chen")]);
    store.set_delay(Duration::from_secs(1));
    let service = service(&store);

    let ids = vec!["1".to_string(), "2".to_string()];
    let (batch, single) = tokio::join!(service.get_users(&ids), service.get_user("2"));

    assert_eq!(batch["2"], single);
    assert_eq!(store.fetch_batch_calls(), 1);
    assert_eq!(store.fetch_by_id_calls(), 0);
}

#[tokio::test]
async fn failed_batch_folds_into_error_entities() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    store.fail_reads(true);
    let service = service(&store);

    let profiles = service
        .get_users(&["1".to_string(), "2".to_string()])
        .await;

    assert!(profiles.values().all(|profile| profile.error.is_some()));
    assert!(!service.is_fetching("1"));
}

#[tokio::test]
async fn subscribe_to_unknown_profile_sees_placeholder_then_data() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    let service = service(&store);
    let (callback, seen) = recorder();

    let _subscription = service.subscribe("1", callback);
    {
        let seen = seen.lock().expect("recorder lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], UserProfile::placeholder("1"));
        assert!(!seen[0].loading);
    }

    service.wait_idle().await;

    let seen = seen.lock().expect("recorder lock");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].display_name, "Ana Berisha");
    assert_eq!(store.fetch_by_id_calls(), 1);
}

#[tokio::test]
async fn panicking_subscriber_does_not_block_others() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);
    service.set("1", normalize(&row("1", "Ana", "Berisha")));

    let _faulty = service.subscribe("1", |_: &UserProfile| panic!("subscriber bug"));
    let (callback, seen) = recorder();
    let _healthy = service.subscribe("1", callback);

    assert!(service.set("1", normalize(&row("1", "Ana", "Kovac"))));

    let seen = seen.lock().expect("recorder lock");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].display_name, "Ana Kovac");
}

#[tokio::test]
async fn equal_set_does_not_notify() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);
    let profile = normalize(&row("1", "Ana", "Berisha"));
    service.set("1", profile.clone());

    let (callback, seen) = recorder();
    let _subscription = service.subscribe("1", callback);

    assert!(!service.set("1", profile));
    assert_eq!(seen.lock().expect("recorder lock").len(), 1);
}

#[tokio::test]
async fn dropping_the_last_subscription_removes_the_set() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);
    service.set("1", normalize(&row("1", "Ana", "Berisha")));

    let first = service.subscribe("1", |_: &UserProfile| {});
    let second = service.subscribe("1", |_: &UserProfile| {});
    assert_eq!(service.subscriber_count("1"), 2);

    first.unsubscribe();
    assert_eq!(service.subscriber_count("1"), 1);
    drop(second);
    assert_eq!(service.subscriber_count("1"), 0);
}

#[tokio::test]
async fn subscriber_sees_failure_instead_of_endless_loading() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);
    let (callback, seen) = recorder();

    let _subscription = service.subscribe("404", callback);
    service.wait_idle().await;

    let seen = seen.lock().expect("recorder lock");
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|profile| !profile.loading));
    assert!(seen[1].error.is_some());
}

#[tokio::test(start_paused = true)]
async fn clear_cache_discards_results_of_earlier_fetches() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    store.set_delay(Duration::from_secs(1));
    let service = service(&store);

    let pending = {
        let service = service.clone();
        tokio::spawn(async move { service.get_user("1").await })
    };
    while store.fetch_by_id_calls() == 0 {
        tokio::task::yield_now().await;
    }

    service.clear_cache();
    assert!(!service.is_fetching("1"));

    let profile = pending.await.expect("lookup task");
    assert_eq!(profile.display_name, "Ana Berisha");
    assert!(!service.is_cached("1"));
    assert_eq!(service.cached_len(), 0);
}

#[tokio::test]
async fn set_overrides_mismatched_entity_id() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);

    service.set("1", normalize(&row("2", "Ana", "Berisha")));

    assert_eq!(service.get("1").map(|profile| profile.id), Some("1".to_string()));
    assert!(!service.is_cached("2"));
}

#[tokio::test]
async fn avatar_reference_updates_locally_then_remotely() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    let service = ProfileSyncService::builder(Arc::clone(&store) as _)
        .config(rollcall::cache::CacheConfig {
            enable_enrichment: false,
            ..Default::default()
        })
        .build();

    service
        .update_avatar_reference("1", "avatars/1/new.png")
        .await;
    assert_eq!(
        service.get("1").and_then(|profile| profile.avatar_url),
        Some("avatars/1/new.png".to_string())
    );

    service.wait_idle().await;
    assert_eq!(
        store.updates(),
        vec![("1".to_string(), ProfilePatch::avatar_path("avatars/1/new.png"))]
    );
}

#[tokio::test]
async fn blank_avatar_reference_is_ignored() {
    let store = CountingStore::with_rows([row("1", "Ana", "Berisha")]);
    let service = service(&store);

    service.update_avatar_reference("1", "   ").await;
    service.wait_idle().await;

    assert!(store.updates().is_empty());
    assert_eq!(store.fetch_by_id_calls(), 0);
}

#[tokio::test]
async fn set_rederives_identity_strings() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);
    let (callback, seen) = recorder();
    let _subscription = service.subscribe("1", callback);

    service.set(
        "1",
        UserProfile {
            first_name: Some("Ana".to_string()),
            last_name: Some("Berisha".to_string()),
            ..UserProfile::placeholder("1")
        },
    );

    let profile = service.get("1").expect("cached after set");
    assert_eq!(profile.display_name, "Ana Berisha");
    assert_eq!(profile.initials, "AB");
    let seen = seen.lock().expect("recorder lock");
    let last = seen.last().expect("notified");
    assert_eq!(last.display_name, "Ana Berisha");
    assert_eq!(last.initials, "AB");
}

#[tokio::test]
async fn set_with_stale_display_name_is_corrected() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);
    let profile = normalize(&row("1", "Ana", "Berisha"));

    service.set(
        "1",
        UserProfile {
            last_name: Some("Kovac".to_string()),
            ..profile
        },
    );

    let cached = service.get("1").expect("cached after set");
    assert_eq!(cached.display_name, "Ana Kovac");
    assert_eq!(cached.initials, "AK");
}

#[tokio::test]
async fn avatar_reference_for_unknown_profile_is_not_written() {
    let store = CountingStore::with_rows([]);
    let service = service(&store);

    service.update_avatar_reference("404", "avatars/404/new.png").await;
    service.wait_idle().await;

    assert_eq!(store.fetch_by_id_calls(), 1);
    assert!(store.updates().is_empty());
    assert!(service.get("404").is_some_and(|profile| profile.error.is_some()));
    assert_eq!(service.get("404").and_then(|profile| profile.avatar_url), None);
}
