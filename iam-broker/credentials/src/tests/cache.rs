use super::*;
use crate::{Cache, CacheMetrics, Config, Error};
use tokio::task::JoinSet;

fn config() -> Config {
    Config::default()
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "must be less than session duration")]
fn refresh_must_leave_a_ttl() {
    let config = Config {
        session_refresh: Duration::from_secs(15 * 60),
        ..config()
    };
    let _ = Cache::new(config, Gateway::open(), CacheMetrics::default());
}

#[tokio::test(flavor = "current_thread")]
async fn caches_issued_credentials() {
    let _tracing = init_tracing();
    let gateway = Gateway::open();
    let metrics = CacheMetrics::default();
    let (cache, _expiring) = Cache::new(config(), gateway.clone(), metrics.clone());
    let id = identity("billing-reader");

    let first = cache.credentials_for_role(&id).await.expect("must issue");
    let second = cache.credentials_for_role(&id).await.expect("must be cached");
    assert_eq!(first, second);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(metrics.misses(), 1);
    assert_eq!(metrics.hits(), 1);

    let request = gateway.last_request().unwrap();
    assert_eq!(request.role_arn, format!("{ROLE_PREFIX}billing-reader"));
    assert_eq!(request.session_name, "iam-broker");
    assert_eq!(request.duration, Duration::from_secs(15 * 60));
}

#[tokio::test(flavor = "current_thread")]
async fn identities_are_cached_separately() {
    let gateway = Gateway::open();
    let (cache, _expiring) = Cache::new(config(), gateway.clone(), CacheMetrics::default());

    let plain = identity("billing-reader");
    let mut tagged = identity("billing-reader");
    tagged.session_name = Some("billing".to_string());
    tagged
        .session_tags
        .insert("team".to_string(), "billing".to_string());

    let a = cache.credentials_for_role(&plain).await.unwrap();
    let b = cache.credentials_for_role(&tagged).await.unwrap();
    assert_ne!(a.access_key_id, b.access_key_id);
    assert_eq!(gateway.calls(), 2);

    let request = gateway.last_request().unwrap();
    assert_eq!(request.session_name, "billing");
    assert_eq!(
        request.session_tags.get("team").map(String::as_str),
        Some("billing")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_requests_share_one_fetch() {
    let (gate, gateway) = Gateway::gated();
    let (cache, _expiring) = Cache::new(config(), gateway.clone(), CacheMetrics::default());
    let id = identity("billing-reader");

    let mut requests = JoinSet::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let id = id.clone();
        requests.spawn(async move { cache.credentials_for_role(&id).await });
    }
    eventually(|| gateway.calls() > 0).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    gate.send_replace(true);

    let mut keys = Vec::new();
    while let Some(res) = requests.join_next().await {
        keys.push(res.unwrap().expect("must issue").access_key_id);
    }
    assert_eq!(keys.len(), 10);
    assert!(keys.iter().all(|k| *k == keys[0]));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn failures_are_shared_but_not_cached() {
    let (gate, gateway) = Gateway::gated();
    let gateway = gateway.failing(1);
    let metrics = CacheMetrics::default();
    let (cache, _expiring) = Cache::new(config(), gateway.clone(), metrics.clone());
    let id = identity("billing-reader");

    let mut requests = JoinSet::new();
    for _ in 0..3 {
        let cache = cache.clone();
        let id = id.clone();
        requests.spawn(async move { cache.credentials_for_role(&id).await });
    }
    eventually(|| gateway.calls() > 0).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    gate.send_replace(true);

    while let Some(res) = requests.join_next().await {
        match res.unwrap() {
            Err(Error::Issuance { role, error }) => {
                assert_eq!(role, format!("{ROLE_PREFIX}billing-reader"));
                assert!(error.to_string().contains("AccessDenied"));
            }
            res => panic!("unexpected result: {res:?}"),
        }
    }
    assert_eq!(gateway.calls(), 1);
    assert!(cache.is_empty(), "failures must not be cached");

    cache
        .credentials_for_role(&id)
        .await
        .expect("the next request must retry");
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn abandoned_requests_do_not_cancel_the_fetch() {
    let (gate, gateway) = Gateway::gated();
    let (cache, _expiring) = Cache::new(config(), gateway.clone(), CacheMetrics::default());
    let id = identity("billing-reader");

    time::timeout(Duration::from_millis(100), cache.credentials_for_role(&id))
        .await
        .expect_err("the gateway must not respond yet");
    assert_eq!(gateway.calls(), 1);

    gate.send_replace(true);
    eventually(|| cache.cached(&id).is_some()).await;
    cache.credentials_for_role(&id).await.unwrap();
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn expired_entries_are_evicted_and_announced() {
    let gateway = Gateway::open();
    let metrics = CacheMetrics::default();
    let (cache, expiring) = Cache::new(config(), gateway.clone(), metrics.clone());
    let id = identity("billing-reader");

    let issued = cache.credentials_for_role(&id).await.unwrap();
    assert_eq!(config().ttl(), Duration::from_secs(10 * 60));

    time::advance(Duration::from_secs(9 * 60)).await;
    assert_eq!(cache.evict_expired(), 0);
    assert!(cache.cached(&id).is_some());

    time::advance(Duration::from_secs(60)).await;
    assert_eq!(cache.evict_expired(), 1);
    assert!(cache.cached(&id).is_none());

    let notification = expiring.try_recv().expect("must announce expiry");
    assert_eq!(notification.identity, id);
    assert_eq!(notification.credentials, issued);

    let renewed = cache.credentials_for_role(&id).await.unwrap();
    assert_ne!(renewed.access_key_id, issued.access_key_id);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn expired_entries_are_refetched_before_sweeping() {
    let gateway = Gateway::open();
    let (cache, expiring) = Cache::new(config(), gateway.clone(), CacheMetrics::default());
    let id = identity("billing-reader");

    let issued = cache.credentials_for_role(&id).await.unwrap();
    time::advance(Duration::from_secs(11 * 60)).await;

    let renewed = cache.credentials_for_role(&id).await.unwrap();
    assert_ne!(renewed.access_key_id, issued.access_key_id);
    assert_eq!(
        expiring.try_recv().map(|e| e.identity),
        Some(id),
        "eviction on access must still announce the expiry"
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn full_expiry_buffer_drops() {
    let gateway = Gateway::open();
    let metrics = CacheMetrics::default();
    let (cache, expiring) = Cache::new(config(), gateway, metrics.clone());

    for role in ["a", "b", "c"] {
        cache.credentials_for_role(&identity(role)).await.unwrap();
    }
    time::advance(Duration::from_secs(11 * 60)).await;
    assert_eq!(cache.evict_expired(), 3);

    assert_eq!(metrics.expiring_dropped(), 2);
    assert!(expiring.try_recv().is_some());
    assert!(expiring.try_recv().is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn sweeper_evicts_until_shutdown() {
    let gateway = Gateway::open();
    let (cache, expiring) = Cache::new(config(), gateway, CacheMetrics::default());
    let id = identity("billing-reader");
    cache.credentials_for_role(&id).await.unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let sweeper = tokio::spawn(cache.clone().sweep(Duration::from_secs(1), async move {
        let _ = shutdown_rx.await;
    }));

    time::sleep(Duration::from_secs(10 * 60 + 2)).await;
    assert!(cache.is_empty());
    assert_eq!(expiring.try_recv().map(|e| e.identity), Some(id));

    drop(shutdown_tx);
    time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper must stop")
        .unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn invalidation_does_not_announce() {
    let gateway = Gateway::open();
    let (cache, expiring) = Cache::new(config(), gateway.clone(), CacheMetrics::default());
    let id = identity("billing-reader");

    cache.credentials_for_role(&id).await.unwrap();
    assert!(cache.invalidate(&id));
    assert!(!cache.invalidate(&id));
    assert!(expiring.try_recv().is_none());

    cache.credentials_for_role(&id).await.unwrap();
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn invalidated_fetches_are_delivered_but_not_cached() {
    let (gate, gateway) = Gateway::gated();
    let (cache, _expiring) = Cache::new(config(), gateway.clone(), CacheMetrics::default());
    let id = identity("billing-reader");

    let request = tokio::spawn({
        let cache = cache.clone();
        let id = id.clone();
        async move { cache.credentials_for_role(&id).await }
    });
    eventually(|| gateway.calls() > 0).await;
    assert!(cache.invalidate(&id));
    gate.send_replace(true);

    request
        .await
        .unwrap()
        .expect("waiters must receive the result");
    assert!(cache.cached(&id).is_none());
}
