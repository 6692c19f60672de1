mod common;

use common::strategies::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storefront_data::cache::TtlCache;
use storefront_data::security::ScanOutcome;
use storefront_data::{
    Clock, IncidentKind, IncidentLog, ManualClock, OperationDescriptor, RateLimiter,
    SuspiciousInputScanner,
};

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(0))
}

proptest! {
    /// Property: a cached value is returned until its TTL elapses, then never again
    #[test]
    fn cache_entries_are_fresh_until_ttl(
        key in "[a-z]{1,16}",
        value in any::<i64>(),
        ttl_ms in 1u64..100_000,
        probe_ms in 0u64..200_000,
    ) {
        let clock = manual_clock();
        let cache = TtlCache::new(clock.clone() as Arc<dyn Clock>, 16);
        cache.put(key.clone(), value, Duration::from_millis(ttl_ms));

        clock.set_ms(probe_ms);
        let read = cache.get(&key);
        if probe_ms < ttl_ms {
            prop_assert_eq!(read, Some(value));
        } else {
            prop_assert_eq!(read, None);
            prop_assert!(cache.is_empty(), "expired entry should be evicted by the read");
        }
    }

    /// Property: no client ever gets more than the limit accepted inside one window
    #[test]
    fn rate_window_never_exceeds_limit(
        client in client_id_strategy(),
        offsets in request_offsets_strategy(),
        limit in 1usize..10,
    ) {
        let clock = manual_clock();
        let incidents = Arc::new(IncidentLog::new(clock.clone(), 50, 50));
        let limiter = RateLimiter::new(Duration::from_secs(60), limit, clock.clone(), incidents);

        let mut accepted: Vec<u64> = Vec::new();
        for offset in offsets {
            clock.set_ms(offset * 1_000);
            if limiter.allow(&client) {
                accepted.push(offset);
            }
            let in_window = accepted.iter().filter(|&&t| offset - t < 60).count();
            prop_assert!(in_window <= limit);
        }
    }

    /// Property: calls spaced a full window apart are never rejected
    #[test]
    fn spaced_calls_are_never_rejected(
        client in client_id_strategy(),
        calls in 1usize..30,
        limit in 1usize..5,
    ) {
        let clock = manual_clock();
        let incidents = Arc::new(IncidentLog::new(clock.clone(), 50, 50));
        let limiter = RateLimiter::new(
            Duration::from_secs(60),
            limit,
            clock.clone(),
            incidents.clone(),
        );

        for i in 0..calls as u64 {
            clock.set_ms(i * 60_000);
            prop_assert!(limiter.allow(&client));
        }
        prop_assert!(incidents.is_empty());
    }

    /// Property: after more than C incidents, recent(C) holds exactly the C newest
    #[test]
    fn incident_log_keeps_newest_entries(capacity in 1usize..40, extra in 1usize..40) {
        let log = IncidentLog::new(manual_clock(), capacity, capacity);
        let total = capacity + extra;
        for seq in 0..total {
            log.record(IncidentKind::UpstreamFailure, json!({ "seq": seq }));
        }

        let recent = log.recent(capacity);
        prop_assert_eq!(recent.len(), capacity);
        for (offset, incident) in recent.iter().enumerate() {
            prop_assert_eq!(incident.details["seq"].as_u64(), Some((extra + offset) as u64));
        }
        prop_assert_eq!(log.stats()[&IncidentKind::UpstreamFailure], capacity);
    }

    /// Property: ordinary storefront text is never flagged
    #[test]
    fn ordinary_text_is_never_flagged(
        resource in resource_name_strategy(),
        text in ordinary_text_strategy(),
    ) {
        let incidents = Arc::new(IncidentLog::new(manual_clock(), 50, 50));
        let scanner = SuspiciousInputScanner::new(10_000, incidents.clone());
        let descriptor = OperationDescriptor::create(resource)
            .with_param("description", text.clone())
            .with_param("tags", json!([text]));

        prop_assert_eq!(scanner.scan(&descriptor), ScanOutcome::Clean);
        prop_assert!(incidents.is_empty());
    }

    /// Property: a tautology payload is flagged wherever it is embedded
    #[test]
    fn embedded_tautology_is_always_flagged(
        prefix in "[A-Za-z0-9 ]{0,20}",
        suffix in "[A-Za-z0-9 ]{0,20}",
    ) {
        let incidents = Arc::new(IncidentLog::new(manual_clock(), 50, 50));
        let scanner = SuspiciousInputScanner::new(10_000, incidents);
        let payload = format!("{prefix}' OR 1=1 --{suffix}");
        let descriptor = OperationDescriptor::read("users").with_param("email", payload);

        prop_assert!(!scanner.scan(&descriptor).is_clean());
    }

    /// Property: fingerprints ignore parameter insertion order
    #[test]
    fn fingerprint_is_order_independent(
        resource in resource_name_strategy(),
        a in "[a-z]{1,8}",
        b in "[a-z]{1,8}",
        x in any::<i32>(),
        y in any::<i32>(),
    ) {
        prop_assume!(a != b);
        let forward = OperationDescriptor::read(resource.clone())
            .with_param(a.clone(), x)
            .with_param(b.clone(), y);
        let backward = OperationDescriptor::read(resource).with_param(b, y).with_param(a, x);
        prop_assert_eq!(forward.fingerprint(), backward.fingerprint());
    }
}
