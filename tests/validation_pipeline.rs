//! End-to-end tests of the validation pipeline against a mock registry.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use registry_guard::cache::CacheCategory;
use registry_guard::registry::{AuditOutcome, LookupError, RateLimitOrigin, RecordKind, Verdict};
use registry_guard::resilience::{AdmissionPolicy, CircuitState};

const ACTIVE: &str = r#"{"etatAdministratifUniteLegale": "A"}"#;

const ESTABLISHMENT: &str = r#"{
    "etablissement": {
        "siret": "73282932000074",
        "dateCreationEtablissement": "2001-05-14",
        "uniteLegale": {"denominationUniteLegale": "ACME"},
        "adresseEtablissement": {
            "codePostalEtablissement": "75002",
            "libelleCommuneEtablissement": "PARIS"
        },
        "periodesEtablissement": [
            {"dateFin": null, "etatAdministratifEtablissement": "A"}
        ]
    }
}"#;

#[tokio::test]
async fn test_found_is_cached_and_audited_once() {
    let registry = start_fixed_registry(200, ACTIVE).await;
    let h = harness(&test_config(&registry));

    let verdict = h.service.validate_identifier("732829320").await.unwrap();
    let record = verdict.record().expect("found");
    assert!(record.is_active);
    assert_eq!(record.identifier, "732829320");

    let entry = h.service.cache().peek(CacheCategory::Company, "732829320").unwrap();
    assert_eq!(entry.ttl, Duration::from_secs(86_400));

    let audit = h.audit.records();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].http_status, Some(200));
    assert_eq!(audit[0].outcome, AuditOutcome::Found);
    assert_eq!(audit[0].identifier, "732******");

    let request = &registry.requests()[0];
    assert!(request.starts_with("get /siren/732829320 "));
    assert!(request.contains("x-insee-api-key-integration: test-key"));
    assert!(request.contains("accept: application/json"));
}

#[tokio::test]
async fn test_second_lookup_is_served_from_cache() {
    let registry = start_fixed_registry(200, ACTIVE).await;
    let h = harness(&test_config(&registry));

    let first = h.service.validate_identifier("732829320").await.unwrap();
    let second = h.service.validate_identifier("732 829 320").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(registry.calls(), 1);
    assert_eq!(h.audit.len(), 1);
    let metrics = h.service.get_cache_metrics();
    assert_eq!(metrics["memory"].hits, 1);
    assert_eq!(metrics["memory"].misses, 1);
}

#[tokio::test]
async fn test_not_found_uses_short_ttl_and_counts_as_success() {
    let registry = start_fixed_registry(404, "").await;
    let h = harness(&test_config(&registry));

    let verdict = h.service.validate_identifier("000000000").await.unwrap();
    assert_eq!(
        verdict,
        Verdict::NotFound {
            identifier: "000000000".to_string()
        }
    );

    let entry = h.service.cache().peek(CacheCategory::Company, "000000000").unwrap();
    assert_eq!(entry.ttl, Duration::from_secs(3_600));

    let health = h.service.get_circuit_health();
    let registry_circuit = &health["registry"];
    assert_eq!(registry_circuit.metrics.success_calls, 1);
    assert_eq!(registry_circuit.metrics.failure_calls, 0);
    assert_eq!(h.audit.records()[0].outcome, AuditOutcome::NotFound);
}

#[tokio::test]
async fn test_not_found_never_trips_the_breaker() {
    let registry = start_fixed_registry(404, "").await;
    let mut config = test_config(&registry);
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.minimum_throughput = 2;
    let h = harness(&config);

    for n in 1..=6 {
        let verdict = h.service.validate_identifier(&company_id(n)).await.unwrap();
        assert!(!verdict.is_found());
    }

    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failure_calls, 0);
    assert_eq!(breaker.metrics().success_calls, 6);
    assert_eq!(registry.calls(), 6);
}

#[tokio::test]
async fn test_open_circuit_fails_fast_without_http() {
    let registry = start_fixed_registry(503, "").await;
    let mut config = test_config(&registry);
    config.circuit_breaker.failure_threshold = 3;
    let h = harness(&config);

    for n in 1..=3 {
        let err = h.service.validate_identifier(&company_id(n)).await.unwrap_err();
        assert_eq!(err, LookupError::Transient("HTTP 503".to_string()));
    }

    let err = h.service.validate_identifier(&company_id(4)).await.unwrap_err();
    assert_eq!(err.kind(), "circuit_open");
    assert!(err.is_transient());
    assert_eq!(registry.calls(), 3);
    // The rejected call never consumed rate-limit budget.
    assert_eq!(h.service.limiter().in_window(), 3);

    let audit = h.audit.records();
    assert_eq!(audit.len(), 4);
    assert_eq!(audit[3].outcome, AuditOutcome::Rejected);
    assert_eq!(audit[3].http_status, None);
    assert_eq!(audit[3].error.as_deref(), Some("circuit_open"));

    let summary = h.service.health_summary();
    assert_eq!(summary.degraded, vec!["registry".to_string()]);
    assert_eq!(h.service.get_circuit_health()["registry"].metrics.rejected_calls, 1);
}

#[tokio::test]
async fn test_recovers_through_half_open_probe() {
    let registry = start_programmable_registry(|n| async move {
        if n == 1 {
            MockResponse::new(503, "")
        } else {
            MockResponse::new(200, ACTIVE)
        }
    })
    .await;
    let mut config = test_config(&registry);
    config.circuit_breaker.failure_threshold = 1;
    let h = harness(&config);

    assert!(h.service.validate_identifier(&company_id(1)).await.is_err());
    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    h.clock.advance(Duration::from_secs(29));
    let err = h.service.validate_identifier(&company_id(2)).await.unwrap_err();
    assert!(matches!(err, LookupError::CircuitOpen { retry_after: Some(_), .. }));

    h.clock.advance(Duration::from_secs(1));
    let verdict = h.service.validate_identifier(&company_id(2)).await.unwrap();
    assert!(verdict.is_found());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failure_calls, 0);
    assert_eq!(registry.calls(), 2);
}

#[tokio::test]
async fn test_upstream_429_is_retried_then_surfaced() {
    let registry = start_programmable_registry(|_| async {
        MockResponse::new(429, "").with_header("Retry-After", "0")
    })
    .await;
    let h = harness(&test_config(&registry));

    let err = h.service.validate_identifier("732829320").await.unwrap_err();
    assert!(matches!(
        err,
        LookupError::RateLimited {
            origin: RateLimitOrigin::Upstream,
            ..
        }
    ));
    // One attempt plus two retries.
    assert_eq!(registry.calls(), 3);

    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.metrics().total_calls, 0);
    assert_eq!(breaker.state(), CircuitState::Closed);

    let audit = h.audit.records();
    assert_eq!(audit.len(), 3);
    assert!(audit
        .iter()
        .all(|r| r.outcome == AuditOutcome::Throttled && r.http_status == Some(429)));
    assert!(h.service.cache().peek(CacheCategory::Company, "732829320").is_none());
}

#[tokio::test]
async fn test_upstream_429_then_success() {
    let registry = start_programmable_registry(|n| async move {
        if n == 1 {
            MockResponse::new(429, "")
        } else {
            MockResponse::new(200, ACTIVE)
        }
    })
    .await;
    let h = harness(&test_config(&registry));

    let verdict = h.service.validate_identifier("732829320").await.unwrap();
    assert!(verdict.is_found());
    assert_eq!(registry.calls(), 2);
    assert_eq!(h.audit.len(), 2);
    assert_eq!(h.service.limiter().in_window(), 2);
}

#[tokio::test]
async fn test_unauthorized_is_fatal_and_neutral() {
    let registry = start_fixed_registry(401, "").await;
    let mut config = test_config(&registry);
    config.circuit_breaker.failure_threshold = 1;
    let h = harness(&config);

    for _ in 0..3 {
        let err = h.service.validate_identifier("732829320").await.unwrap_err();
        assert_eq!(err.kind(), "fatal_configuration");
        assert!(!err.is_transient());
    }

    // Never cached, never retried within a call, never trips the breaker.
    assert_eq!(registry.calls(), 3);
    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().total_calls, 0);
    assert!(h.audit.records().iter().all(|r| r.outcome == AuditOutcome::Fatal));
}

#[tokio::test]
async fn test_unexpected_status_is_neutral() {
    let registry = start_fixed_registry(403, "").await;
    let h = harness(&test_config(&registry));
    let err = h.service.validate_identifier("732829320").await.unwrap_err();
    assert_eq!(err, LookupError::UnexpectedStatus(403));
    assert_eq!(h.service.get_circuit_health()["registry"].metrics.total_calls, 0);
}

#[tokio::test]
async fn test_unusable_body_counts_as_failure() {
    let registry = start_fixed_registry(200, r#"{"unexpected": true}"#).await;
    let h = harness(&test_config(&registry));
    let err = h.service.validate_identifier("732829320").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_response");
    assert_eq!(h.service.get_circuit_health()["registry"].metrics.failure_calls, 1);
}

#[tokio::test]
async fn test_malformed_input_never_reaches_network() {
    let registry = start_fixed_registry(200, ACTIVE).await;
    let h = harness(&test_config(&registry));

    let err = h.service.validate_identifier("12345").await.unwrap_err();
    assert_eq!(err.kind(), "malformed");
    let err = h.service.validate_identifier("732829321").await.unwrap_err();
    assert_eq!(err.kind(), "checksum_mismatch");

    assert_eq!(registry.calls(), 0);
    assert!(h.audit.is_empty());
    assert_eq!(h.service.limiter().in_window(), 0);
    assert_eq!(h.service.get_cache_metrics()["memory"].misses, 0);
}

#[tokio::test]
async fn test_local_rate_limit_fail_fast() {
    let registry = start_fixed_registry(200, ACTIVE).await;
    let mut config = test_config(&registry);
    // floor(3 * 0.8) = 2 admissions per window.
    config.rate_limit.upstream_limit = 3;
    config.rate_limit.safety_margin = 0.8;
    let h = harness(&config);

    for n in 1..=2 {
        h.service
            .validate_identifier_with(&company_id(n), AdmissionPolicy::FailFast)
            .await
            .unwrap();
    }
    let err = h
        .service
        .validate_identifier_with(&company_id(3), AdmissionPolicy::FailFast)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LookupError::RateLimited {
            origin: RateLimitOrigin::Local,
            retry_after: Some(_)
        }
    ));
    assert_eq!(registry.calls(), 2);
    assert_eq!(h.audit.records()[2].error.as_deref(), Some("rate_limited"));

    // Window slides past the earliest admission.
    h.clock.advance(Duration::from_secs(60));
    h.service
        .validate_identifier_with(&company_id(3), AdmissionPolicy::FailFast)
        .await
        .unwrap();
    assert_eq!(h.service.get_circuit_health()["registry"].metrics.success_calls, 3);
}

#[tokio::test]
async fn test_call_timeout_counts_as_failure() {
    let registry = start_programmable_registry(|_| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        MockResponse::new(200, ACTIVE)
    })
    .await;
    let mut config = test_config(&registry);
    config.circuit_breaker.call_timeout_ms = 100;
    let h = harness(&config);

    let err = h.service.validate_identifier("732829320").await.unwrap_err();
    assert_eq!(err, LookupError::Timeout(Duration::from_millis(100)));
    assert_eq!(h.service.get_circuit_health()["registry"].metrics.failure_calls, 1);
    assert_eq!(h.audit.records()[0].outcome, AuditOutcome::Failure);
}

#[tokio::test]
async fn test_cancelled_probe_frees_its_half_open_slot() {
    let registry = start_programmable_registry(|n| async move {
        match n {
            1 => MockResponse::new(503, ""),
            2 => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                MockResponse::new(200, ACTIVE)
            }
            _ => MockResponse::new(200, ACTIVE),
        }
    })
    .await;
    let mut config = test_config(&registry);
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.call_timeout_ms = 60_000;
    let h = harness(&config);

    assert!(h.service.validate_identifier(&company_id(1)).await.is_err());
    h.clock.advance(Duration::from_secs(30));

    let service = h.service.clone();
    let probe = tokio::spawn(async move { service.validate_identifier(&company_id(2)).await });
    registry.wait_for_calls(2).await;

    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.snapshot().half_open_in_flight, 1);
    // The only probe slot is taken.
    let err = h.service.validate_identifier(&company_id(3)).await.unwrap_err();
    assert_eq!(err.kind(), "circuit_open");

    probe.abort();
    assert!(probe.await.unwrap_err().is_cancelled());
    assert_eq!(breaker.snapshot().half_open_in_flight, 0);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let verdict = h.service.validate_identifier(&company_id(3)).await.unwrap();
    assert!(verdict.is_found());
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_half_open_admits_bounded_concurrent_probes() {
    let released = Arc::new(AtomicUsize::new(0));
    let gate = released.clone();
    let registry = start_programmable_registry(move |n| {
        let gate = gate.clone();
        async move {
            if n == 1 {
                return MockResponse::new(503, "");
            }
            while gate.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            MockResponse::new(200, ACTIVE)
        }
    })
    .await;
    let mut config = test_config(&registry);
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.half_open_max_calls = 2;
    config.circuit_breaker.call_timeout_ms = 10_000;
    let h = harness(&config);

    assert!(h.service.validate_identifier(&company_id(1)).await.is_err());
    h.clock.advance(Duration::from_secs(30));

    let first = {
        let service = h.service.clone();
        tokio::spawn(async move { service.validate_identifier(&company_id(2)).await })
    };
    let second = {
        let service = h.service.clone();
        tokio::spawn(async move { service.validate_identifier(&company_id(3)).await })
    };
    registry.wait_for_calls(3).await;

    let third = h.service.validate_identifier(&company_id(4)).await.unwrap_err();
    assert_eq!(third.kind(), "circuit_open");
    assert_eq!(registry.calls(), 3);

    released.store(1, Ordering::SeqCst);
    assert!(first.await.unwrap().unwrap().is_found());
    assert!(second.await.unwrap().unwrap().is_found());

    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(h.service.validate_identifier(&company_id(4)).await.is_ok());
}

#[tokio::test]
async fn test_invalidate_forces_fresh_lookup() {
    let registry = start_fixed_registry(200, ACTIVE).await;
    let h = harness(&test_config(&registry));

    h.service.validate_identifier("732829320").await.unwrap();
    h.service.invalidate("732 829 320").await.unwrap();
    assert!(h.distributed.is_empty());
    h.service.validate_identifier("732829320").await.unwrap();
    assert_eq!(registry.calls(), 2);

    assert!(h.service.invalidate("nope").await.is_err());
}

#[tokio::test]
async fn test_establishment_lookup_uses_siret_endpoint() {
    let registry = start_fixed_registry(200, ESTABLISHMENT).await;
    let h = harness(&test_config(&registry));

    let verdict = h.service.validate_identifier("73282932000074").await.unwrap();
    let record = verdict.record().expect("found");
    assert_eq!(record.kind, RecordKind::Establishment);
    assert!(record.is_active);
    assert_eq!(record.name.as_deref(), Some("ACME"));
    let address = record.address.as_ref().unwrap();
    assert_eq!(address.city.as_deref(), Some("PARIS"));

    assert!(registry.requests()[0].starts_with("get /siret/73282932000074 "));

    let entry = h
        .service
        .cache()
        .peek(CacheCategory::Establishment, "73282932000074")
        .unwrap();
    assert_eq!(entry.ttl, Duration::from_secs(21_600));
    assert!(h
        .service
        .cache()
        .peek(CacheCategory::Company, "73282932000074")
        .is_none());

    let audit = h.audit.records();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].endpoint, "siret");
    assert_eq!(audit[0].identifier, "732***********");

    // Valid company prefix, invalid full checksum.
    let err = h.service.validate_identifier("73282932099999").await.unwrap_err();
    assert_eq!(err.kind(), "checksum_mismatch");
    assert_eq!(registry.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_lookup_is_audited_once() {
    let registry = start_programmable_registry(|_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        MockResponse::new(200, ACTIVE)
    })
    .await;
    let mut config = test_config(&registry);
    config.circuit_breaker.call_timeout_ms = 60_000;
    let h = harness(&config);

    let service = h.service.clone();
    let lookup = tokio::spawn(async move { service.validate_identifier("732829320").await });
    registry.wait_for_calls(1).await;
    assert!(h.audit.is_empty());

    lookup.abort();
    assert!(lookup.await.unwrap_err().is_cancelled());

    for _ in 0..200 {
        if !h.audit.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let audit = h.audit.records();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].outcome, AuditOutcome::Cancelled);
    assert_eq!(audit[0].http_status, None);
    assert_eq!(audit[0].endpoint, "siren");
    assert_eq!(audit[0].error.as_deref(), Some("cancelled"));

    // Neutral on the breaker, nothing cached.
    let breaker = h.service.breakers().get("registry").unwrap();
    assert_eq!(breaker.metrics().total_calls, 0);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(h.service.cache().peek(CacheCategory::Company, "732829320").is_none());
    assert_eq!(registry.calls(), 1);
}
