//! Registry client.
//!
//! # Request Flow
//! ```text
//! lookup(raw)
//!     → Identifier::parse (malformed input stops here, unaudited)
//!     → cache get (hit stops here, unaudited)
//!     → circuit breaker permit (OPEN: audited rejection, no limiter, no HTTP)
//!     → rate limiter admission (denied: permit released, audited rejection)
//!     → HTTP GET under the breaker's call timeout (dropped mid-flight: audited as cancelled)
//!     → classify, resolve permit, audit
//!     → 429: bounded retry from the permit step
//!     → cache set (found, or not-found marker with its shorter TTL)
//! ```
//!
//! # Classification
//! | Status        | Result              | Breaker  |
//! |---------------|---------------------|----------|
//! | 200 parsable  | Found               | success  |
//! | 200 otherwise | InvalidResponse     | failure  |
//! | 404           | NotFound            | success  |
//! | 429           | retry / RateLimited | neutral  |
//! | 401           | FatalConfiguration  | neutral  |
//! | 5xx, network  | Transient           | failure  |
//! | timeout       | Timeout             | failure  |
//! | other         | UnexpectedStatus    | neutral  |
//! | cancelled     | (caller gone)       | neutral  |

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;

use crate::cache::MultiLayerCache;
use crate::config::schema::RegistryConfig;
use crate::identifier::{Identifier, IdentifierClass};
use crate::observability::metrics;
use crate::registry::audit::{AuditOutcome, AuditRecord, AuditSink};
use crate::registry::response::parse_record;
use crate::registry::types::{CachedLookup, LookupError, RateLimitOrigin, Verdict};
use crate::resilience::backoff::throttle_delay;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::rate_limiter::{AdmissionPolicy, SlidingWindowLimiter};

/// Audits an in-flight attempt that is dropped before it resolves.
///
/// `Drop` cannot await, so the write is spawned onto the current runtime.
struct InFlightAttempt {
    pending: Option<(Identifier, String)>,
    audit: Arc<dyn AuditSink>,
    started: Instant,
}

impl InFlightAttempt {
    fn new(id: &Identifier, endpoint: &str, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            pending: Some((id.clone(), endpoint.to_string())),
            audit,
            started: Instant::now(),
        }
    }

    /// The attempt resolved; its outcome is audited by the caller.
    fn settle(mut self) {
        self.pending = None;
    }
}

impl Drop for InFlightAttempt {
    fn drop(&mut self) {
        let Some((id, endpoint)) = self.pending.take() else {
            return;
        };
        let record = AuditRecord::new(
            &id,
            &endpoint,
            None,
            self.started.elapsed(),
            AuditOutcome::Cancelled,
            Some("cancelled".to_string()),
        );
        metrics::record_lookup("cancelled");
        tracing::info!(identifier = %id, "Registry call cancelled in flight");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let audit = self.audit.clone();
                handle.spawn(async move {
                    match audit.write(&record).await {
                        Ok(()) => metrics::record_audit_record(),
                        Err(e) => tracing::warn!(
                            error = %e,
                            audit_id = %record.id,
                            "Failed to write audit record"
                        ),
                    }
                });
            }
            Err(_) => {
                tracing::warn!(audit_id = %record.id, "No runtime to record cancelled attempt");
            }
        }
    }
}

struct RawResponse {
    status: StatusCode,
    retry_after: Option<String>,
    body: String,
}

/// Client for the upstream business registry.
#[derive(Debug)]
pub struct RegistryClient {
    http: reqwest::Client,
    config: RegistryConfig,
    api_key: Option<String>,
    limiter: Arc<SlidingWindowLimiter>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<MultiLayerCache<CachedLookup>>,
    audit: Arc<dyn AuditSink>,
}

impl RegistryClient {
    pub fn new(
        config: RegistryConfig,
        api_key: Option<String>,
        limiter: Arc<SlidingWindowLimiter>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<MultiLayerCache<CachedLookup>>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(concat!("registry-guard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "No registry API key configured");
        }

        Ok(Self {
            http,
            config,
            api_key,
            limiter,
            breaker,
            cache,
            audit,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn endpoint(&self, class: IdentifierClass) -> &str {
        match class {
            IdentifierClass::Company => &self.config.company_path,
            IdentifierClass::Establishment => &self.config.establishment_path,
        }
    }

    fn url(&self, id: &Identifier) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.endpoint(id.class()),
            id.as_str()
        )
    }

    /// Validate `raw` and resolve it against the cache, then the registry.
    pub async fn lookup(&self, raw: &str, policy: AdmissionPolicy) -> Result<Verdict, LookupError> {
        let id = match Identifier::parse(raw) {
            Ok(id) => id,
            Err(e) => {
                metrics::record_lookup(e.reason());
                return Err(LookupError::Malformed(e));
            }
        };
        let category = id.class().cache_category();

        if let Some(cached) = self.cache.get(category, id.as_str()).await {
            metrics::record_lookup("cache_hit");
            tracing::debug!(identifier = %id, "Served from cache");
            return Ok(Verdict::from_cached(id.as_str(), cached));
        }

        let cached = match self.fetch(&id, policy).await {
            Ok(cached) => cached,
            Err(e) => {
                metrics::record_lookup(e.kind());
                return Err(e);
            }
        };

        let ttl = match &cached {
            CachedLookup::Found(_) => {
                metrics::record_lookup("found");
                None
            }
            CachedLookup::NotFound => {
                metrics::record_lookup("not_found");
                Some(self.cache.not_found_ttl())
            }
        };
        self.cache
            .set(category, id.as_str(), cached.clone(), ttl)
            .await;

        Ok(Verdict::from_cached(id.as_str(), cached))
    }

    async fn fetch(&self, id: &Identifier, policy: AdmissionPolicy) -> Result<CachedLookup, LookupError> {
        let endpoint = self.endpoint(id.class()).to_string();
        let url = self.url(id);
        let mut throttled: u32 = 0;

        loop {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    self.audit(AuditRecord::new(
                        id,
                        &endpoint,
                        None,
                        Duration::ZERO,
                        AuditOutcome::Rejected,
                        Some("circuit_open".to_string()),
                    ))
                    .await;
                    return Err(LookupError::CircuitOpen {
                        name: open.name,
                        retry_after: open.retry_after,
                    });
                }
            };

            if let Err(denied) = self.limiter.admit(policy).await {
                permit.release();
                self.audit(AuditRecord::new(
                    id,
                    &endpoint,
                    None,
                    Duration::ZERO,
                    AuditOutcome::Rejected,
                    Some("rate_limited".to_string()),
                ))
                .await;
                return Err(LookupError::RateLimited {
                    origin: RateLimitOrigin::Local,
                    retry_after: Some(denied.retry_after),
                });
            }

            let timeout = self.breaker.call_timeout();
            let in_flight = InFlightAttempt::new(id, &endpoint, self.audit.clone());
            let started = Instant::now();
            let sent = tokio::time::timeout(timeout, self.send(&url)).await;
            let latency = started.elapsed();
            in_flight.settle();

            let response = match sent {
                Err(_) => {
                    permit.failure(latency);
                    metrics::record_http_call(None, latency);
                    tracing::warn!(identifier = %id, ?timeout, "Registry call timed out");
                    self.audit(AuditRecord::new(
                        id,
                        &endpoint,
                        None,
                        latency,
                        AuditOutcome::Failure,
                        Some(format!("timed out after {:?}", timeout)),
                    ))
                    .await;
                    return Err(LookupError::Timeout(timeout));
                }
                Ok(Err(e)) => {
                    permit.failure(latency);
                    metrics::record_http_call(None, latency);
                    tracing::warn!(identifier = %id, error = %e, "Registry call failed");
                    self.audit(AuditRecord::new(
                        id,
                        &endpoint,
                        None,
                        latency,
                        AuditOutcome::Failure,
                        Some(e.to_string()),
                    ))
                    .await;
                    return Err(LookupError::Transient(e.to_string()));
                }
                Ok(Ok(response)) => response,
            };

            let code = response.status.as_u16();
            metrics::record_http_call(Some(code), latency);
            let record = |outcome, error| {
                AuditRecord::new(id, &endpoint, Some(code), latency, outcome, error)
            };

            match response.status {
                StatusCode::OK => match parse_record(id, &response.body, Utc::now()) {
                    Ok(found) => {
                        permit.success(latency);
                        self.audit(record(AuditOutcome::Found, None)).await;
                        return Ok(CachedLookup::Found(found));
                    }
                    Err(reason) => {
                        permit.failure(latency);
                        tracing::warn!(identifier = %id, %reason, "Unusable registry response");
                        self.audit(record(AuditOutcome::Failure, Some(reason.clone())))
                            .await;
                        return Err(LookupError::InvalidResponse(reason));
                    }
                },
                StatusCode::NOT_FOUND => {
                    permit.success(latency);
                    self.audit(record(AuditOutcome::NotFound, None)).await;
                    return Ok(CachedLookup::NotFound);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    permit.release();
                    self.audit(record(AuditOutcome::Throttled, None)).await;
                    throttled += 1;

                    let base = Duration::from_millis(self.config.backoff_base_ms);
                    let max = Duration::from_millis(self.config.backoff_max_ms);
                    let delay = throttle_delay(response.retry_after.as_deref(), throttled, base, max);

                    if throttled > self.config.max_rate_limit_retries {
                        tracing::warn!(identifier = %id, attempts = throttled, "Registry kept throttling");
                        return Err(LookupError::RateLimited {
                            origin: RateLimitOrigin::Upstream,
                            retry_after: Some(delay),
                        });
                    }
                    tracing::info!(identifier = %id, ?delay, attempt = throttled, "Registry throttled, backing off");
                    tokio::time::sleep(delay).await;
                }
                StatusCode::UNAUTHORIZED => {
                    permit.release();
                    metrics::record_fatal_error();
                    tracing::error!(
                        alert = true,
                        endpoint = %endpoint,
                        env = %self.config.api_key_env,
                        "Registry rejected credentials"
                    );
                    self.audit(record(AuditOutcome::Fatal, Some("unauthorized".to_string())))
                        .await;
                    return Err(LookupError::FatalConfiguration(
                        "registry rejected the API key (HTTP 401)".to_string(),
                    ));
                }
                status if status.is_server_error() => {
                    permit.failure(latency);
                    self.audit(record(AuditOutcome::Failure, Some(status.to_string())))
                        .await;
                    return Err(LookupError::Transient(format!("HTTP {}", code)));
                }
                status => {
                    permit.release();
                    tracing::warn!(identifier = %id, status = code, "Unexpected registry status");
                    self.audit(record(AuditOutcome::UnexpectedStatus, Some(status.to_string())))
                        .await;
                    return Err(LookupError::UnexpectedStatus(code));
                }
            }
        }
    }

    async fn send(&self, url: &str) -> Result<RawResponse, reqwest::Error> {
        let mut request = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(self.config.api_key_header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }

    async fn audit(&self, record: AuditRecord) {
        match self.audit.write(&record).await {
            Ok(()) => metrics::record_audit_record(),
            Err(e) => tracing::warn!(error = %e, audit_id = %record.id, "Failed to write audit record"),
        }
    }
}
