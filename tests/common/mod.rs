//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use registry_guard::cache::InMemoryDistributedCache;
use registry_guard::clock::MockClock;
use registry_guard::config::AppConfig;
use registry_guard::identifier::check_digit;
use registry_guard::registry::MemoryAuditSink;
use registry_guard::{ServiceDeps, ValidationService};

/// A scripted registry answer.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Handle on a running mock registry.
#[derive(Debug, Clone)]
pub struct MockRegistry {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockRegistry {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw request heads, lowercased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Poll until at least `n` requests arrived.
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..200 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock registry never received {} calls", n);
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Start a programmable mock registry on an ephemeral port.
///
/// `f` receives the 1-based index of the request.
pub async fn start_programmable_registry<F, Fut>(f: F) -> MockRegistry
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let registry = MockRegistry {
        addr: listener.local_addr().unwrap(),
        calls: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let f = Arc::new(f);
    let handle = registry.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        // Read the request head before answering.
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => head.extend_from_slice(&buf[..n]),
                            }
                        }
                        handle
                            .requests
                            .lock()
                            .unwrap()
                            .push(String::from_utf8_lossy(&head).to_lowercase());
                        let n = handle.calls.fetch_add(1, Ordering::SeqCst) + 1;

                        let response = f(n).await;
                        let mut extra = String::new();
                        for (name, value) in &response.headers {
                            extra.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        let response_str = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.status,
                            reason(response.status),
                            extra,
                            response.body.len(),
                            response.body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    registry
}

/// Mock registry that always gives the same answer.
pub async fn start_fixed_registry(status: u16, body: &'static str) -> MockRegistry {
    start_programmable_registry(move |_| async move { MockResponse::new(status, body) }).await
}

/// Configuration pointed at `registry`, with small timeouts.
pub fn test_config(registry: &MockRegistry) -> AppConfig {
    let mut config = AppConfig::default();
    config.registry.base_url = registry.base_url();
    config.registry.backoff_base_ms = 10;
    config.registry.backoff_max_ms = 50;
    config.circuit_breaker.call_timeout_ms = 2_000;
    config.circuit_breaker.recovery_timeout_ms = 30_000;
    config
}

/// Everything a test needs to inspect a service.
pub struct Harness {
    pub service: Arc<ValidationService>,
    pub audit: Arc<MemoryAuditSink>,
    pub clock: MockClock,
    pub distributed: Arc<InMemoryDistributedCache>,
}

pub fn harness(config: &AppConfig) -> Harness {
    let clock = MockClock::default();
    let distributed = Arc::new(InMemoryDistributedCache::new(Arc::new(clock.clone())));
    harness_with(config, clock, distributed)
}

pub fn harness_with(
    config: &AppConfig,
    clock: MockClock,
    distributed: Arc<InMemoryDistributedCache>,
) -> Harness {
    let audit = Arc::new(MemoryAuditSink::new());
    let deps = ServiceDeps {
        clock: Arc::new(clock.clone()),
        distributed: Some(distributed.clone()),
        durable: None,
        audit: audit.clone(),
        api_key: Some("test-key".to_string()),
    };
    let service = Arc::new(ValidationService::new(config, deps).unwrap());
    Harness {
        service,
        audit,
        clock,
        distributed,
    }
}

/// The `n`-th Luhn-valid company identifier of a synthetic range.
pub fn company_id(n: u32) -> String {
    let payload = format!("{:08}", n);
    let check = check_digit(&payload).unwrap();
    format!("{}{}", payload, check)
}
