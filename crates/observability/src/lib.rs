use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    llm_calls_total: AtomicU64,
    llm_rate_limited_total: AtomicU64,
    malformed_responses_total: AtomicU64,
    router_fallbacks_total: AtomicU64,
    total_llm_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub llm_calls_total: u64,
    pub llm_rate_limited_total: u64,
    pub malformed_responses_total: u64,
    pub router_fallbacks_total: u64,
    pub avg_llm_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        counter!("pantry_requests_total").increment(1);
    }

    pub fn observe_llm_call(&self, duration: Duration) {
        self.llm_calls_total.fetch_add(1, Ordering::Relaxed);
        self.total_llm_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        counter!("pantry_llm_calls_total").increment(1);
    }

    pub fn inc_rate_limited(&self) {
        self.llm_rate_limited_total.fetch_add(1, Ordering::Relaxed);
        counter!("pantry_llm_rate_limited_total").increment(1);
    }

    pub fn inc_malformed(&self) {
        self.malformed_responses_total
            .fetch_add(1, Ordering::Relaxed);
        counter!("pantry_malformed_responses_total").increment(1);
    }

    pub fn inc_router_fallback(&self) {
        self.router_fallbacks_total.fetch_add(1, Ordering::Relaxed);
        counter!("pantry_router_fallbacks_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let calls = self.llm_calls_total.load(Ordering::Relaxed);
        let latency = self.total_llm_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            llm_calls_total: calls,
            llm_rate_limited_total: self.llm_rate_limited_total.load(Ordering::Relaxed),
            malformed_responses_total: self.malformed_responses_total.load(Ordering::Relaxed),
            router_fallbacks_total: self.router_fallbacks_total.load(Ordering::Relaxed),
            avg_llm_latency_millis: if calls == 0 {
                0.0
            } else {
                latency as f64 / calls as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,pantry_api=info,pantry_agents=info,pantry_llm=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
