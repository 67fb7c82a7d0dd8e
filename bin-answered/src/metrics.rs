use axum::{http::StatusCode, routing};
use prometheus::{
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dns_auth::metrics::QueryMetrics;
use dns_auth::reload::ReloadStats;

pub const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.0001, // 0.1 ms
    0.0005, // 0.5 ms
    0.0010, // 1   ms
    0.0025, // 2.5 ms
    0.0050, // 5   ms
    0.0100, // 10  ms
    0.0250, // 25  ms
    0.0500, // 50  ms
    0.1000, // 100 ms
    0.2500, // 250 ms
    0.5000, // 500 ms
    1.0000, // 1    s
];

pub static DNS_REQUESTS_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!(
                "dns_requests_total",
                "Total number of DNS requests received, whether valid or invalid."
            ),
            &["protocol"]
        )
        .unwrap()
    });

pub static DNS_RESPONSES_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!("dns_responses_total", "Total number of DNS responses sent."),
            &["rcode"]
        )
        .unwrap()
    });

pub static DNS_RESPONSE_TIME_SECONDS: std::sync::LazyLock<HistogramVec> =
    std::sync::LazyLock::new(|| {
        register_histogram_vec!(
            "dns_response_time_seconds",
            "Response time of DNS requests, whether valid or invalid.",
            &["protocol"],
            RESPONSE_TIME_BUCKETS.to_vec()
        )
        .unwrap()
    });

pub static DNS_QUESTIONS_TOTAL: std::sync::LazyLock<IntCounterVec> =
    std::sync::LazyLock::new(|| {
        register_int_counter_vec!(
            opts!(
                "dns_questions_total",
                "Total number of DNS questions received, by query type."
            ),
            &["qtype"]
        )
        .unwrap()
    });

pub static RESOLVER_AUTHORITATIVE_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_authoritative_total",
            "Total number of questions answered from authoritative data."
        ))
        .unwrap()
    });

pub static RESOLVER_DELEGATION_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_delegation_total",
            "Total number of questions answered with a delegation."
        ))
        .unwrap()
    });

pub static RESOLVER_REFUSED_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_refused_total",
            "Total number of questions refused."
        ))
        .unwrap()
    });

pub static RESOLVER_NXDOMAIN_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_nxdomain_total",
            "Total number of name-error answers."
        ))
        .unwrap()
    });

pub static RESOLVER_WEIGHTED_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_weighted_total",
            "Total number of answers carrying a weighted-random selection."
        ))
        .unwrap()
    });

pub static RESOLVER_CHASE_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_chase_total",
            "Total number of answers that followed a CNAME chain."
        ))
        .unwrap()
    });

pub static RESOLVER_FAILURE_TOTAL: std::sync::LazyLock<IntCounter> =
    std::sync::LazyLock::new(|| {
        register_int_counter!(opts!(
            "resolver_failure_total",
            "Total number of questions answered ServFail."
        ))
        .unwrap()
    });

pub static CACHE_HIT_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "cache_hit_total",
        "Total number of response cache hits."
    ))
    .unwrap()
});

pub static CACHE_MISS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "cache_miss_total",
        "Total number of response cache misses."
    ))
    .unwrap()
});

pub static CACHE_SIZE: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge!(opts!("cache_size", "Number of responses in the cache.")).unwrap()
});

pub static CACHE_OVERFLOW_COUNT: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "cache_overflow_count",
        "Number of times the cache has overflowed."
    ))
    .unwrap()
});

pub static CACHE_EXPIRED_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "cache_expired_total",
        "Number of responses which have expired out of the cache."
    ))
    .unwrap()
});

pub static CACHE_PRUNED_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter!(opts!(
        "cache_pruned_total",
        "Number of responses pruned from the cache due to overflow."
    ))
    .unwrap()
});

pub static RELOAD_PARTIAL_TOTAL: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge!(opts!(
        "reload_partial_total",
        "Partial reloads completed."
    ))
    .unwrap()
});

pub static RELOAD_FULL_TOTAL: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge!(opts!("reload_full_total", "Full reloads completed.")).unwrap()
});

pub static RELOAD_TIMEOUT_TOTAL: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge!(opts!(
        "reload_timeout_total",
        "Reloads abandoned because they exceeded the timeout."
    ))
    .unwrap()
});

pub static RELOAD_VALIDATION_FAILURE_TOTAL: std::sync::LazyLock<IntGauge> =
    std::sync::LazyLock::new(|| {
        register_int_gauge!(opts!(
            "reload_validation_failure_total",
            "Full reloads rejected because the probe key was missing."
        ))
        .unwrap()
    });

pub static RELOAD_FAILURE_TOTAL: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge!(opts!(
        "reload_failure_total",
        "Reloads that failed outright."
    ))
    .unwrap()
});

/// Flush one query's counters into the exporters.
pub fn observe_query(metrics: &QueryMetrics) {
    RESOLVER_AUTHORITATIVE_TOTAL.inc_by(metrics.authoritative);
    RESOLVER_DELEGATION_TOTAL.inc_by(metrics.delegations);
    RESOLVER_REFUSED_TOTAL.inc_by(metrics.refused);
    RESOLVER_NXDOMAIN_TOTAL.inc_by(metrics.name_errors);
    RESOLVER_WEIGHTED_TOTAL.inc_by(metrics.weighted);
    RESOLVER_CHASE_TOTAL.inc_by(metrics.chases);
    RESOLVER_FAILURE_TOTAL.inc_by(metrics.failures);
    CACHE_HIT_TOTAL.inc_by(metrics.cache_hits);
    CACHE_MISS_TOTAL.inc_by(metrics.cache_misses);
}

/// Mirror the reload controller's atomic counters into the exporters.
pub fn observe_reloads(stats: &Arc<ReloadStats>) {
    RELOAD_PARTIAL_TOTAL.set(to_i64(stats.partial_reloads.load(Ordering::Relaxed)));
    RELOAD_FULL_TOTAL.set(to_i64(stats.full_reloads.load(Ordering::Relaxed)));
    RELOAD_TIMEOUT_TOTAL.set(to_i64(stats.timeouts.load(Ordering::Relaxed)));
    RELOAD_VALIDATION_FAILURE_TOTAL.set(to_i64(
        stats.validation_failures.load(Ordering::Relaxed),
    ));
    RELOAD_FAILURE_TOTAL.set(to_i64(stats.failures.load(Ordering::Relaxed)));
}

fn to_i64(value: u64) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

async fn get_metrics() -> (StatusCode, String) {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(metrics_str) => (StatusCode::OK, metrics_str),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn serve_prometheus_endpoint_task(address: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route("/metrics", routing::get(get_metrics));
    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
