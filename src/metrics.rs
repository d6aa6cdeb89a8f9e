// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Sheet requests --------
pub static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sheet_requests_total",
            "sheet requests per attempt (labels: action, channel, outcome)",
        ),
        &["action", "channel", "outcome"],
    )
    .unwrap()
});

pub static FALLBACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sheet_fallbacks_total", "primary channel failed, fallback tried"),
        &["action"],
    )
    .unwrap()
});

pub static WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledger_writes_total", "write commands (labels: action, outcome)"),
        &["action", "outcome"],
    )
    .unwrap()
});

pub static REFETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledger_refetch_total", "refetch after write"),
        &["view"],
    )
    .unwrap()
});

pub static STALE_DISCARDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ledger_stale_responses_total",
            "responses dropped because their view was disposed or superseded",
        ),
        &["view"],
    )
    .unwrap()
});

pub static PENDING_CALLBACKS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("sheet_pending_callbacks", "callback names awaiting a response").unwrap()
});

// Latency per attempt (milliseconds)
pub static LAT_REQUEST: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new(
        "sheet_request_latency_ms",
        "Latency of one sheet request attempt (ms)",
    ))
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_PRIMARY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_primary_channel", "primary channel (label: channel)"),
        &["channel"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(REQUESTS.clone())),
        REGISTRY.register(Box::new(FALLBACKS.clone())),
        REGISTRY.register(Box::new(WRITES.clone())),
        REGISTRY.register(Box::new(REFETCHES.clone())),
        REGISTRY.register(Box::new(STALE_DISCARDED.clone())),
        REGISTRY.register(Box::new(PENDING_CALLBACKS.clone())),
        REGISTRY.register(Box::new(LAT_REQUEST.clone())),
        REGISTRY.register(Box::new(CONFIG_PRIMARY.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, ?e, "metrics bind failed");
                return;
            }
        };
        tracing::info!(%addr, "metrics listening on / and /metrics");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_counters_show_up_in_text_output() {
        init();
        REQUESTS.with_label_values(&["buyers", "direct", "ok"]).inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("sheet_requests_total"));
    }
}
