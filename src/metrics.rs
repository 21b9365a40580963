// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Wire traffic --------
pub static FRAMES_IN: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("frames_in_total", "inbound frames dispatched"), &["tag"]).unwrap()
});

pub static FRAMES_OUT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("frames_out_total", "outbound frames queued"), &["tag"]).unwrap()
});

pub static FRAMES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("frames_dropped_total", "inbound frames dropped (labels: reason)"),
        &["reason"],
    )
    .unwrap()
});

// -------- Connection --------
pub static CONN_STATUS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("connection_status", "0 closed, 1 connecting, 2 open").unwrap()
});

pub static DISCONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("disconnects_total", "connections lost").unwrap());

pub static RECONNECTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("reconnects_total", "reconnect attempts by the shell").unwrap());

// -------- Game state --------
pub static REMOTE_PLAYERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("remote_players", "other players currently tracked").unwrap());

pub static ROUND_CURRENT: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("round_current", "current round number").unwrap());

pub static ROUND_REMAINING: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("round_remaining_seconds", "local round timer").unwrap());

pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("notifications_total", "notifications pushed"), &["kind"]).unwrap()
});

// -------- Transactions --------
pub static TX_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("tx_submitted_total", "economic requests sent");
    IntCounterVec::new(opts, &["kind"]).unwrap()
});

pub static TX_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tx_rejected_total", "requests rejected locally (labels: kind, reason)"),
        &["kind", "reason"],
    )
    .unwrap()
});

pub static TX_RESOLVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tx_resolved_total", "terminal transaction outcomes (labels: kind, status)"),
        &["kind", "status"],
    )
    .unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(FRAMES_IN.clone())),
        REGISTRY.register(Box::new(FRAMES_OUT.clone())),
        REGISTRY.register(Box::new(FRAMES_DROPPED.clone())),
        REGISTRY.register(Box::new(CONN_STATUS.clone())),
        REGISTRY.register(Box::new(DISCONNECTS.clone())),
        REGISTRY.register(Box::new(RECONNECTS.clone())),
        REGISTRY.register(Box::new(REMOTE_PLAYERS.clone())),
        REGISTRY.register(Box::new(ROUND_CURRENT.clone())),
        REGISTRY.register(Box::new(ROUND_REMAINING.clone())),
        REGISTRY.register(Box::new(NOTIFICATIONS.clone())),
        REGISTRY.register(Box::new(TX_SUBMITTED.clone())),
        REGISTRY.register(Box::new(TX_REJECTED.clone())),
        REGISTRY.register(Box::new(TX_RESOLVED.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Tiny HTTP/1.1 responder: any request gets the metrics page
fn handle_client(mut stream: TcpStream) {
    let mut req_buf = [0u8; 1024];
    let _ = stream.read(&mut req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Serve metrics from a dedicated OS thread so the session loop stays alone
/// on its runtime. Port 0 disables the exporter.
pub fn serve_metrics(port: u16) {
    if port == 0 {
        return;
    }
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(?e, %addr, "metrics bind failed");
                return;
            }
        };
        info!(%addr, "metrics listening");
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
