// src/network/writer.rs

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::constants::{ACK_PAYLOAD, MAX_DATAGRAM_BYTES, RESEND_TIMEOUT_SECS};
use crate::error::NodeError;
use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::package::{Package, PackageType};

struct WriterShared {
    /// Default next hop, `host:port`. Used for every package without
    /// its own destination.
    next_hop: String,
    outbound: Mutex<VecDeque<Package>>,
    /// Data packages sent but not yet acknowledged, in send order.
    sent_unacked: Mutex<Vec<Package>>,
    wake: Notify,
    running: AtomicBool,
    acknowledge: AtomicBool,
    resend_timeout_millis: AtomicU64,
}

/// Owns the outbound queue and the send loop: packages are serialized
/// to JSON and sent one datagram at a time to the configured next hop
/// or to a per-package destination.
///
/// With acknowledgements enabled, sent data packages are tracked until
/// the matching ack arrives; a single resend timer, measured from the
/// last send, moves everything still unacked back into the queue.
pub struct Writer {
    shared: Arc<WriterShared>,
}

impl Writer {
    pub fn new(next_hop: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(WriterShared {
                next_hop: next_hop.into(),
                outbound: Mutex::new(VecDeque::new()),
                sent_unacked: Mutex::new(Vec::new()),
                wake: Notify::new(),
                running: AtomicBool::new(false),
                acknowledge: AtomicBool::new(false),
                resend_timeout_millis: AtomicU64::new(RESEND_TIMEOUT_SECS * 1000),
            }),
        }
    }

    pub fn next_hop(&self) -> &str {
        &self.shared.next_hop
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Override the resend timer. Useful for tests and for tuning
    /// pipelines with tighter latency expectations.
    pub fn set_resend_timeout(&self, timeout: Duration) {
        self.shared
            .resend_timeout_millis
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    /// Bind an ephemeral UDP socket and start the send loop.
    pub async fn start(&self, use_acks: bool) -> Result<(), NodeError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.acknowledge.store(use_acks, Ordering::SeqCst);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        emit_network_event(
            "writer",
            LogLevel::Info,
            "writer_start",
            Some(self.shared.next_hop.clone()),
            Some(format!("use_acks={}", use_acks)),
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.send_loop(socket).await;
        });
        Ok(())
    }

    /// Queue a package for sending and signal the send loop. Dropped
    /// when the writer has not been started.
    pub fn write(&self, package: Package) {
        if !self.is_running() {
            return;
        }
        self.shared.outbound.lock().push_back(package);
        self.shared.wake.notify_one();
    }

    pub fn queue_size(&self) -> usize {
        self.shared.outbound.lock().len()
    }

    pub fn unacked_size(&self) -> usize {
        self.shared.sent_unacked.lock().len()
    }

    /// Stop the send loop, draining both queues. Idempotent.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            emit_network_event(
                "writer",
                LogLevel::Info,
                "writer_stop",
                Some(self.shared.next_hop.clone()),
                Some(format!(
                    "outbound={} unacked={}",
                    self.shared.outbound.lock().len(),
                    self.shared.sent_unacked.lock().len()
                )),
            );
            self.shared.outbound.lock().clear();
            self.shared.sent_unacked.lock().clear();
            self.shared.wake.notify_one();
        }
    }
}

impl WriterShared {
    fn resend_timeout(&self) -> Duration {
        Duration::from_millis(self.resend_timeout_millis.load(Ordering::SeqCst))
    }

    async fn send_loop(&self, socket: UdpSocket) {
        let mut last_send = Instant::now();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let next = self.outbound.lock().pop_front();
            match next {
                Some(package) => {
                    // An ack without a destination was *received* for a
                    // package this node sent; it settles the sent set
                    // instead of going out on the wire.
                    if self.acknowledge.load(Ordering::SeqCst)
                        && package.package_type() == PackageType::Ack
                        && !package.has_destination()
                    {
                        self.consume_ack(&package);
                    } else {
                        self.transmit(&socket, package).await;
                        last_send = Instant::now();
                    }
                }
                None => {
                    let deadline = last_send + self.resend_timeout();
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if Instant::now() >= deadline {
                        self.requeue_unacked();
                        last_send = Instant::now();
                    }
                }
            }
        }
        self.outbound.lock().clear();
        self.sent_unacked.lock().clear();
        emit_network_event(
            "writer",
            LogLevel::Info,
            "writer_closed",
            Some(self.next_hop.clone()),
            None,
        );
    }

    async fn transmit(&self, socket: &UdpSocket, package: Package) {
        let body = package.as_json();
        if body.len() > MAX_DATAGRAM_BYTES {
            emit_network_event(
                "writer",
                LogLevel::Warn,
                "package_oversize",
                None,
                Some(format!("id={} bytes={}", package.id(), body.len())),
            );
            return;
        }

        let target = if package.has_destination() {
            package.destination().to_string()
        } else {
            self.next_hop.clone()
        };

        // Track before the send: a failed send leaves the package in
        // the sent set for the next resend cycle.
        if package.package_type() == PackageType::Data {
            self.sent_unacked.lock().push(package.clone());
        }

        let Some(addr) = resolve(&target).await else {
            emit_network_event(
                "writer",
                LogLevel::Warn,
                "bad_destination",
                Some(target),
                Some(format!("id={}", package.id())),
            );
            return;
        };
        match socket.send_to(body.as_bytes(), addr).await {
            Ok(bytes) => {
                emit_network_event(
                    "writer",
                    LogLevel::Debug,
                    "package_sent",
                    Some(addr.to_string()),
                    Some(format!(
                        "id={} type={} bytes={}",
                        package.id(),
                        package.package_type().as_str(),
                        bytes
                    )),
                );
            }
            Err(e) => {
                emit_network_event(
                    "writer",
                    LogLevel::Warn,
                    "send_failed",
                    Some(addr.to_string()),
                    Some(e.to_string()),
                );
            }
        }
    }

    /// Settle an incoming acknowledgement against the sent set. Only a
    /// payload of `"ack"` removes the entry; anything else is left in
    /// place for the next resend cycle.
    fn consume_ack(&self, ack: &Package) {
        let mut sent = self.sent_unacked.lock();
        match sent.iter().position(|package| package == ack) {
            Some(index) if ack.payload_str() == ACK_PAYLOAD => {
                sent.remove(index);
                emit_network_event(
                    "writer",
                    LogLevel::Debug,
                    "ack_consumed",
                    None,
                    Some(format!("id={} unacked={}", ack.id(), sent.len())),
                );
            }
            Some(_) => {
                emit_network_event(
                    "writer",
                    LogLevel::Debug,
                    "ack_refused",
                    None,
                    Some(format!("id={} payload={}", ack.id(), ack.payload_str())),
                );
            }
            None => {
                emit_network_event(
                    "writer",
                    LogLevel::Debug,
                    "ack_unmatched",
                    None,
                    Some(format!("id={}", ack.id())),
                );
            }
        }
    }

    /// Move everything still unacked back into the outbound queue,
    /// preserving the order the packages were originally sent in.
    fn requeue_unacked(&self) {
        let mut sent = self.sent_unacked.lock();
        if sent.is_empty() {
            return;
        }
        emit_network_event(
            "writer",
            LogLevel::Info,
            "resend_unacked",
            Some(self.next_hop.clone()),
            Some(format!("count={}", sent.len())),
        );
        let mut outbound = self.outbound.lock();
        for package in sent.drain(..) {
            outbound.push_back(package);
        }
        self.wake.notify_one();
    }
}

async fn resolve(target: &str) -> Option<SocketAddr> {
    match lookup_host(target).await {
        Ok(mut addrs) => addrs.next(),
        Err(_) => None,
    }
}
