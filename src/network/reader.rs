// src/network/reader.rs

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::constants::{ACK_PAYLOAD, MAX_DATAGRAM_BYTES};
use crate::error::NodeError;
use crate::events::model::LogLevel;
use crate::network::events::emit_network_event;
use crate::package::{Package, PackageType};

/// Observer of a [`DataReader`]. The reader notifies it once per batch
/// of arrivals and whenever a datagram could not be decoded.
pub trait ReaderObserver: Send + Sync {
    /// Data is waiting in the reader's queue.
    fn received_data(&self);
    /// A datagram did not decode to a package and was discarded.
    fn error_in_data(&self, what: &str);
}

struct ReaderShared {
    port: u16,
    queue: Mutex<VecDeque<Package>>,
    observer: Arc<dyn ReaderObserver>,
    running: AtomicBool,
    stop: Notify,
    send_acks: AtomicBool,
}

/// Receives datagrams on a bound UDP port, decodes each one as a
/// [`Package`], stamps it with the sender's address and queues it for
/// the node's dispatch loop.
///
/// When acknowledgements are enabled, every received data package also
/// queues a synthesized ack addressed back to the sender, so the
/// dispatch loop forwards it through the writer like any other package.
pub struct DataReader {
    shared: Arc<ReaderShared>,
    reuse_address: bool,
}

impl DataReader {
    /// A reader listening on `port`. Configuration readers pass
    /// `reuse_address` so several co-located nodes can share one
    /// configuration port.
    pub fn new(port: u16, observer: Arc<dyn ReaderObserver>, reuse_address: bool) -> Self {
        Self {
            shared: Arc::new(ReaderShared {
                port,
                queue: Mutex::new(VecDeque::new()),
                observer,
                running: AtomicBool::new(false),
                stop: Notify::new(),
                send_acks: AtomicBool::new(false),
            }),
            reuse_address,
        }
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Bind the socket and start the receive task.
    pub async fn start(&self, use_acks: bool) -> Result<(), NodeError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.send_acks.store(use_acks, Ordering::SeqCst);

        let socket = bind_udp(self.shared.port, self.reuse_address)?;
        emit_network_event(
            "reader",
            LogLevel::Info,
            "reader_bind",
            Some(format!("0.0.0.0:{}", self.shared.port)),
            Some(format!(
                "reuse_address={} use_acks={}",
                self.reuse_address, use_acks
            )),
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
            loop {
                tokio::select! {
                    _ = shared.stop.notified() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, from)) => shared.handle_datagram(&buf[..len], from),
                        Err(e) => {
                            if !shared.running.load(Ordering::SeqCst) {
                                break;
                            }
                            emit_network_event(
                                "reader",
                                LogLevel::Warn,
                                "recv_failed",
                                None,
                                Some(e.to_string()),
                            );
                        }
                    },
                }
            }
            emit_network_event(
                "reader",
                LogLevel::Info,
                "reader_closed",
                Some(format!("0.0.0.0:{}", shared.port)),
                None,
            );
        });
        Ok(())
    }

    /// Non-blocking read: the head of the inbound queue, or an empty
    /// package when nothing is waiting.
    pub fn read(&self) -> Package {
        let mut queue = self.shared.queue.lock();
        queue.pop_front().unwrap_or_default()
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Cancel the pending receive and close the socket. Idempotent.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            self.shared.stop.notify_one();
        }
    }
}

impl ReaderShared {
    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let text = String::from_utf8_lossy(datagram);
        let mut package = match Package::from_json(&text) {
            Ok(package) => package,
            Err(e) => {
                emit_network_event(
                    "reader",
                    LogLevel::Warn,
                    "bad_datagram",
                    Some(from.to_string()),
                    Some(e.to_string()),
                );
                self.observer.error_in_data(&e.to_string());
                return;
            }
        };

        // Replies go to the port the sender listens on, when the
        // payload advertises one; otherwise to the sending port.
        let origin_port = package
            .originating_listen_port()
            .unwrap_or_else(|| from.port().to_string());
        package.set_origin(format!("{}:{}", from.ip(), origin_port));

        emit_network_event(
            "reader",
            LogLevel::Debug,
            "package_received",
            Some(package.origin().to_string()),
            Some(format!(
                "id={} type={}",
                package.id(),
                package.package_type().as_str()
            )),
        );

        {
            let mut queue = self.queue.lock();
            if self.send_acks.load(Ordering::SeqCst)
                && package.package_type() == PackageType::Data
            {
                let mut ack = Package::with_id(package.id(), PackageType::Ack, ACK_PAYLOAD);
                ack.set_destination(package.origin());
                queue.push_back(package);
                queue.push_back(ack);
            } else {
                queue.push_back(package);
            }
        }
        self.observer.received_data();
    }
}

/// Bind a UDP socket, optionally with SO_REUSEADDR so several
/// co-located readers can share a configuration port. Reuse semantics
/// are OS specific; on Linux every sharing socket must set the flag.
fn bind_udp(port: u16, reuse_address: bool) -> Result<UdpSocket, NodeError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingObserver {
        notifies: AtomicUsize,
        errors: AtomicUsize,
    }

    impl CountingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                notifies: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
            })
        }
    }

    impl ReaderObserver for CountingObserver {
        fn received_data(&self) {
            self.notifies.fetch_add(1, Ordering::SeqCst);
        }
        fn error_in_data(&self, _what: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn read_on_empty_queue_returns_empty_package() {
        let reader = DataReader::new(0, CountingObserver::new(), false);
        assert!(reader.read().is_empty());
        assert_eq!(reader.queue_size(), 0);
    }

    #[test]
    fn datagram_origin_uses_source_port_by_default() {
        let observer = CountingObserver::new();
        let reader = DataReader::new(0, observer.clone(), false);
        let datagram = r#"{"package":"66b5f0aa-54c5-45da-9a6e-9e1a12f2c3ff","type":"data","payload":"x"}"#;
        reader
            .shared
            .handle_datagram(datagram.as_bytes(), "10.0.0.5:9000".parse().unwrap());

        let package = reader.read();
        assert_eq!(package.origin(), "10.0.0.5:9000");
        assert_eq!(observer.notifies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_listen_port_overrides_the_source_port() {
        let reader = DataReader::new(0, CountingObserver::new(), false);
        let datagram = r#"{"package":"77b5f0aa-54c5-45da-9a6e-9e1a12f2c311","type":"configuration","payload":"{\"operation\":\"read\",\"originatingListenPort\":\"4000\"}"}"#;
        reader
            .shared
            .handle_datagram(datagram.as_bytes(), "10.0.0.5:9000".parse().unwrap());

        assert_eq!(reader.read().origin(), "10.0.0.5:4000");
    }

    #[test]
    fn data_package_is_followed_by_a_synthesized_ack() {
        let reader = DataReader::new(0, CountingObserver::new(), false);
        reader.shared.send_acks.store(true, Ordering::SeqCst);
        let datagram = r#"{"package":"88b5f0aa-54c5-45da-9a6e-9e1a12f2c322","type":"data","payload":"x"}"#;
        reader
            .shared
            .handle_datagram(datagram.as_bytes(), "10.0.0.5:9000".parse().unwrap());

        let data = reader.read();
        let ack = reader.read();
        assert_eq!(data.package_type(), PackageType::Data);
        assert_eq!(ack.package_type(), PackageType::Ack);
        assert_eq!(ack.id(), data.id());
        assert_eq!(ack.payload_str(), "ack");
        assert_eq!(ack.destination(), data.origin());
        assert!(reader.read().is_empty());
    }

    #[test]
    fn undecodable_datagram_is_reported_and_dropped() {
        let observer = CountingObserver::new();
        let reader = DataReader::new(0, observer.clone(), false);
        reader
            .shared
            .handle_datagram(b"{not json", "10.0.0.5:9000".parse().unwrap());

        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
        assert_eq!(observer.notifies.load(Ordering::SeqCst), 0);
        assert!(reader.read().is_empty());
    }
}
