use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipenode::node::{Node, NodeEvent, NodeObserver};
use tokio::net::UdpSocket;
use tokio::time::timeout;

fn write_config(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "nodeconfiguration").unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

/// Counts shutdown events from a node.
struct ShutdownCounter {
    shutdowns: AtomicUsize,
}

impl ShutdownCounter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            shutdowns: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl NodeObserver for ShutdownCounter {
    fn node_event(&self, event: NodeEvent, _message: &str) {
        if event == NodeEvent::Shutdown {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn wait_for(counter: &ShutdownCounter) {
    for _ in 0..50 {
        if counter.count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("observer never saw the shutdown event");
}

#[tokio::test]
async fn shutdown_propagates_down_the_chain_and_stops_each_node() {
    // first -> second -> tail listener
    let tail = UdpSocket::bind("127.0.0.1:47143").await.unwrap();

    let first_config = write_config(&["input\t47141", "output\t127.0.0.1:47142", "name\tfirst"]);
    let first = Node::new();
    let first_observer = ShutdownCounter::new();
    first.set_observer(first_observer.clone());
    first.configure(first_config.path()).unwrap();
    first.start().await.unwrap();

    let second_config = write_config(&["input\t47142", "output\t127.0.0.1:47143", "name\tsecond"]);
    let second = Node::new();
    let second_observer = ShutdownCounter::new();
    second.set_observer(second_observer.clone());
    second.configure(second_config.path()).unwrap();
    second.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let injector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let shutdown = r#"{"package":"44b5f0aa-54c5-45da-9a6e-9e1a12f2c3dd","type":"control","payload":"shutdown"}"#;
    injector
        .send_to(shutdown.as_bytes(), "127.0.0.1:47141")
        .await
        .unwrap();

    // The shutdown package traveled the whole chain.
    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(5), tail.recv_from(&mut buf))
        .await
        .expect("shutdown never reached the end of the chain")
        .unwrap();
    let datagram: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
    assert_eq!(datagram["type"], "control");
    assert_eq!(datagram["payload"], "shutdown");

    // Each node stopped and told its observer.
    wait_for(&first_observer).await;
    wait_for(&second_observer).await;
    assert_eq!(first_observer.count(), 1);
    assert_eq!(second_observer.count(), 1);
    assert!(!first.is_running());
    assert!(!second.is_running());
}
