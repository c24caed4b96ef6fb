use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use pipenode::handlers::Handler;
use pipenode::node::Node;
use pipenode::package::{Package, PackageType};
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

async fn recv_json(socket: &UdpSocket) -> serde_json::Value {
    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(3), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a datagram")
        .unwrap();
    serde_json::from_slice(&buf[..len]).expect("datagram was not JSON")
}

/// Stands in for a domain output handler: consumes data packages by
/// sending them to the next node.
struct ForwardHandler;

impl Handler for ForwardHandler {
    fn consume(&self, package: &mut Package, node: &Node) -> bool {
        if package.package_type() == PackageType::Data {
            node.send_data(package);
            return true;
        }
        false
    }
}

#[tokio::test]
async fn received_data_is_acked_to_sender_and_forwarded_downstream() {
    let downstream = UdpSocket::bind("127.0.0.1:47112").await.unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let config = write_config(&[
        "input\t47111",
        "output\t127.0.0.1:47112",
        "use-ack\ttrue",
        "name\tnodeB",
    ]);
    let node = Node::new();
    node.configure(config.path()).unwrap();
    node.add_handler(Arc::new(ForwardHandler));
    node.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let id = uuid::Uuid::new_v4();
    let datagram = format!(r#"{{"package":"{}","type":"data","payload":"x"}}"#, id);
    sender
        .send_to(datagram.as_bytes(), "127.0.0.1:47111")
        .await
        .unwrap();

    // The sender gets the acknowledgement, correlated by package id.
    let ack = recv_json(&sender).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["payload"], "ack");
    assert_eq!(ack["package"], id.to_string());

    // The next node gets the data package itself.
    let forwarded = recv_json(&downstream).await;
    assert_eq!(forwarded["type"], "data");
    assert_eq!(forwarded["payload"], "x");
    assert_eq!(forwarded["package"], id.to_string());

    node.stop();
}
