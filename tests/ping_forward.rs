use std::io::Write as _;
use std::time::Duration;

use pipenode::node::Node;
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

#[tokio::test]
async fn ping_command_sends_one_control_datagram_to_next_node() {
    let next_node = UdpSocket::bind("127.0.0.1:47101").await.unwrap();

    let config = write_config(&["output\t127.0.0.1:47101", "name\tnodeA"]);
    let node = Node::new();
    node.configure(config.path()).unwrap();
    node.start().await.unwrap();

    node.handle_command("ping");

    let datagram = recv_json(&next_node).await;
    assert_eq!(datagram["type"], "control");
    assert_eq!(datagram["payload"], "ping");
    let id = datagram["package"].as_str().expect("package id missing");
    uuid::Uuid::parse_str(id).expect("package id was not a uuid");

    // Exactly one datagram: a second receive must time out.
    let mut buf = [0u8; 4096];
    let second = timeout(Duration::from_millis(500), next_node.recv_from(&mut buf)).await;
    assert!(second.is_err(), "only one ping datagram was expected");

    node.stop();
}
