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

fn config_item<'a>(items: &'a [serde_json::Value], name: &str) -> Option<&'a str> {
    items
        .iter()
        .find_map(|entry| entry.get(name).and_then(serde_json::Value::as_str))
}

#[tokio::test]
async fn read_request_is_answered_with_current_configuration() {
    let configurator = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let config = write_config(&["config-in\t47131", "name\tnodeD", "filein\tgrades.txt"]);
    let node = Node::new();
    node.configure(config.path()).unwrap();
    node.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let request = r#"{"package":"11b5f0aa-54c5-45da-9a6e-9e1a12f2c3aa","type":"configuration","payload":"{\"operation\":\"read\"}"}"#;
    configurator
        .send_to(request.as_bytes(), "127.0.0.1:47131")
        .await
        .unwrap();

    // The node has no next hop; the reply arrives through the
    // dedicated configuration writer, addressed back to the sender.
    let reply = recv_json(&configurator).await;
    assert_eq!(reply["type"], "configuration");
    let payload: serde_json::Value =
        serde_json::from_str(reply["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["operation"], "info");
    assert_eq!(payload["nodename"], "nodeD");
    let items = payload["configitems"].as_array().unwrap();
    assert_eq!(config_item(items, "name"), Some("nodeD"));
    assert_eq!(config_item(items, "filein"), Some("grades.txt"));
    assert_eq!(config_item(items, "config-in"), Some("47131"));

    node.stop();
}

#[tokio::test]
async fn set_request_merges_items_into_the_configuration() {
    let configurator = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let config = write_config(&["config-in\t47132", "name\tnodeD"]);
    let node = Node::new();
    node.configure(config.path()).unwrap();
    node.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let set_payload = r#"{\"operation\":\"set\",\"configitems\":[{\"name\":\"renamed\"},{\"fileout\":\"out.txt\"}]}"#;
    let request = format!(
        r#"{{"package":"22b5f0aa-54c5-45da-9a6e-9e1a12f2c3bb","type":"configuration","payload":"{}"}}"#,
        set_payload
    );
    configurator
        .send_to(request.as_bytes(), "127.0.0.1:47132")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // A follow-up read reflects the merged items.
    let read_request = r#"{"package":"33b5f0aa-54c5-45da-9a6e-9e1a12f2c3cc","type":"configuration","payload":"{\"operation\":\"read\"}"}"#;
    configurator
        .send_to(read_request.as_bytes(), "127.0.0.1:47132")
        .await
        .unwrap();

    let reply = recv_json(&configurator).await;
    let payload: serde_json::Value =
        serde_json::from_str(reply["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["operation"], "info");
    assert_eq!(payload["nodename"], "renamed");
    let items = payload["configitems"].as_array().unwrap();
    assert_eq!(config_item(items, "name"), Some("renamed"));
    assert_eq!(config_item(items, "fileout"), Some("out.txt"));

    node.stop();
}
