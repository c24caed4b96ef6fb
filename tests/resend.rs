use std::time::Duration;

use pipenode::network::Writer;
use pipenode::package::{Package, PackageType};
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn recv_json(socket: &UdpSocket) -> serde_json::Value {
    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(3), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a datagram")
        .unwrap();
    serde_json::from_slice(&buf[..len]).expect("datagram was not JSON")
}

#[tokio::test]
async fn silent_peer_triggers_resend_of_the_same_package() {
    // The peer receives but never acknowledges.
    let peer = UdpSocket::bind("127.0.0.1:47121").await.unwrap();

    let writer = Writer::new("127.0.0.1:47121");
    writer.set_resend_timeout(Duration::from_millis(300));
    writer.start(true).await.unwrap();

    let package = Package::with_payload(PackageType::Data, "payload-to-retry");
    writer.write(package.clone());

    let first = recv_json(&peer).await;
    assert_eq!(first["package"], package.id().to_string());
    assert_eq!(first["payload"], "payload-to-retry");

    // No ack: after the resend period the exact same datagram again.
    let second = recv_json(&peer).await;
    assert_eq!(second, first);

    writer.stop();
}

#[tokio::test]
async fn acked_package_is_not_resent() {
    let peer = UdpSocket::bind("127.0.0.1:47122").await.unwrap();

    let writer = Writer::new("127.0.0.1:47122");
    writer.set_resend_timeout(Duration::from_millis(300));
    writer.start(true).await.unwrap();

    let package = Package::with_payload(PackageType::Data, "payload");
    writer.write(package.clone());

    let mut buf = [0u8; 4096];
    let (_, _) = timeout(Duration::from_secs(3), peer.recv_from(&mut buf))
        .await
        .expect("first send missing")
        .unwrap();
    assert_eq!(writer.unacked_size(), 1);

    // Feed the ack back the way the dispatch loop does: a received ack
    // has no destination and settles the sent set.
    let ack = Package::with_id(package.id(), PackageType::Ack, "ack");
    writer.write(ack);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(writer.unacked_size(), 0);

    let resend = timeout(Duration::from_millis(500), peer.recv_from(&mut buf)).await;
    assert!(resend.is_err(), "acked package must not be resent");

    writer.stop();
}
