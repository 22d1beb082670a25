use crate::*;

use bonjou_discovery::{DiscoveryError, ServiceState};

fn service_on(port: u16) -> DiscoveryService {
    DiscoveryService::with_interfaces(
        DiscoveryConfig {
            port,
            secret: String::new(),
        },
        loopback(LO_MASK),
    )
}

#[tokio::test]
async fn test_port_in_use_is_reported() {
    let holder = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    let port = holder.local_addr().unwrap().port();
    let service = service_on(port);

    match service.start("me", Ipv4Addr::LOCALHOST, LOCAL_PORT).await {
        Err(DiscoveryError::AddressInUse { port: p }) => assert_eq!(p, port),
        other => panic!("expected AddressInUse, got {other:?}"),
    }
    assert_eq!(service.state(), ServiceState::Stopped);

    // Once the port is free the same service starts normally.
    drop(holder);
    service.start("me", Ipv4Addr::LOCALHOST, LOCAL_PORT).await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    service.stop().await;
}

#[tokio::test]
async fn test_stop_twice_returns_promptly() {
    let (service, _) = start_service(LO_MASK).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        service.stop().await;
        service.stop().await;
    })
    .await
    .expect("stop blocked");
    assert_eq!(service.state(), ServiceState::Stopped);
}

/// After stop() returns nothing writes to the registry any more.
#[tokio::test]
async fn test_no_registry_writes_after_stop() {
    let (service, port) = start_service(LO_MASK).await.unwrap();
    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "").unwrap();
    wait_for_peers(&service, 1).await.unwrap();

    service.stop().await;

    // The port is closed now; a send may be refused, which is fine.
    let _ = announce(SECOND_LOOPBACK, port, "bob", "127.0.0.2", PEER_PORT, "");
    settle().await;

    let peers = service.list_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].username, "alice");
}

#[tokio::test]
async fn test_restart_after_stop() {
    let port = free_udp_port();
    let service = service_on(port);

    service.start("me", Ipv4Addr::LOCALHOST, LOCAL_PORT).await.unwrap();
    service.stop().await;
    service.start("me", Ipv4Addr::LOCALHOST, LOCAL_PORT).await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);

    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "").unwrap();
    wait_for_peers(&service, 1).await.unwrap();

    service.stop().await;
}

#[tokio::test]
async fn test_rename_while_running() {
    let (service, _) = start_service(LO_MASK).await.unwrap();

    service.update_local_user("renamed");
    assert_eq!(service.local_identity().username, "renamed");
    assert_eq!(service.state(), ServiceState::Running);

    service.force_announce().await;
    service.stop().await;
}
