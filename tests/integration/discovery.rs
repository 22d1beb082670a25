use crate::*;

use bonjou_discovery::ResolveError;

/// A peer announcing itself shows up within a second, keyed on the packet
/// source rather than the address it claims.
#[tokio::test]
async fn test_peer_discovered_from_packet_source() {
    let (service, port) = start_service(LO_MASK).await.unwrap();

    announce(Ipv4Addr::LOCALHOST, port, "alice", "10.9.9.9", PEER_PORT, "alice-secret").unwrap();

    let peers = wait_for_peers(&service, 1).await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].username, "alice");
    assert_eq!(peers[0].ip, Ipv4Addr::LOCALHOST);
    assert_eq!(peers[0].port, PEER_PORT);
    assert_eq!(peers[0].secret, "");

    assert_eq!(
        service.shared_secret("alice", Some(Ipv4Addr::LOCALHOST)).as_deref(),
        Some("alice-secret")
    );
    assert!(service.resolve("10.9.9.9").is_err());

    service.stop().await;
}

/// Our own address and port coming back must never create an entry.
#[tokio::test]
async fn test_own_announcement_ignored() {
    let (service, port) = start_service(LO_MASK).await.unwrap();

    announce(Ipv4Addr::LOCALHOST, port, "me", "127.0.0.1", LOCAL_PORT, "local-secret").unwrap();
    announce(Ipv4Addr::LOCALHOST, port, "other", "127.0.0.1", PEER_PORT, "").unwrap();

    let peers = wait_for_peers(&service, 1).await.unwrap();
    settle().await;
    let peers_after = service.list_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers_after.len(), 1);
    assert_eq!(peers_after[0].username, "other");
    assert_eq!(peers_after[0].port, PEER_PORT);

    service.stop().await;
}

/// With a /32 on lo, 127.0.0.2 is on another subnet and must be ignored.
#[tokio::test]
async fn test_off_subnet_announcement_ignored() {
    let (service, port) = start_service(HOST_MASK).await.unwrap();

    announce(SECOND_LOOPBACK, port, "mallory", "127.0.0.1", PEER_PORT, "").unwrap();
    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "").unwrap();

    wait_for_peers(&service, 1).await.unwrap();
    settle().await;
    let peers = service.list_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].username, "alice");
    assert!(matches!(
        service.resolve("mallory"),
        Err(ResolveError::NotFound { .. })
    ));

    service.stop().await;
}

/// Garbage and oversized datagrams are dropped and the listener keeps going.
#[tokio::test]
async fn test_malformed_payloads_do_not_stop_listener() {
    let (service, port) = start_service(LO_MASK).await.unwrap();

    send_raw(Ipv4Addr::LOCALHOST, port, b"definitely not json").unwrap();
    let oversized = serde_json::json!({
        "username": "x".repeat(2000),
        "ip": "127.0.0.1",
        "port": PEER_PORT,
        "ts": 0,
        "secret": "",
    });
    send_raw(Ipv4Addr::LOCALHOST, port, oversized.to_string().as_bytes()).unwrap();
    announce(Ipv4Addr::LOCALHOST, port, "bob", "127.0.0.1", PEER_PORT, "").unwrap();

    let peers = wait_for_peers(&service, 1).await.unwrap();
    settle().await;
    assert_eq!(peers[0].username, "bob");
    assert_eq!(service.list_peers().len(), 1);

    service.stop().await;
}

/// Two sources, one username: resolving the name is ambiguous, the IPs are not.
#[tokio::test]
async fn test_duplicate_username_is_ambiguous() {
    let (service, port) = start_service(LO_MASK).await.unwrap();

    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "").unwrap();
    announce(SECOND_LOOPBACK, port, "alice", "127.0.0.2", PEER_PORT, "").unwrap();

    wait_for_peers(&service, 2).await.unwrap();

    match service.resolve("alice") {
        Err(ResolveError::AmbiguousPeer { candidates, suggestion, .. }) => {
            let ips: Vec<Ipv4Addr> = candidates.iter().map(|c| c.ip).collect();
            assert_eq!(ips, vec![Ipv4Addr::LOCALHOST, SECOND_LOOPBACK]);
            assert!(suggestion.contains("127.0.0.1"));
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
    assert_eq!(service.resolve("127.0.0.2").unwrap().ip, SECOND_LOOPBACK);

    service.stop().await;
}

/// A repeated announcement refreshes the entry instead of adding one.
#[tokio::test]
async fn test_reannouncement_overwrites_entry() {
    let (service, port) = start_service(LO_MASK).await.unwrap();

    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "one").unwrap();
    wait_for_peers(&service, 1).await.unwrap();
    announce(Ipv4Addr::LOCALHOST, port, "alicia", "127.0.0.1", PEER_PORT, "two").unwrap();
    settle().await;

    let peers = service.list_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].username, "alicia");
    assert_eq!(service.shared_secret("", Some(Ipv4Addr::LOCALHOST)).as_deref(), Some("two"));

    service.stop().await;
}

/// Changing the local endpoint empties the table immediately.
#[tokio::test]
async fn test_endpoint_change_resets_peers() {
    let (service, port) = start_service(LO_MASK).await.unwrap();

    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "").unwrap();
    wait_for_peers(&service, 1).await.unwrap();

    service.update_local_endpoint(None, 9100);
    assert!(service.list_peers().is_empty());
    assert_eq!(service.local_identity().port, 9100);

    // Discovery carries on against the new endpoint.
    announce(Ipv4Addr::LOCALHOST, port, "alice", "127.0.0.1", PEER_PORT, "").unwrap();
    wait_for_peers(&service, 1).await.unwrap();

    service.stop().await;
}
