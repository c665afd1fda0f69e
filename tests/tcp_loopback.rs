use line_server::net::{AcceptStatus, ConnectionState, IoStatus, MessageEnd, TcpClient, TcpServer};
use std::thread;

fn pair() -> (TcpClient, TcpClient) {
    let server = TcpServer::bind("127.0.0.1", 0);
    assert!(server.is_valid());
    let client = TcpClient::connect_text("127.0.0.1", server.local_endpoint().port());
    assert!(client.is_connected());
    let mut accepted = TcpClient::new();
    assert_eq!(server.add_client(&mut accepted), AcceptStatus::Accepted);
    (client, accepted)
}

#[test]
fn sized_receive_returns_exact_payload() {
    for len in [1usize, 17, 2048, 2049, 64 * 1024 + 3] {
        let (mut client, mut accepted) = pair();
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = thread::spawn(move || {
            assert_eq!(client.send(&payload), IoStatus::Complete);
            client
        });
        let mut buffer = Vec::new();
        assert_eq!(accepted.receive(&mut buffer, &MessageEnd::sized(len)), IoStatus::Complete);
        assert_eq!(buffer, expected);
        writer.join().unwrap();
    }
}

#[test]
fn terminator_ends_message_across_reads() {
    let (mut client, mut accepted) = pair();
    let writer = thread::spawn(move || {
        assert_eq!(client.send(b"hello "), IoStatus::Complete);
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(client.send(b"world\r\n"), IoStatus::Complete);
        client
    });
    let mut buffer = Vec::new();
    let status = accepted.receive(&mut buffer, &MessageEnd::terminated_by("\r\n"));
    assert_eq!(status, IoStatus::Complete);
    assert_eq!(buffer, b"hello world\r\n");
    writer.join().unwrap();
}

#[test]
fn empty_payload_round_trip() {
    let (mut client, mut accepted) = pair();
    assert_eq!(client.send(b""), IoStatus::Complete);
    assert_eq!(client.send(b"x"), IoStatus::Complete);
    let mut buffer = Vec::new();
    assert_eq!(accepted.receive(&mut buffer, &MessageEnd::any_read()), IoStatus::Complete);
    assert_eq!(buffer, b"x");
}

#[test]
fn peer_close_is_reported() {
    let (mut client, mut accepted) = pair();
    client.close();
    assert_eq!(client.state(), ConnectionState::Closed);

    let mut buffer = Vec::new();
    assert_eq!(accepted.receive(&mut buffer, &MessageEnd::any_read()), IoStatus::PeerClosed);
    assert!(!accepted.is_connected());
    // Later calls fail fast.
    assert_eq!(accepted.receive(&mut buffer, &MessageEnd::any_read()), IoStatus::PeerClosed);
    assert_eq!(accepted.send(b"late"), IoStatus::PeerClosed);
}

#[test]
fn nonblocking_accept_without_pending_connection() {
    let mut server = TcpServer::bind("127.0.0.1", 0);
    assert!(server.set_nonblocking());
    let mut client = TcpClient::new();
    assert_eq!(server.add_client(&mut client), AcceptStatus::NoPendingConnection);
    assert!(!client.is_valid());
}

#[test]
fn connect_to_closed_port_stays_unconnected() {
    let port = {
        let server = TcpServer::bind("127.0.0.1", 0);
        server.local_endpoint().port()
    };
    let client = TcpClient::connect_text("127.0.0.1", port);
    assert_eq!(client.state(), ConnectionState::Unconnected);
}

#[test]
fn nonblocking_connect_finishes() {
    let server = TcpServer::bind("127.0.0.1", 0);
    let mut client = TcpClient::open(server.local_endpoint());
    assert!(client.set_nonblocking());
    if !client.connect() {
        assert_eq!(client.state(), ConnectionState::Connecting);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !client.finish_connect() {
            assert!(std::time::Instant::now() < deadline);
            thread::yield_now();
        }
    }
    assert!(client.is_connected());
    assert_ne!(client.local_endpoint().port(), 0);
}
