use line_server::net::{
    AcceptStatus, Endpoint, HasSocket, IoStatus, MessageEnd, Multiplexer, Role, TcpClient,
    TcpServer, UdpSocket,
};
use std::time::{Duration, Instant};

fn work_until(mux: &mut Multiplexer, mut done: impl FnMut(&Multiplexer) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        mux.work(50);
        if done(mux) {
            return;
        }
        assert!(Instant::now() < deadline, "readiness never observed");
    }
}

/// Writes into a non-blocking client until the kernel refuses more.
fn fill(client: &mut TcpClient) {
    let chunk = vec![0x5a; 64 * 1024];
    loop {
        match client.send(&chunk) {
            IoStatus::Complete | IoStatus::Partial(_) => {}
            IoStatus::WouldBlock => return,
            status => panic!("send stopped with {status:?}"),
        }
    }
}

/// Reads everything currently queued on a non-blocking client.
fn drain(client: &mut TcpClient) {
    let mut buffer = Vec::new();
    while let IoStatus::Complete = client.receive(&mut buffer, &MessageEnd::any_read()) {}
}

fn accept(server: &TcpServer) -> (TcpClient, TcpClient) {
    let client = TcpClient::connect_to(server.local_endpoint());
    assert!(client.is_connected());
    let mut accepted = TcpClient::new();
    assert_eq!(server.add_client(&mut accepted), AcceptStatus::Accepted);
    (client, accepted)
}

#[test]
fn only_the_signaled_role_reports_ready() {
    let mut mux = Multiplexer::new();

    let mut server = TcpServer::bind("127.0.0.1", 0);
    let mut idle_reader = UdpSocket::bind("127.0.0.1", 0);
    let mut busy_reader = UdpSocket::bind("127.0.0.1", 0);
    assert!(mux.add_server(&mut server));
    assert!(mux.add_reader(&mut idle_reader));
    assert!(mux.add_reader(&mut busy_reader));
    assert_eq!(mux.len(), 3);

    assert!(!mux.work(20));

    let mut sender = UdpSocket::new();
    let target = busy_reader.local_endpoint().clone();
    sender.send_to(b"wake", &target);

    work_until(&mut mux, |mux| mux.is_ready_reader(&busy_reader));
    assert!(!mux.is_ready_reader(&idle_reader));
    assert!(!mux.is_ready_server(&server));
    assert_eq!(mux.ready_count(), 1);

    let mut buffer = Vec::new();
    busy_reader.recv_from(&mut buffer, &MessageEnd::any_read());
    assert_eq!(buffer, b"wake");
}

#[test]
fn server_and_connect_roles() {
    let mut mux = Multiplexer::new();
    let mut server = TcpServer::bind("127.0.0.1", 0);
    assert!(mux.add_server(&mut server));

    let mut client = TcpClient::open(server.local_endpoint());
    assert!(mux.add_client(&mut client));
    assert!(client.socket().is_nonblocking());
    client.connect();

    work_until(&mut mux, |mux| mux.is_ready_server(&server));
    let mut accepted = TcpClient::new();
    assert_eq!(server.add_client(&mut accepted), AcceptStatus::Accepted);

    work_until(&mut mux, |mux| mux.is_ready_client(&client));
    assert!(client.finish_connect());
    assert!(mux.is_ready(Role::Connect, &client));
    assert!(mux.delete_client(&client));
    assert!(!mux.is_ready_client(&client));
}

#[test]
fn deregistered_socket_is_never_ready() {
    let mut mux = Multiplexer::new();
    let mut writer = UdpSocket::new();
    assert!(mux.add_sender(&mut writer));
    assert!(mux.work(100));
    assert!(mux.is_ready_sender(&writer));

    assert!(mux.delete_sender(&writer));
    assert!(mux.is_empty());
    assert!(!mux.work(10));
    assert!(!mux.is_ready_sender(&writer));
}

#[test]
fn invalid_socket_cannot_register() {
    let mut mux = Multiplexer::new();
    let mut server = TcpServer::bind_endpoint(&Endpoint::new());
    assert!(!server.is_valid());
    assert!(!mux.add_server(&mut server));
    assert!(mux.is_empty());
}

#[test]
fn one_ready_socket_among_all_four_roles() {
    let mut server = TcpServer::bind("127.0.0.1", 0);
    let (mut writer, mut writer_peer) = accept(&server);
    let (mut connected, _connected_peer) = accept(&server);
    let mut idle_reader = UdpSocket::bind("127.0.0.1", 0);

    // Neither TCP client is writable while its send buffer is full.
    assert!(writer.set_nonblocking());
    assert!(connected.set_nonblocking());
    fill(&mut writer);
    fill(&mut connected);

    let mut mux = Multiplexer::new();
    assert!(mux.add_sender(&mut writer));
    assert!(mux.add_reader(&mut idle_reader));
    assert!(mux.add_server(&mut server));
    assert!(mux.add_client(&mut connected));
    assert_eq!(mux.len(), 4);
    assert!(!mux.work(50));

    assert!(writer_peer.set_nonblocking());
    work_until(&mut mux, |mux| {
        drain(&mut writer_peer);
        mux.is_ready_sender(&writer)
    });
    assert!(!mux.is_ready_reader(&idle_reader));
    assert!(!mux.is_ready_server(&server));
    assert!(!mux.is_ready_client(&connected));
    assert_eq!(mux.ready_count(), 1);
}
