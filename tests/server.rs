//! End-to-end tests driving a real server over TCP sockets: the worker
//! lifecycle, the pause gate, broadcast cancellation, and the shutdown
//! quiescence barrier.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use treedb::server::listener::Listener;
use treedb::server::Server;

/// a server plus its listener thread, bound to an ephemeral loopback port
struct TestServer {
    server: Arc<Server>,
    listener: Option<Listener>,
    addr: SocketAddr,
}

impl TestServer {
    fn start() -> TestServer {
        let server = Server::new();
        let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
        let listener = Listener::spawn(Arc::clone(&server), tcp).unwrap();
        let addr = listener.local_addr();
        TestServer {
            server,
            listener: Some(listener),
            addr,
        }
    }

    /// runs the operator shutdown sequence (minus the signal monitor, which
    /// the tests never start)
    fn shutdown(mut self) {
        self.server.stop_accepting();
        self.server.cancel_all();
        self.server.await_quiescence();
        assert!(self.server.registry_is_empty());
        self.server.db().clear();
        self.listener.take().unwrap().shutdown();
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
}

impl Client {
    fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            stream,
        }
    }

    fn send(&mut self, command: &str) {
        self.stream.write_all(command.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
    }

    fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "server closed the connection");
        line.trim_end().to_string()
    }

    fn round_trip(&mut self, command: &str) -> String {
        self.send(command);
        self.recv()
    }

    /// true once the server end has closed the connection
    fn at_eof(&mut self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
    }
}

#[test]
fn add_query_and_delete_round_trips() {
    let ts = TestServer::start();
    let mut client = Client::connect(ts.addr);

    assert_eq!(client.round_trip("a apple red"), "added");
    assert_eq!(client.round_trip("q apple"), "red");
    assert_eq!(client.round_trip("q banana"), "not found");
    assert_eq!(client.round_trip("a apple green"), "already in database");
    assert_eq!(client.round_trip("q apple"), "red");
    assert_eq!(client.round_trip("d apple"), "removed");
    assert_eq!(client.round_trip("d apple"), "not in database");
    assert_eq!(client.round_trip("nonsense"), "ill-formed command");

    drop(client);
    ts.shutdown();
}

#[test]
fn commands_on_one_connection_complete_in_send_order() {
    let ts = TestServer::start();
    let mut client = Client::connect(ts.addr);

    // queue several commands before reading any reply
    for i in 0..10 {
        client.send(&format!("a key{i} v{i}"));
    }
    for _ in 0..10 {
        assert_eq!(client.recv(), "added");
    }
    for i in 0..10 {
        assert_eq!(client.round_trip(&format!("q key{i}")), format!("v{i}"));
    }

    drop(client);
    ts.shutdown();
}

#[test]
fn a_disconnected_client_deregisters_its_worker() {
    let ts = TestServer::start();
    let mut client = Client::connect(ts.addr);
    assert_eq!(client.round_trip("a k v"), "added");
    drop(client);

    // the worker exits through cleanup on end-of-stream
    ts.server.await_quiescence();
    assert!(ts.server.registry_is_empty());
    ts.shutdown();
}

#[test]
fn paused_workers_reply_only_after_release() {
    let ts = TestServer::start();
    let mut client = Client::connect(ts.addr);
    assert_eq!(client.round_trip("a apple red"), "added");

    ts.server.stop_clients();
    client.send("q apple");

    // the worker is parked at the gate, so no reply may arrive
    client
        .stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut buf = [0u8; 16];
    let err = client.reader.read(&mut buf).unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        "unexpected error: {err}"
    );

    ts.server.release_clients();
    client
        .stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(client.recv(), "red");

    drop(client);
    ts.shutdown();
}

#[test]
fn concurrent_inserts_elect_one_winner_per_key() {
    let ts = TestServer::start();
    let keys: Vec<String> = (0..300).map(|i| format!("k{i:04}")).collect();

    let mut handles = Vec::new();
    for writer in 0..2u32 {
        let addr = ts.addr;
        let keys = keys.clone();
        handles.push(thread::spawn(move || {
            let mut client = Client::connect(addr);
            let mut replies = HashMap::new();
            for key in &keys {
                let reply = client.round_trip(&format!("a {key} from-{writer}"));
                replies.insert(key.clone(), reply);
            }
            replies
        }));
    }
    let replies: Vec<HashMap<String, String>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut checker = Client::connect(ts.addr);
    for key in &keys {
        let winners: Vec<usize> = (0..replies.len())
            .filter(|&w| replies[w][key] == "added")
            .collect();
        assert_eq!(winners.len(), 1, "key {key} was added {} times", winners.len());
        let losers = replies.iter().filter(|r| r[key] == "already in database");
        assert_eq!(losers.count(), replies.len() - 1);

        let value = checker.round_trip(&format!("q {key}"));
        assert_eq!(value, format!("from-{}", winners[0]));
    }

    drop(checker);
    ts.shutdown();
}

#[test]
fn cancel_all_severs_clients_but_the_server_keeps_serving() {
    let ts = TestServer::start();

    let mut clients: Vec<Client> = (0..10).map(|_| Client::connect(ts.addr)).collect();
    // a round-trip proves each worker is registered and in its serve loop
    for (i, client) in clients.iter_mut().enumerate() {
        assert_eq!(client.round_trip(&format!("a c{i} v")), "added");
    }

    ts.server.cancel_all();
    for client in &mut clients {
        assert!(client.at_eof(), "client socket should be closed");
    }
    ts.server.await_quiescence();
    assert!(ts.server.registry_is_empty());

    // fresh connections are still admitted and served
    let mut fresh = Client::connect(ts.addr);
    assert_eq!(fresh.round_trip("a x y"), "added");
    assert_eq!(fresh.round_trip("q x"), "y");

    drop(fresh);
    ts.shutdown();
}

#[test]
fn cancellation_reaches_workers_parked_at_the_gate() {
    let ts = TestServer::start();
    let mut client = Client::connect(ts.addr);
    assert_eq!(client.round_trip("a apple red"), "added");

    ts.server.stop_clients();
    client.send("q apple");
    // let the worker read the command and park at the gate
    thread::sleep(Duration::from_millis(100));

    ts.server.cancel_all();
    assert!(client.at_eof());
    ts.server.await_quiescence();
    assert!(ts.server.registry_is_empty());

    ts.server.release_clients();
    ts.shutdown();
}

#[test]
fn connections_after_stop_accepting_are_refused() {
    let ts = TestServer::start();
    ts.server.stop_accepting();

    // the TCP handshake still succeeds, but admission closes the stream
    // before the worker registers or serves anything
    let mut refused = Client::connect(ts.addr);
    refused.send("a apple red");
    assert!(refused.at_eof());
    assert!(ts.server.registry_is_empty());

    drop(refused);
    ts.shutdown();
}

#[test]
fn shutdown_quiesces_while_clients_are_mid_conversation() {
    let ts = TestServer::start();
    let mut clients: Vec<Client> = (0..5).map(|_| Client::connect(ts.addr)).collect();
    for (i, client) in clients.iter_mut().enumerate() {
        assert_eq!(client.round_trip(&format!("a s{i} v")), "added");
    }

    // workers are blocked reading their next command; the sequence must
    // still cancel them, drain the registry, and join the listener
    ts.shutdown();

    for client in &mut clients {
        assert!(client.at_eof());
    }
}

#[test]
fn command_files_execute_against_the_live_server() {
    let ts = TestServer::start();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "a apple red").unwrap();
    writeln!(file, "a banana yellow").unwrap();
    writeln!(file, "d apple").unwrap();
    file.flush().unwrap();

    let mut client = Client::connect(ts.addr);
    let reply = client.round_trip(&format!("f {}", file.path().display()));
    assert_eq!(reply, "file processed");
    assert_eq!(client.round_trip("q apple"), "not found");
    assert_eq!(client.round_trip("q banana"), "yellow");
    assert_eq!(client.round_trip("f /no/such/file"), "bad file name");

    drop(client);
    ts.shutdown();
}
