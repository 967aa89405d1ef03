//! End-to-end tests driving the reactor over a real loopback socket: one
//! listener, a couple of worker threads, and a plain `std::net::TcpStream`
//! client standing in for a browser.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};

use edgeweb::db::DbPool;
use edgeweb::logging::Logger;
use edgeweb::mux::TriggerMode;
use edgeweb::server::{Server, ServerConfig};
use edgeweb::worker_pool::Worker;

fn start_server(resource_dir: PathBuf) -> SocketAddr {
    let listener = MioTcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();

    let (event_tx, event_rx) = unbounded();
    let (completion_tx, completion_rx) = unbounded();

    let config = ServerConfig {
        trigger_mode: TriggerMode::from_u8(3),
        connection_timeout: None,
        resource_dir: Arc::new(resource_dir),
    };

    let mut server: Server<MioTcpListener, MioTcpStream> = Server::new(
        listener,
        event_tx,
        completion_rx,
        config,
        DbPool::disconnected(),
        Logger::discard(),
    )
    .unwrap();
    let waker = server.waker();

    for _ in 0..2 {
        let events = event_rx.clone();
        let completions = completion_tx.clone();
        let waker = Arc::clone(&waker);
        thread::spawn(move || Worker::new(events, completions, waker, true).run());
    }

    thread::spawn(move || {
        let _ = server.run();
    });

    addr
}

fn temp_resource_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("edgeweb-it-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_file(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn request(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(raw).unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn serves_a_static_file_over_a_real_socket() {
    let dir = temp_resource_dir("static");
    write_file(&dir, "index.html", "<html>hello</html>");

    let addr = start_server(dir);
    let text = request(
        addr,
        b"GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(text.starts_with("HTTP/1.1 200"), "unexpected status line: {text}");
    assert!(text.contains("<html>hello</html>"));
}

#[test]
fn missing_file_returns_404() {
    let dir = temp_resource_dir("404");
    write_file(&dir, "404.html", "<html>not found</html>");

    let addr = start_server(dir);
    let text = request(
        addr,
        b"GET /nope.html HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );

    assert!(text.starts_with("HTTP/1.1 404"), "unexpected status line: {text}");
}

#[test]
fn root_path_is_rewritten_to_index_html() {
    let dir = temp_resource_dir("root");
    write_file(&dir, "index.html", "<html>home</html>");

    let addr = start_server(dir);
    let text = request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");

    assert!(text.starts_with("HTTP/1.1 200"), "unexpected status line: {text}");
    assert!(text.contains("<html>home</html>"));
}

#[test]
fn keep_alive_connection_serves_a_second_request_on_the_same_socket() {
    let dir = temp_resource_dir("keepalive");
    write_file(&dir, "index.html", "<html>one</html>");
    write_file(&dir, "style.css", "body{}");

    let addr = start_server(dir);
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let first = String::from_utf8_lossy(&buf[..n]);
    assert!(first.starts_with("HTTP/1.1 200"));
    assert!(first.contains("<html>one</html>"));

    stream
        .write_all(b"GET /style.css HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    let second = String::from_utf8_lossy(&rest);
    assert!(second.starts_with("HTTP/1.1 200"), "unexpected second response: {second}");
    assert!(second.contains("body{}"));
}
