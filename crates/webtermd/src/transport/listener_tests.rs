//! Tests for the graceful listener.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use super::test_utils::HoldingHandler;
use super::{
    ConnectionLimits, EchoHandler, GracefulListener, ListenSource, LineService, ListenerError,
};
use crate::events::{self, EventWriter};
use crate::lifecycle::Service;

#[fixture]
fn listener() -> GracefulListener {
    GracefulListener::bind("127.0.0.1:0").expect("bind listener")
}

fn address(listener: &GracefulListener) -> SocketAddr {
    listener.local_addr().expect("listener address")
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[rstest]
fn accept_tracks_open_connections(listener: GracefulListener) {
    let addr = address(&listener);
    let _first = TcpStream::connect(addr).expect("connect first");
    let _second = TcpStream::connect(addr).expect("connect second");

    let first = listener.accept().expect("accept first");
    let second = listener.accept().expect("accept second");
    assert_eq!(listener.open_connections(), 2);

    first.close().expect("close first");
    first.close().expect("second close is harmless");
    assert_eq!(listener.open_connections(), 1);

    drop(first);
    assert_eq!(listener.open_connections(), 1);
    drop(second);
    assert_eq!(listener.open_connections(), 0);
}

#[rstest]
fn second_close_reports_already_closed(listener: GracefulListener) {
    listener.close().expect("first close succeeds");
    assert!(listener.is_stopped());
    let error = listener.close().expect_err("second close fails");
    assert!(matches!(error, ListenerError::AlreadyClosed));
    assert!(listener.raw_fd().is_none());
}

#[rstest]
fn close_interrupts_a_waiting_accept(listener: GracefulListener) {
    let listener = Arc::new(listener);
    let acceptor = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.accept().map(|_| ()))
    };
    thread::sleep(Duration::from_millis(50));
    listener.close().expect("close listener");

    let outcome = acceptor.join().expect("acceptor thread");
    assert!(outcome.is_err(), "accept must fail after close");
    assert!(listener.is_stopped());
}

#[rstest]
fn accept_never_succeeds_after_close(listener: GracefulListener) {
    listener.close().expect("close listener");
    let error = listener.accept().expect_err("accept after close");
    assert_eq!(error.kind(), std::io::ErrorKind::NotConnected);
    assert_eq!(listener.open_connections(), 0);
}

#[rstest]
fn queued_connections_are_not_accepted_after_close(listener: GracefulListener) {
    let addr = address(&listener);
    let successor = listener.file().expect("duplicate keeps the socket alive");
    let _queued = TcpStream::connect(addr).expect("queued in backlog");
    listener.close().expect("close listener");

    assert!(listener.is_stopped());
    let error = listener.accept().expect_err("stopped listener must not accept");
    assert_eq!(error.kind(), std::io::ErrorKind::NotConnected);
    assert_eq!(listener.open_connections(), 0);
    drop(successor);
}

#[rstest]
fn file_is_unavailable_after_close(listener: GracefulListener) {
    listener.file().expect("descriptor before close");
    listener.close().expect("close listener");
    assert!(matches!(listener.file(), Err(ListenerError::AlreadyClosed)));
}

#[rstest]
fn duplicated_descriptor_keeps_serving_after_close(listener: GracefulListener) {
    let addr = address(&listener);
    let successor = TcpListener::from(listener.file().expect("duplicate descriptor"));
    listener.close().expect("close original");

    let _client = TcpStream::connect(addr).expect("connect after handoff");
    successor
        .set_nonblocking(false)
        .expect("blocking successor");
    successor.accept().expect("successor accepts");
}

#[test]
fn binding_an_address_in_use_fails() {
    let reserved = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let addr = reserved.local_addr().expect("reserved address").to_string();
    let error = GracefulListener::bind(&addr).expect_err("bind must fail");
    assert!(matches!(error, ListenerError::Bind { .. }));
}

#[test]
fn line_service_echoes_and_stops_cleanly() {
    let service = Arc::new(LineService::new(
        ListenSource::Address("127.0.0.1:0".to_owned()),
        Arc::new(EchoHandler::new(ConnectionLimits {
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            max_request_bytes: 1024,
        })),
    ));
    service.bind().expect("bind service");
    let addr = service
        .listener()
        .and_then(|listener| listener.local_addr())
        .expect("service address");

    let (sender, receiver) = events::channel(events::EVENT_CHANNEL_CAPACITY);
    let consumer = receiver
        .spawn(EventWriter::discard())
        .expect("spawn consumer");
    let server = {
        let service = Arc::clone(&service);
        let sender = sender.clone();
        thread::spawn(move || service.serve(&sender))
    };

    let mut client = TcpStream::connect(addr).expect("connect client");
    client.write_all(b"ping\n").expect("write request");
    let mut reply = String::new();
    BufReader::new(&client)
        .read_line(&mut reply)
        .expect("read reply");
    assert_eq!(reply, "ping\n");

    service.stop_listening();
    service.stop_listening();
    server
        .join()
        .expect("server thread")
        .expect("serve returns cleanly after stop");
    sender.close();
    consumer
        .wait_drained(Some(Duration::from_secs(2)))
        .expect("drain events");
}

#[test]
fn ready_hook_runs_once_before_accepting() {
    let (count, handler) = HoldingHandler::new();
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let service = {
        let hook_calls = Arc::clone(&hook_calls);
        Arc::new(
            LineService::new(ListenSource::Address("127.0.0.1:0".to_owned()), handler.clone())
                .on_ready(move |_| {
                    hook_calls.fetch_add(1, Ordering::SeqCst);
                }),
        )
    };
    service.bind().expect("bind service");
    let listener = service.listener().expect("listener");
    let addr = address(&listener);
    let (sender, _receiver) = events::channel(64);
    let server = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.serve(&sender))
    };

    let _client = TcpStream::connect(addr).expect("connect client");
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(listener.open_connections(), 1);

    service.stop_listening();
    server.join().expect("server thread").expect("serve ok");
    assert_eq!(listener.open_connections(), 1, "in-flight connection survives");
    handler.release_all();
    assert_eq!(listener.open_connections(), 0);
}
