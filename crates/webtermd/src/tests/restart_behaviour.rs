//! Behavioural tests for handing the listener to a successor.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rstest::rstest;

use crate::events::EventWriter;
use crate::lifecycle::{Collaborators, LifecycleError, LifecycleState, Service, WorkClient};
use crate::process::{RestartError, SignalHandler};
use crate::process::restart::MockProcessSpawner;
use crate::transport::test_utils::HoldingHandler;
use crate::transport::{
    ConnectionLimits, EchoHandler, GracefulListener, LineService, ListenSource,
};

use super::support::{
    FakeService, Journal, SharedBuffer, collaborators, start, test_config, wait_until,
};

fn argv() -> Vec<OsString> {
    ["/usr/local/bin/webtermd", "--web-addr", "127.0.0.1:0", "--fd=7"]
        .map(OsString::from)
        .to_vec()
}

#[rstest]
fn restart_hands_off_while_a_connection_is_in_flight() {
    let buffer = SharedBuffer::default();
    let (accepted, handler) = HoldingHandler::new();
    let service = Arc::new(LineService::new(
        ListenSource::Address("127.0.0.1:0".to_owned()),
        handler.clone(),
    ));

    let mut spawner = MockProcessSpawner::new();
    spawner
        .expect_spawn()
        .times(1)
        .withf(|plan| {
            plan.program == OsString::from("/usr/local/bin/webtermd")
                && plan.args
                    == ["--web-addr", "127.0.0.1:0", "--fd=3"]
                        .map(OsString::from)
                        .to_vec()
                && plan.target_fd == 3
                && plan.listener_fd.as_raw_fd() >= 0
        })
        .returning(|_| Ok(4242));

    let client = WorkClient::configure_with(
        test_config(),
        service.clone(),
        Collaborators {
            spawner: Box::new(spawner),
            argv: argv(),
            ..collaborators(&buffer, None)
        },
    )
    .expect("configure client");
    let runner = start(&client);
    let listener = service_listener(&service);
    let addr = listener.local_addr().expect("bound address");

    let _in_flight = TcpStream::connect(addr).expect("first connection");
    assert!(wait_until(|| accepted.load(Ordering::SeqCst) == 1));

    assert_eq!(client.restart().expect("restart"), 4242);
    assert!(!listener.is_stopped(), "predecessor keeps serving");
    assert_eq!(listener.open_connections(), 1);

    let _after = TcpStream::connect(addr).expect("connection after restart");
    assert!(wait_until(|| accepted.load(Ordering::SeqCst) == 2));

    handler.release_all();
    assert!(
        wait_until(|| listener.open_connections() == 0),
        "in-flight connections still count against the original listener"
    );
    client.close().expect("close");
    runner.join().expect("run thread").expect("run succeeds");
    assert!(listener.is_stopped());
    assert!(buffer.contents().contains(&format!("listening on {addr}")));
}

fn service_listener(service: &LineService) -> Arc<GracefulListener> {
    service.listener().expect("service is bound")
}

#[rstest]
fn spawn_failure_leaves_the_predecessor_serving() {
    let buffer = SharedBuffer::default();
    let service = Arc::new(LineService::new(
        ListenSource::Address("127.0.0.1:0".to_owned()),
        Arc::new(EchoHandler::new(ConnectionLimits {
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            max_request_bytes: 64,
        })),
    ));
    let mut spawner = MockProcessSpawner::new();
    spawner
        .expect_spawn()
        .times(1)
        .returning(|_| Err(std::io::Error::other("exec format error")));

    let client = WorkClient::configure_with(
        test_config(),
        service.clone(),
        Collaborators {
            spawner: Box::new(spawner),
            argv: argv(),
            ..collaborators(&buffer, None)
        },
    )
    .expect("configure client");
    let runner = start(&client);

    let error = client.restart().expect_err("spawn fails");
    assert!(matches!(
        error,
        LifecycleError::Restart(RestartError::Spawn { .. })
    ));

    let listener = service_listener(&service);
    let addr = listener.local_addr().expect("bound address");
    let mut stream = TcpStream::connect(addr).expect("still accepting");
    stream.write_all(b"ping\n").expect("send request");
    let mut reply = String::new();
    stream.read_to_string(&mut reply).expect("read echo");
    assert_eq!(reply, "ping\n");

    client.close().expect("close");
    runner.join().expect("run thread").expect("run succeeds");
}

#[rstest]
fn failed_signal_restart_is_logged_and_serving_continues() {
    let buffer = SharedBuffer::default();
    let service = Arc::new(LineService::new(
        ListenSource::Address("127.0.0.1:0".to_owned()),
        Arc::new(EchoHandler::new(ConnectionLimits {
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            max_request_bytes: 64,
        })),
    ));
    let mut spawner = MockProcessSpawner::new();
    spawner
        .expect_spawn()
        .times(1)
        .returning(|_| Err(std::io::Error::other("no such file")));

    let client = WorkClient::configure_with(
        test_config(),
        service,
        Collaborators {
            spawner: Box::new(spawner),
            argv: argv(),
            ..collaborators(&buffer, None)
        },
    )
    .expect("configure client");
    let runner = start(&client);

    client.signal_handler().restart();
    assert_eq!(client.state(), LifecycleState::Running);

    client.close().expect("close");
    runner.join().expect("run thread").expect("run succeeds");
    assert_eq!(buffer.count("# initiated graceful restart"), 1);
    assert_eq!(buffer.count("ERROR: graceful restart failed"), 1);
    assert_eq!(buffer.count("started successor"), 0);
}

#[rstest]
fn restart_requires_a_listener() {
    let buffer = SharedBuffer::default();
    let client = WorkClient::configure_with(
        test_config(),
        Arc::new(FakeService::new(Journal::default())),
        collaborators(&buffer, None),
    )
    .expect("configure client");
    assert!(matches!(
        client.restart(),
        Err(LifecycleError::InvalidState {
            operation: "restart",
            state: LifecycleState::Configured,
        })
    ));

    let runner = start(&client);
    assert!(matches!(
        client.restart(),
        Err(LifecycleError::Restart(RestartError::NoListener))
    ));
    client.close().expect("close");
    runner.join().expect("run thread").expect("run succeeds");
}

#[rstest]
fn discarded_event_writer_still_allows_a_full_cycle() {
    let client = WorkClient::configure_with(
        test_config(),
        Arc::new(FakeService::new(Journal::default())),
        Collaborators {
            event_writer: EventWriter::discard(),
            ..collaborators(&SharedBuffer::default(), None)
        },
    )
    .expect("configure client");
    let runner = start(&client);
    client.close().expect("close");
    runner.join().expect("run thread").expect("run succeeds");
    assert_eq!(client.state(), LifecycleState::Closed);
}
