mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use common::{create_window, TestClient, TestServer, DISPLAY_DELETE_ID};
use reflector::{
    wayland::{
        compositor::{CompositorState, NoopCompositor},
        interfaces::WL_COMPOSITOR,
        registry::RegistryError,
        wire::{Message, ObjectId},
    },
    Reflector, ServerConfig, ServerError,
};

#[test]
fn socket_exists_until_terminate() {
    let TestServer { mut server, dir } = TestServer::start();
    let socket = server.socket_path().to_path_buf();
    let lock = dir.path().join(format!("{}.lock", server.socket_name()));
    assert!(socket.exists());
    assert!(lock.exists());
    assert!(server.is_running());

    server.terminate().unwrap();
    assert!(!server.is_running());
    assert!(!socket.exists());
    assert!(!lock.exists());

    // a second request is a no-op
    server.terminate().unwrap();
}

#[test]
fn socket_name_is_configurable() {
    let test = TestServer::with_config(|config| config.with_socket_name("reflector-test"), Default::default());
    assert_eq!(test.server.socket_name(), "reflector-test");
    assert_eq!(test.server.socket_path(), test.dir.path().join("reflector-test"));
}

#[test]
fn taken_socket_name_fails_startup() {
    let test = TestServer::with_config(|config| config.with_socket_name("wayland-taken"), Default::default());
    let config = ServerConfig::default()
        .with_runtime_dir(test.dir.path())
        .with_socket_name("wayland-taken");
    assert!(matches!(Reflector::start(config), Err(ServerError::Socket(_))));
}

#[test]
fn duplicate_global_fails_startup() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::default()
        .with_runtime_dir(dir.path())
        .with_socket_name("wayland-dup");
    let result = Reflector::with_globals(config, NoopCompositor, |globals| {
        globals.advertise(&WL_COMPOSITOR, 4, CompositorState).map(|_| ())
    });
    assert!(matches!(
        result,
        Err(ServerError::Registry(RegistryError::DuplicateInterface("wl_compositor")))
    ));
    assert!(!dir.path().join("wayland-dup").exists());
}

#[test]
fn registry_lists_globals_in_order() {
    let test = TestServer::start();
    let mut client = test.connect();
    let (_, globals) = client.registry();
    assert_eq!(
        globals,
        vec![
            (1, "wl_compositor".to_owned(), 4),
            (2, "wl_shm".to_owned(), 1),
            (3, "wl_shell".to_owned(), 1),
            (4, "xdg_wm_base".to_owned(), 1),
        ]
    );
}

#[test]
fn unknown_object_is_invalid_object() {
    let test = TestServer::start();
    let mut client = test.connect();
    client.send(Message::new(ObjectId::new(42), 0));
    let error = client.expect_error();
    assert_eq!(error.object, ObjectId::DISPLAY);
    assert_eq!(error.code, 0);
}

#[test]
fn bind_above_advertised_version_is_refused() {
    let test = TestServer::start();
    let mut client = test.connect();
    client.bind("wl_shm", 2);
    let error = client.expect_error();
    assert_eq!(error.object, ObjectId::DISPLAY);
    assert_eq!(error.code, 0);
}

#[test]
fn destructor_requests_release_the_id() {
    let test = TestServer::start();
    let mut client = test.connect();
    let compositor = client.bind("wl_compositor", 4);
    let region = client.new_id();
    client.send(Message::new(compositor, 1).new_id(region));
    client.send(Message::new(region, 1).int(0).int(0).int(10).int(10));
    client.send(Message::new(region, 0));
    let events = client.roundtrip();
    assert!(events
        .iter()
        .any(|event| event.is(ObjectId::DISPLAY, DISPLAY_DELETE_ID) && event.uint() == region.protocol_id()));

    // the id may be used again
    client.send(Message::new(compositor, 1).new_id(region));
    client.roundtrip();
    assert!(client.is_connected());
}

#[test]
fn reused_live_id_is_fatal() {
    let test = TestServer::start();
    let mut client = test.connect();
    let compositor = client.bind("wl_compositor", 4);
    let surface = client.create_surface(compositor);
    client.send(Message::new(compositor, 1).new_id(surface));
    let error = client.expect_error();
    assert_eq!(error.object, ObjectId::DISPLAY);
    assert_eq!(error.code, 0);
}

#[test]
fn protocol_error_only_drops_the_offending_client() {
    let test = TestServer::start();
    let mut good = test.connect();
    let mut bad = test.connect();
    good.registry();

    bad.send(Message::new(ObjectId::new(7), 3));
    bad.expect_error();

    let (_, globals) = good.registry();
    assert_eq!(globals.len(), 4);
    let mut late = test.connect();
    assert_eq!(late.registry().1.len(), 4);
}

#[test]
fn shutdown_closes_windows_and_withdraws_globals() {
    let TestServer { mut server, dir: _dir } = TestServer::start();
    let mut client = TestClient::connect(server.socket_path());
    let compositor = client.bind("wl_compositor", 4);
    let wm_base = client.bind("xdg_wm_base", 1);
    let window = create_window(&mut client, compositor, wm_base);
    let (registry, _) = client.registry();

    let started = Instant::now();
    server.terminate().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let mut closed = false;
    let mut removed = Vec::new();
    while let Some(event) = client.next_event() {
        if event.is(window.toplevel, 1) {
            closed = true;
        } else if event.is(registry, 1) {
            removed.push(event.uint());
        }
    }
    assert!(closed);
    assert_eq!(removed, vec![1, 2, 3, 4]);
}

#[test]
fn terminate_from_another_thread() {
    let TestServer { mut server, dir: _dir } = TestServer::start();
    let handle = server.terminate_handle().unwrap();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.terminate();
        // already stopped, nothing happens
        handle.terminate();
    });
    server.wait_for_exit().unwrap();
    assert!(!server.is_running());
    stopper.join().unwrap();
}

#[test]
fn shutdown_reaches_every_client() {
    let TestServer { mut server, dir: _dir } = TestServer::start();

    let mut windowed = Vec::new();
    for _ in 0..3 {
        let mut client = TestClient::connect(server.socket_path());
        let compositor = client.bind("wl_compositor", 4);
        let wm_base = client.bind("xdg_wm_base", 1);
        let first = create_window(&mut client, compositor, wm_base);
        let second = create_window(&mut client, compositor, wm_base);
        // map one of the two windows
        client.send(Message::new(first.xdg_surface, 4).uint(first.serial.into()));
        let (registry, _) = client.registry();
        windowed.push((client, registry, vec![first.toplevel, second.toplevel]));
    }
    let mut idle = Vec::new();
    for _ in 0..3 {
        let mut client = TestClient::connect(server.socket_path());
        let (registry, _) = client.registry();
        idle.push((client, registry));
    }
    // connected, but never sent a request
    let mut silent = TestClient::connect(server.socket_path());

    let started = Instant::now();
    server.terminate().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    for (mut client, registry, toplevels) in windowed {
        let mut closed = Vec::new();
        let mut removed = Vec::new();
        while let Some(event) = client.next_event() {
            if event.opcode() == 1 && toplevels.contains(&event.sender()) {
                closed.push(event.sender());
            } else if event.is(registry, 1) {
                removed.push(event.uint());
            }
        }
        closed.sort_by_key(|id| id.protocol_id());
        assert_eq!(closed, toplevels);
        assert_eq!(removed, vec![1, 2, 3, 4]);
    }
    for (mut client, registry) in idle {
        let mut removed = Vec::new();
        while let Some(event) = client.next_event() {
            if event.is(registry, 1) {
                removed.push(event.uint());
            }
        }
        assert_eq!(removed, vec![1, 2, 3, 4]);
    }
    // nothing to tell, the connection just ends
    assert!(silent.next_event().is_none());
}
