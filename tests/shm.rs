mod common;

use common::{
    create_buffer, create_pool, create_window, fill_with_gradient_bytes, present, Recorder, TestServer, ARGB8888,
    XRGB8888,
};
use reflector::wayland::{
    shm::{RegionError, SharedMemoryRegion},
    wire::Message,
};

#[test]
fn both_formats_are_advertised() {
    let test = TestServer::start();
    let mut client = test.connect();
    let shm = client.bind("wl_shm", 1);
    let formats = client
        .roundtrip()
        .into_iter()
        .filter(|event| event.is(shm, 0))
        .map(|event| event.uint())
        .collect::<Vec<_>>();
    assert_eq!(formats, vec![ARGB8888, XRGB8888]);
}

#[test]
fn buffers_must_fit_their_pool() {
    let test = TestServer::start();
    let mut client = test.connect();
    let shm = client.bind("wl_shm", 1);
    let (_region, pool) = create_pool(&mut client, shm, test.dir.path(), 4096);

    create_buffer(&mut client, pool, 0, 32, 32, 128);
    assert!(client.is_connected());

    create_buffer(&mut client, pool, 64, 32, 32, 128);
    let error = client.expect_error();
    assert_eq!(error.object, pool);
    // invalid_stride
    assert_eq!(error.code, 1);
    assert!(error.message.contains("out of bounds"), "{}", error.message);
}

#[test]
fn invalid_buffer_parameters() {
    let test = TestServer::start();

    // stride smaller than a row
    let mut client = test.connect();
    let shm = client.bind("wl_shm", 1);
    let (_region, pool) = create_pool(&mut client, shm, test.dir.path(), 4096);
    create_buffer(&mut client, pool, 0, 32, 4, 100);
    assert_eq!(client.expect_error().code, 1);

    // unsupported format
    let mut client = test.connect();
    let shm = client.bind("wl_shm", 1);
    let (_region, pool) = create_pool(&mut client, shm, test.dir.path(), 4096);
    let buffer = client.new_id();
    client.send(
        Message::new(pool, 0)
            .new_id(buffer)
            .int(0)
            .int(8)
            .int(8)
            .int(32)
            .uint(0x3432_5241),
    );
    let error = client.expect_error();
    assert_eq!((error.object, error.code), (pool, 0));
}

#[test]
fn pool_larger_than_its_file_is_invalid_fd() {
    let test = TestServer::start();
    let mut client = test.connect();
    let shm = client.bind("wl_shm", 1);
    let region = SharedMemoryRegion::create_in(test.dir.path(), 1024).unwrap();
    let pool = client.new_id();
    client.send(
        Message::new(shm, 0)
            .new_id(pool)
            .fd(region.try_clone_fd().unwrap())
            .int(8192),
    );
    let error = client.expect_error();
    assert_eq!((error.object, error.code), (shm, 2));
}

#[test]
fn pools_only_grow() {
    let test = TestServer::start();
    let mut client = test.connect();
    let shm = client.bind("wl_shm", 1);
    let (_region, pool) = create_pool(&mut client, shm, test.dir.path(), 4096);
    client.send(Message::new(pool, 2).int(2048));
    let error = client.expect_error();
    assert_eq!((error.object, error.code), (pool, 2));
}

#[test]
fn buffers_outlive_their_pool() {
    let recorder = Recorder::default();
    let test = TestServer::with_handler(recorder.clone());
    let mut client = test.connect();
    let compositor = client.bind("wl_compositor", 4);
    let shm = client.bind("wl_shm", 1);
    let wm_base = client.bind("xdg_wm_base", 1);

    let (mut region, pool) = create_pool(&mut client, shm, test.dir.path(), 4096);
    fill_with_gradient_bytes(region.as_mut_slice(), 32, 32);
    let buffer = create_buffer(&mut client, pool, 0, 32, 32, 128);
    // wl_shm_pool.destroy
    client.send(Message::new(pool, 1));
    drop(region);

    let window = create_window(&mut client, compositor, wm_base);
    client.send(Message::new(window.xdg_surface, 4).uint(window.serial.into()));
    present(&mut client, window.surface, buffer, (32, 32));
    client.roundtrip();

    let commits = recorder.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].first_pixel, Some(0xFFFF_0000));
}

#[test]
fn replaced_buffers_are_released() {
    let test = TestServer::start();
    let mut client = test.connect();
    let compositor = client.bind("wl_compositor", 4);
    let shm = client.bind("wl_shm", 1);
    let wm_base = client.bind("xdg_wm_base", 1);
    let (_region, pool) = create_pool(&mut client, shm, test.dir.path(), 8192);
    let first = create_buffer(&mut client, pool, 0, 32, 32, 128);
    let second = create_buffer(&mut client, pool, 4096, 32, 32, 128);

    let window = create_window(&mut client, compositor, wm_base);
    client.send(Message::new(window.xdg_surface, 4).uint(window.serial.into()));
    present(&mut client, window.surface, first, (32, 32));
    let events = client.roundtrip();
    assert!(!events.iter().any(|event| event.is(first, 0)));

    present(&mut client, window.surface, second, (32, 32));
    let events = client.roundtrip();
    assert!(events.iter().any(|event| event.is(first, 0)));
    assert!(!events.iter().any(|event| event.is(second, 0)));
}

#[test]
fn region_needs_a_runtime_dir() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    assert!(matches!(
        SharedMemoryRegion::create_in(&missing, 4096),
        Err(RegionError::Io(_))
    ));
}
