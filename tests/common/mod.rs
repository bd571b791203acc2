#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    os::unix::{io::OwnedFd, net::UnixStream},
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use reflector::{
    utils::Serial,
    wayland::{
        compositor::{CompositorHandler, SurfaceAttributes, SurfaceId},
        shm::SharedMemoryRegion,
        wire::{self, ArgumentReader, ArgumentType, Message, MessageHeader, ObjectId, HEADER_SIZE},
    },
    Reflector, ServerConfig,
};
use tempfile::TempDir;

use ArgumentType::{Array, Int, Object, Str, Uint};

pub const DISPLAY_ERROR: u16 = 0;
pub const DISPLAY_DELETE_ID: u16 = 1;

const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A server in a private runtime directory
pub struct TestServer {
    pub server: Reflector,
    pub dir: TempDir,
}

impl TestServer {
    pub fn start() -> TestServer {
        Self::with_handler(Recorder::default())
    }

    pub fn with_handler(handler: Recorder) -> TestServer {
        Self::with_config(|config| config, handler)
    }

    pub fn with_config(configure: impl FnOnce(ServerConfig) -> ServerConfig, handler: Recorder) -> TestServer {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = configure(ServerConfig::default().with_runtime_dir(dir.path()));
        let server = Reflector::with_handler(config, handler).unwrap();
        TestServer { server, dir }
    }

    pub fn connect(&self) -> TestClient {
        TestClient::connect(self.server.socket_path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub surface: SurfaceId,
    pub buffer: Option<(i32, i32, i32)>,
    pub damage: usize,
    pub first_pixel: Option<u32>,
}

/// Compositing stage keeping track of what it was shown
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub commits: Arc<Mutex<Vec<CommitRecord>>>,
    pub destroyed: Arc<Mutex<Vec<SurfaceId>>>,
}

impl Recorder {
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().unwrap().clone()
    }
}

impl CompositorHandler for Recorder {
    fn commit(&mut self, surface: SurfaceId, state: &SurfaceAttributes) {
        let buffer = state.buffer.as_ref().map(|buffer| {
            let data = buffer.data();
            (data.width, data.height, data.stride)
        });
        let first_pixel = state.buffer.as_ref().and_then(|buffer| {
            buffer
                .with_contents(|bytes, _| u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                .ok()
        });
        self.commits.lock().unwrap().push(CommitRecord {
            surface,
            buffer,
            damage: state.damage.len(),
            first_pixel,
        });
    }

    fn destroyed(&mut self, surface: SurfaceId) {
        self.destroyed.lock().unwrap().push(surface);
    }
}

/// An event read by the test client
#[derive(Debug)]
pub struct Event {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Event {
    pub fn sender(&self) -> ObjectId {
        ObjectId::new(self.header.sender_id)
    }

    pub fn opcode(&self) -> u16 {
        self.header.opcode
    }

    pub fn is(&self, sender: ObjectId, opcode: u16) -> bool {
        self.sender() == sender && self.opcode() == opcode
    }

    pub fn args(&self, signature: &[ArgumentType]) -> ArgumentReader {
        Message::parse(self.header, &self.body, signature, &mut VecDeque::new())
            .unwrap()
            .into_reader()
    }

    pub fn uint(&self) -> u32 {
        self.args(&[Uint]).uint().unwrap()
    }
}

/// A protocol error reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub object: ObjectId,
    pub code: u32,
    pub message: String,
}

/// A client speaking the raw wire protocol
pub struct TestClient {
    stream: UnixStream,
    incoming: Vec<u8>,
    incoming_fds: VecDeque<OwnedFd>,
    next_id: u32,
    hung_up: bool,
}

impl TestClient {
    pub fn connect(path: &Path) -> TestClient {
        TestClient {
            stream: UnixStream::connect(path).unwrap(),
            incoming: Vec::new(),
            incoming_fds: VecDeque::new(),
            next_id: 2,
            hung_up: false,
        }
    }

    pub fn new_id(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn send(&mut self, message: Message) {
        let mut bytes = Vec::new();
        let mut fds = Vec::new();
        message.encode(&mut bytes, &mut fds).unwrap();
        let mut written = 0;
        let deadline = Instant::now() + TIMEOUT;
        while written < bytes.len() {
            let fds = if written == 0 { &fds[..] } else { &[][..] };
            match wire::send_with_fds(&self.stream, &bytes[written..], fds) {
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(1))
                }
                // the server may already have closed the connection
                Err(_) => return,
            }
        }
    }

    /// The next event, `None` once the server closed the connection
    pub fn next_event(&mut self) -> Option<Event> {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(header) = MessageHeader::peek(&self.incoming).unwrap() {
                if self.incoming.len() >= header.size {
                    let frame = self.incoming.drain(..header.size).collect::<Vec<u8>>();
                    return Some(Event {
                        header,
                        body: frame[HEADER_SIZE..].to_vec(),
                    });
                }
            }
            if self.hung_up {
                return None;
            }
            let mut buf = [0u8; 4096];
            match wire::recv_with_fds(&self.stream, &mut buf, &mut self.incoming_fds) {
                Ok(0) => self.hung_up = true,
                Ok(n) => self.incoming.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "timed out waiting for an event");
                    thread::sleep(Duration::from_millis(1));
                }
                Err(_) => self.hung_up = true,
            }
        }
    }

    /// Send `wl_display.sync` and collect every event received before its `done`
    ///
    /// Stops early if the connection is closed.
    pub fn roundtrip(&mut self) -> Vec<Event> {
        let callback = self.new_id();
        self.send(Message::new(ObjectId::DISPLAY, 0).new_id(callback));
        let mut events = Vec::new();
        while let Some(event) = self.next_event() {
            if event.is(callback, 0) {
                break;
            }
            events.push(event);
        }
        events
    }

    /// Read until the server reports a protocol error and closes the connection
    pub fn expect_error(&mut self) -> ReportedError {
        let mut reported = None;
        while let Some(event) = self.next_event() {
            if event.is(ObjectId::DISPLAY, DISPLAY_ERROR) {
                let mut args = event.args(&[Object, Uint, Str]);
                reported = Some(ReportedError {
                    object: args.object().unwrap().unwrap(),
                    code: args.uint().unwrap(),
                    message: args.string().unwrap().unwrap_or_default(),
                });
            }
        }
        reported.expect("connection closed without a protocol error")
    }

    /// Whether the server still answers
    pub fn is_connected(&mut self) -> bool {
        self.roundtrip();
        !self.hung_up
    }

    /// Create a registry and return it with the advertised globals
    pub fn registry(&mut self) -> (ObjectId, Vec<(u32, String, u32)>) {
        let registry = self.new_id();
        self.send(Message::new(ObjectId::DISPLAY, 1).new_id(registry));
        let globals = self
            .roundtrip()
            .into_iter()
            .filter(|event| event.is(registry, 0))
            .map(|event| {
                let mut args = event.args(&[Uint, Str, Uint]);
                (
                    args.uint().unwrap(),
                    args.string().unwrap().unwrap(),
                    args.uint().unwrap(),
                )
            })
            .collect();
        (registry, globals)
    }

    /// Bind the global advertising `interface`
    pub fn bind(&mut self, interface: &str, version: u32) -> ObjectId {
        let (registry, globals) = self.registry();
        let (name, _, _) = globals
            .iter()
            .find(|(_, global, _)| global == interface)
            .cloned()
            .unwrap_or_else(|| panic!("{} is not advertised", interface));
        let id = self.new_id();
        self.send(
            Message::new(registry, 0)
                .uint(name)
                .string(interface)
                .uint(version)
                .new_id(id),
        );
        id
    }

    pub fn create_surface(&mut self, compositor: ObjectId) -> ObjectId {
        let surface = self.new_id();
        self.send(Message::new(compositor, 0).new_id(surface));
        surface
    }
}

/// A toplevel created through `xdg_wm_base`, with its pending configure
pub struct Window {
    pub surface: ObjectId,
    pub xdg_surface: ObjectId,
    pub toplevel: ObjectId,
    pub size: (i32, i32),
    pub states: Vec<u32>,
    pub serial: Serial,
}

/// Create a surface and give it the toplevel role, returning the first configure
pub fn create_window(client: &mut TestClient, compositor: ObjectId, wm_base: ObjectId) -> Window {
    let surface = client.create_surface(compositor);
    let xdg_surface = client.new_id();
    client.send(Message::new(wm_base, 2).new_id(xdg_surface).object(Some(surface)));
    let toplevel = client.new_id();
    client.send(Message::new(xdg_surface, 1).new_id(toplevel));
    let events = client.roundtrip();
    let (size, states, serial) = read_configure(&events, xdg_surface, toplevel).expect("no configure sent");
    Window {
        surface,
        xdg_surface,
        toplevel,
        size,
        states,
        serial,
    }
}

/// The newest `xdg_toplevel.configure` + `xdg_surface.configure` pair in `events`
pub fn read_configure(
    events: &[Event],
    xdg_surface: ObjectId,
    toplevel: ObjectId,
) -> Option<((i32, i32), Vec<u32>, Serial)> {
    let mut pending = None;
    let mut last = None;
    for event in events {
        if event.is(toplevel, 0) {
            let mut args = event.args(&[Int, Int, Array]);
            let size = (args.int().unwrap(), args.int().unwrap());
            let states = args
                .array()
                .unwrap()
                .chunks_exact(4)
                .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect::<Vec<_>>();
            pending = Some((size, states));
        } else if event.is(xdg_surface, 0) {
            let serial = Serial::from(event.uint());
            if let Some((size, states)) = pending.take() {
                last = Some((size, states, serial));
            }
        }
    }
    last
}

pub const ARGB8888: u32 = 0;
pub const XRGB8888: u32 = 1;

/// Create a shm pool of `size` bytes, backed by a fresh region in `dir`
pub fn create_pool(client: &mut TestClient, shm: ObjectId, dir: &Path, size: usize) -> (SharedMemoryRegion, ObjectId) {
    let region = SharedMemoryRegion::create_in(dir, size).unwrap();
    let pool = client.new_id();
    client.send(
        Message::new(shm, 0)
            .new_id(pool)
            .fd(region.try_clone_fd().unwrap())
            .int(size as i32),
    );
    (region, pool)
}

pub fn create_buffer(client: &mut TestClient, pool: ObjectId, offset: i32, width: i32, height: i32, stride: i32) -> ObjectId {
    let buffer = client.new_id();
    client.send(
        Message::new(pool, 0)
            .new_id(buffer)
            .int(offset)
            .int(width)
            .int(height)
            .int(stride)
            .uint(ARGB8888),
    );
    buffer
}

/// Attach `buffer`, damage all of it and commit
pub fn present(client: &mut TestClient, surface: ObjectId, buffer: ObjectId, size: (i32, i32)) {
    client.send(Message::new(surface, 1).object(Some(buffer)).int(0).int(0));
    client.send(Message::new(surface, 2).int(0).int(0).int(size.0).int(size.1));
    client.send(Message::new(surface, 6));
}

/// Fill an ARGB8888 canvas with a gradient
pub fn fill_with_gradient_bytes(canvas: &mut [u8], width: u32, height: u32) {
    canvas.chunks_exact_mut(4).enumerate().for_each(|(index, chunk)| {
        let x = (index % width as usize) as u32;
        let y = (index / width as usize) as u32;

        let a = 0xFF;
        let r = u32::min(((width - x) * 0xFF) / width, ((height - y) * 0xFF) / height);
        let g = u32::min((x * 0xFF) / width, ((height - y) * 0xFF) / height);
        let b = u32::min(((width - x) * 0xFF) / width, (y * 0xFF) / height);
        let color = (a << 24) + (r << 16) + (g << 8) + b;

        chunk.copy_from_slice(&color.to_ne_bytes());
    });
}
