//! The display event loop
//!
//! A [`DisplayEventLoop`] owns everything a running display needs: the listening socket,
//! the connected clients, the termination channel and the optional keep-alive timer, all
//! registered in a single [`calloop`] event loop. It is meant to run on a dedicated thread,
//! which is what [`Reflector`](crate::Reflector) does; nothing in it is `Send`.
//!
//! ```no_run
//! use reflector::{
//!     wayland::{compositor::NoopCompositor, event_loop::{DisplayEventLoop, Terminate}},
//!     ServerConfig,
//! };
//!
//! let (terminate, channel) = calloop::channel::channel::<Terminate>();
//! let display = DisplayEventLoop::new(
//!     ServerConfig::from_env(),
//!     Box::new(NoopCompositor),
//!     channel,
//!     |_globals| Ok(()),
//! )
//! .expect("Failed to start the display");
//! println!("Listening on {:?}", display.socket_path());
//! # drop(terminate);
//! display.run().expect("Display loop failed");
//! ```

use std::{
    collections::HashMap,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use calloop::{
    channel::{self, Channel},
    generic::Generic,
    timer::{TimeoutAction, Timer},
    EventLoop, Interest, LoopHandle, LoopSignal, Mode, PostAction, RegistrationToken,
};
use tracing::{debug, info, warn};

use super::{
    client::{Client, ClientError, ClientId},
    compositor::{CompositorHandler, CompositorState},
    interfaces::{WL_COMPOSITOR, WL_SHELL, WL_SHM, XDG_WM_BASE},
    registry::{GlobalRegistry, Registry, RegistryError},
    shell::{
        legacy::ShellState,
        xdg::{Toplevel, WmBase, XdgShellState},
        PingError,
    },
    shm::ShmState,
    socket::ListeningSocketSource,
};
use crate::{config::ServerConfig, reflector::ServerError, utils::SerialCounter};

/// Sentinel asking the display loop to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminate;

/// State shared by every client of a display
pub struct ServerState {
    /// The configuration the display was started with
    pub config: ServerConfig,
    /// The advertised globals
    pub globals: GlobalRegistry,
    /// Source of every serial sent to clients
    pub serials: SerialCounter,
    /// The compositing stage
    pub compositor: Box<dyn CompositorHandler>,
    start_time: Instant,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("globals", &self.globals)
            .field("serials", &self.serials)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// New state with no global advertised
    pub fn new(config: ServerConfig, compositor: Box<dyn CompositorHandler>) -> Self {
        ServerState {
            config,
            globals: GlobalRegistry::new(),
            serials: SerialCounter::new(),
            compositor,
            start_time: Instant::now(),
        }
    }

    /// Milliseconds since the server started, as sent in `wl_callback.done` of frame callbacks
    pub fn elapsed_ms(&self) -> u32 {
        self.start_time.elapsed().as_millis() as u32
    }
}

#[derive(Debug)]
struct ClientEntry {
    client: Client,
    token: RegistrationToken,
}

/// The data of the display event loop
pub struct DisplayState {
    /// State shared by all clients
    pub server: ServerState,
    clients: HashMap<ClientId, ClientEntry>,
    next_client: u64,
    handle: LoopHandle<'static, DisplayState>,
    signal: LoopSignal,
    socket: Option<RegistrationToken>,
    terminated: bool,
}

impl std::fmt::Debug for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayState")
            .field("server", &self.server)
            .field("clients", &self.clients)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

impl DisplayState {
    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether termination was requested
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Stop the loop
    ///
    /// Only the first call has an effect.
    pub fn terminate(&mut self) {
        if self.terminated {
            debug!("Display loop already terminating");
            return;
        }
        self.terminated = true;
        info!("Terminating display loop");
        self.signal.stop();
    }

    fn accept(&mut self, stream: UnixStream) {
        if self.terminated {
            debug!("Refusing connection during shutdown");
            return;
        }
        let id = ClientId(self.next_client);
        self.next_client += 1;

        let source = match stream.try_clone() {
            Ok(source) => source,
            Err(err) => {
                warn!(client = %id, "Failed to register client: {}", err);
                return;
            }
        };
        let client = match Client::new(id, stream) {
            Ok(client) => client,
            Err(err) => {
                warn!(client = %id, "Failed to set up client: {}", err);
                return;
            }
        };
        let token = self.handle.insert_source(
            Generic::new(source, Interest::READ, Mode::Level),
            move |_, _, state: &mut DisplayState| Ok(state.dispatch_client(id)),
        );
        match token {
            Ok(token) => {
                debug!(client = %id, "New client connected");
                self.clients.insert(id, ClientEntry { client, token });
            }
            Err(err) => warn!(client = %id, "Failed to register client: {}", err.error),
        }
    }

    fn dispatch_client(&mut self, id: ClientId) -> PostAction {
        let Some(entry) = self.clients.get_mut(&id) else {
            return PostAction::Remove;
        };
        let result = entry
            .client
            .dispatch(&mut self.server)
            .and_then(|()| entry.client.flush());
        match result {
            Ok(()) => PostAction::Continue,
            Err(reason) => {
                // the source is removed by the returned action
                self.drop_client(id, reason);
                PostAction::Remove
            }
        }
    }

    fn drop_client(&mut self, id: ClientId, reason: ClientError) -> Option<RegistrationToken> {
        let mut entry = self.clients.remove(&id)?;
        match &reason {
            ClientError::HungUp => debug!(client = %id, "Client disconnected"),
            ClientError::Protocol(err) => entry.client.post_error(err),
            other => warn!(client = %id, "Dropping client: {}", other),
        }
        entry.client.teardown(&mut self.server);
        Some(entry.token)
    }

    /// Disconnect a client from outside of its own dispatch
    fn disconnect(&mut self, id: ClientId, reason: ClientError) {
        if let Some(token) = self.drop_client(id, reason) {
            self.handle.remove(token);
        }
    }

    fn client_ids(&self) -> Vec<ClientId> {
        let mut ids = self.clients.keys().copied().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn flush_clients(&mut self) {
        let mut failed = Vec::new();
        for (id, entry) in self.clients.iter_mut() {
            if let Err(err) = entry.client.flush() {
                failed.push((*id, err));
            }
        }
        for (id, err) in failed {
            self.disconnect(id, err);
        }
    }

    /// Ping every `xdg_wm_base`, reporting those that did not answer the previous ping
    pub fn ping_clients(&mut self) {
        for id in self.client_ids() {
            let Some(entry) = self.clients.get_mut(&id) else {
                continue;
            };
            let mut ctx = entry.client.context(&mut self.server);
            for base in ctx.objects.ids_of::<WmBase>() {
                let result = ctx.with_object::<WmBase, _>(base, |wm_base, ctx| wm_base.ping(ctx, base));
                if let Some(Err(PingError::PingAlreadyPending(serial))) = result {
                    warn!(client = %id, wm_base = %base, %serial, "Client is unresponsive");
                }
            }
        }
        self.flush_clients();
    }

    /// Tear every client and the socket down
    ///
    /// Toplevels are closed and every global is withdrawn from every registry before the
    /// objects are destroyed.
    pub fn shutdown(&mut self) {
        let names = self.server.globals.names();
        for id in self.client_ids() {
            let Some(mut entry) = self.clients.remove(&id) else {
                continue;
            };
            let mut ctx = entry.client.context(&mut self.server);
            for toplevel in ctx.objects.ids_of::<Toplevel>() {
                ctx.with_object::<Toplevel, _>(toplevel, |window, ctx| window.close(ctx, toplevel));
            }
            for registry in ctx.objects.ids_of::<Registry>() {
                for name in &names {
                    ctx.send(Registry::global_remove_event(registry, *name));
                }
            }
            if let Err(err) = entry.client.flush() {
                debug!(client = %id, "Could not flush client during shutdown: {}", err);
            }
            entry.client.teardown(&mut self.server);
            self.handle.remove(entry.token);
        }
        for name in names {
            self.server.globals.remove(name);
        }
        if let Some(token) = self.socket.take() {
            self.handle.remove(token);
            info!("Display socket removed");
        }
    }
}

/// A display server event loop, not yet running
pub struct DisplayEventLoop {
    event_loop: EventLoop<'static, DisplayState>,
    state: DisplayState,
    socket_path: PathBuf,
}

impl std::fmt::Debug for DisplayEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayEventLoop")
            .field("state", &self.state)
            .field("socket_path", &self.socket_path)
            .finish_non_exhaustive()
    }
}

impl DisplayEventLoop {
    /// Set up a display
    ///
    /// The default globals are advertised (`wl_compositor` v4, `wl_shm` v1, `wl_shell` v1,
    /// `xdg_wm_base` v1), then `setup` may advertise more. Only then is the socket bound,
    /// so a failing setup leaves nothing behind.
    pub fn new<F>(
        config: ServerConfig,
        compositor: Box<dyn CompositorHandler>,
        terminate: Channel<Terminate>,
        setup: F,
    ) -> Result<DisplayEventLoop, ServerError>
    where
        F: FnOnce(&mut GlobalRegistry) -> Result<(), RegistryError>,
    {
        let runtime_dir = config.runtime_dir().ok_or(ServerError::NoRuntimeDir)?;
        let ping_interval = config.ping_interval;
        let socket_name = config.socket_name.clone();

        let mut server = ServerState::new(config, compositor);
        server.globals.advertise(&WL_COMPOSITOR, 4, CompositorState)?;
        server.globals.advertise(&WL_SHM, 1, ShmState)?;
        server.globals.advertise(&WL_SHELL, 1, ShellState)?;
        server.globals.advertise(&XDG_WM_BASE, 1, XdgShellState)?;
        setup(&mut server.globals)?;

        let event_loop = EventLoop::<DisplayState>::try_new()?;
        let handle = event_loop.handle();

        let source = match socket_name {
            Some(name) => ListeningSocketSource::with_name(&runtime_dir, &name)?,
            None => ListeningSocketSource::new_auto(&runtime_dir)?,
        };
        let socket_path = source.socket_path().to_path_buf();
        let socket = handle
            .insert_source(source, |stream, _, state: &mut DisplayState| state.accept(stream))
            .map_err(|err| err.error)?;

        handle
            .insert_source(terminate, |event, _, state: &mut DisplayState| {
                match event {
                    channel::Event::Msg(Terminate) => debug!("Termination requested"),
                    channel::Event::Closed => debug!("Termination channel closed"),
                }
                state.terminate();
            })
            .map_err(|err| err.error)?;

        if let Some(interval) = ping_interval {
            handle
                .insert_source(Timer::from_duration(interval), move |_, _, state: &mut DisplayState| {
                    state.ping_clients();
                    TimeoutAction::ToDuration(interval)
                })
                .map_err(|err| err.error)?;
        }

        let state = DisplayState {
            server,
            clients: HashMap::new(),
            next_client: 1,
            handle,
            signal: event_loop.get_signal(),
            socket: Some(socket),
            terminated: false,
        };
        info!(socket = ?socket_path, "Display ready");

        Ok(DisplayEventLoop {
            event_loop,
            state,
            socket_path,
        })
    }

    /// Path of the display socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The loop data
    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    /// Dispatch pending events once, waiting at most `timeout`
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        self.event_loop.dispatch(timeout, &mut self.state)?;
        Ok(())
    }

    /// Run until termination is requested, then tear everything down
    pub fn run(mut self) -> Result<(), ServerError> {
        info!("Display loop running");
        // `run` clears a stop requested before it started
        let result = if self.state.terminated {
            Ok(())
        } else {
            self.event_loop.run(None, &mut self.state, |_| {})
        };
        if let Err(err) = &result {
            warn!("Display loop failed: {}", err);
        }
        self.state.shutdown();
        info!("Display loop stopped");
        result.map_err(ServerError::from)
    }
}
