//! Running a display on its own thread

use std::{
    io,
    path::{Path, PathBuf},
    sync::mpsc,
    thread::{self, JoinHandle},
};

use calloop::channel::{self, Sender};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    wayland::{
        compositor::{CompositorHandler, NoopCompositor},
        event_loop::{DisplayEventLoop, Terminate},
        registry::{GlobalRegistry, RegistryError},
        socket::SocketError,
    },
};

/// Name of the thread running the display loop
pub const DISPLAY_THREAD_NAME: &str = "reflector-display";

/// Errors preventing a display from starting or ending cleanly
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Neither the configuration nor the environment name a runtime directory
    #[error("XDG_RUNTIME_DIR is not set and no runtime directory was configured")]
    NoRuntimeDir,
    /// The display socket could not be created
    #[error("failed to create the display socket: {0}")]
    Socket(#[from] SocketError),
    /// The event loop failed
    #[error("event loop error: {0}")]
    EventLoop(#[from] calloop::Error),
    /// A global could not be advertised
    #[error("invalid global: {0}")]
    Registry(#[from] RegistryError),
    /// The display thread could not be spawned
    #[error("failed to spawn the display thread: {0}")]
    Thread(#[source] io::Error),
    /// The display thread panicked
    #[error("the display thread panicked")]
    Panicked,
}

/// A running display server
///
/// The display loop runs on a dedicated thread, and every protocol object lives there. The
/// owning thread only ever sees the socket path and the termination channel.
///
/// ```no_run
/// use reflector::{Reflector, ServerConfig};
///
/// let mut server = Reflector::start(ServerConfig::from_env()).expect("Failed to start the display");
/// println!("WAYLAND_DISPLAY={}", server.socket_name());
/// // ... run clients ...
/// server.terminate().expect("Display loop failed");
/// ```
#[derive(Debug)]
pub struct Reflector {
    socket_path: PathBuf,
    terminate: Option<Sender<Terminate>>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

/// Requests termination of a [`Reflector`] from any thread
#[derive(Debug, Clone)]
pub struct TerminateHandle {
    sender: Sender<Terminate>,
}

impl TerminateHandle {
    /// Ask the display loop to stop
    ///
    /// Does nothing if it already stopped.
    pub fn terminate(&self) {
        if self.sender.send(Terminate).is_err() {
            debug!("Display loop already stopped");
        }
    }
}

impl Reflector {
    /// Start a display that drops every commit
    pub fn start(config: ServerConfig) -> Result<Reflector, ServerError> {
        Self::with_handler(config, NoopCompositor)
    }

    /// Start a display feeding visible commits to `handler`
    pub fn with_handler<H>(config: ServerConfig, handler: H) -> Result<Reflector, ServerError>
    where
        H: CompositorHandler + 'static,
    {
        Self::with_globals(config, handler, |_| Ok(()))
    }

    /// Start a display, letting `setup` advertise additional globals
    ///
    /// `setup` runs on the display thread before the socket is created. Returns once the
    /// socket accepts connections, or with the error that prevented it.
    pub fn with_globals<H, F>(config: ServerConfig, handler: H, setup: F) -> Result<Reflector, ServerError>
    where
        H: CompositorHandler + 'static,
        F: FnOnce(&mut GlobalRegistry) -> Result<(), RegistryError> + Send + 'static,
    {
        let (sender, channel) = channel::channel::<Terminate>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<PathBuf, ServerError>>();

        let thread = thread::Builder::new()
            .name(DISPLAY_THREAD_NAME.into())
            .spawn(move || {
                let display = match DisplayEventLoop::new(config, Box::new(handler), channel, setup) {
                    Ok(display) => display,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return Ok(());
                    }
                };
                if ready_tx.send(Ok(display.socket_path().to_path_buf())).is_err() {
                    // nobody is waiting for this display anymore
                    return Ok(());
                }
                display.run()
            })
            .map_err(ServerError::Thread)?;

        match ready_rx.recv() {
            Ok(Ok(socket_path)) => {
                info!(socket = ?socket_path, "Display started");
                Ok(Reflector {
                    socket_path,
                    terminate: Some(sender),
                    thread: Some(thread),
                })
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => match thread.join() {
                Ok(Err(err)) => Err(err),
                _ => Err(ServerError::Panicked),
            },
        }
    }

    /// Path of the display socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Name of the display socket, as clients expect it in `WAYLAND_DISPLAY`
    pub fn socket_name(&self) -> &str {
        self.socket_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Whether the display thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |thread| !thread.is_finished())
    }

    /// A handle to stop the display from another thread
    ///
    /// Returns `None` once termination was requested through this value.
    pub fn terminate_handle(&self) -> Option<TerminateHandle> {
        self.terminate.as_ref().map(|sender| TerminateHandle {
            sender: sender.clone(),
        })
    }

    /// Stop the display and wait for its thread
    ///
    /// Calling it again is a no-op.
    pub fn terminate(&mut self) -> Result<(), ServerError> {
        if let Some(sender) = self.terminate.take() {
            if sender.send(Terminate).is_err() {
                debug!("Display loop already stopped");
            }
        }
        self.join()
    }

    /// Wait for the display thread to end, without requesting it
    pub fn wait_for_exit(&mut self) -> Result<(), ServerError> {
        self.join()
    }

    fn join(&mut self) -> Result<(), ServerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let result = thread.join().map_err(|_| ServerError::Panicked)?;
        info!(socket = ?self.socket_path, "Display stopped");
        result
    }
}

impl Drop for Reflector {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!("Display did not stop cleanly: {}", err);
        }
    }
}
