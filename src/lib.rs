#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Reflector: a threaded Wayland display scaffold
//!
//! This crate implements the server side of the Wayland protocol, down to the wire format:
//! globals and per-client resources, the `wl_shm` shared memory buffers and the surface
//! configuration handshake of `xdg_shell` (and of the legacy `wl_shell`). Drawing is left to
//! the embedder, through the [`CompositorHandler`](wayland::compositor::CompositorHandler)
//! trait.
//!
//! ## Structure of the crate
//!
//! - [`Reflector`] runs a display on a dedicated thread and stops it deterministically.
//! - [`wayland`] contains the protocol machinery: the [`calloop`] based
//!   [event loop](wayland::event_loop), the [wire format](wayland::wire), and one module per
//!   protocol family.
//! - [`utils`] contains the serials and geometry types shared by the protocol modules.
//!
//! ## Threading
//!
//! Every protocol object lives on the display thread. They are plain `Rc`/`RefCell` values
//! and are never reached from another thread: the owning thread only waits for the socket
//! to be ready and sends the termination request, through channels.
//!
//! ```no_run
//! use reflector::{Reflector, ServerConfig};
//!
//! let mut server = Reflector::start(ServerConfig::from_env().with_socket_name("wayland-reflector"))
//!     .expect("Failed to start the display");
//! // the socket exists at this point
//! assert!(server.socket_path().exists());
//! server.terminate().expect("Display loop failed");
//! ```
//!
//! ### Logging
//!
//! Reflector makes extensive use of [`tracing`] for its internal logging. It does not install
//! any subscriber; lifecycle events are logged at the `info` level, connections and new objects
//! at `debug`, every request and event at `trace`, and refused requests at `warn`.

pub mod config;
mod reflector;
pub mod utils;
pub mod wayland;

pub use crate::config::ServerConfig;
pub use crate::reflector::{Reflector, ServerError, TerminateHandle, DISPLAY_THREAD_NAME};
