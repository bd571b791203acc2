//! Protocol-related utilities
//!
//! This module contains the server side of the Wayland protocol: the wire format, the
//! per-client object tables, the globals and the handlers of every interface the display
//! implements.
//!
//! Most handlers in this module work in the same way:
//!
//! - A `*State` type implements [`GlobalHandler`](registry::GlobalHandler) and is advertised
//!   once in the [`GlobalRegistry`](registry::GlobalRegistry).
//! - Binding it creates a [`Resource`](resource::Resource) in the client's table, which in
//!   turn creates the child objects of the interface.
//! - Objects reach each other through the client's [`ResourceTable`](resource::ResourceTable),
//!   and state shared between objects (a surface and its role) is reference counted.

pub mod client;
pub mod compositor;
pub mod display;
pub mod event_loop;
pub mod interfaces;
pub mod registry;
pub mod resource;
pub mod shell;
pub mod shm;
pub mod socket;
pub mod wire;
