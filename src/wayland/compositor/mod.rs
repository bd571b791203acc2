//! Utilities for handling surfaces and regions
//!
//! This module provides the handling of surfaces and region Wayland objects, by implementing
//! the [`wl_compositor`](crate::wayland::interfaces::WL_COMPOSITOR) global.
//!
//! Surface state is double-buffered: requests such as `attach`, `damage` or
//! `set_buffer_scale` modify a pending state, and `commit` moves it atomically into the
//! committed [`SurfaceAttributes`]. A commit is only *visible* once the surface has a role
//! whose configure handshake completed (see [`shell`](crate::wayland::shell)); only then is
//! the compositing stage handed the committed state through its [`CompositorHandler`].
//! Earlier commits update the committed state silently, which defers the first paint until
//! the client has acknowledged its geometry.
//!
//! The compositing stage itself is out of the scope of this crate:
//!
//! ```
//! use reflector::wayland::compositor::{CompositorHandler, SurfaceAttributes, SurfaceId};
//!
//! struct Recorder {
//!     frames: usize,
//! }
//!
//! impl CompositorHandler for Recorder {
//!     fn commit(&mut self, _surface: SurfaceId, state: &SurfaceAttributes) {
//!         if state.buffer.is_some() {
//!             self.frames += 1;
//!         }
//!     }
//! }
//! ```

use std::fmt;

use tracing::trace;

mod region;
mod surface;

pub use self::region::{RectangleKind, Region, RegionAttributes};
pub use self::surface::{BufferAssignment, Damage, Surface, SurfaceAttributes, Transform};
pub(crate) use self::surface::{SurfaceData, SurfaceRef};

use super::{
    client::ClientId,
    interfaces::{Interface, WL_COMPOSITOR},
    registry::{BindError, GlobalHandler},
    resource::{DispatchContext, ProtocolError, Request, Resource},
    wire::ObjectId,
};

/// Identifies a surface across the whole server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    /// The owning client
    pub client: ClientId,
    /// The `wl_surface` object within that client
    pub object: ObjectId,
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/wl_surface@{}", self.client, self.object)
    }
}

/// The compositing stage, fed with visible commits
///
/// It runs on the display thread, which it is moved to when the server starts.
pub trait CompositorHandler: Send {
    /// A visible commit happened on `surface`
    fn commit(&mut self, surface: SurfaceId, state: &SurfaceAttributes);

    /// `surface` was destroyed
    fn destroyed(&mut self, _surface: SurfaceId) {}
}

/// A compositing stage that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompositor;

impl CompositorHandler for NoopCompositor {
    fn commit(&mut self, surface: SurfaceId, state: &SurfaceAttributes) {
        trace!(%surface, buffer = state.buffer.is_some(), damage = state.damage.len(), "Commit");
    }

    fn destroyed(&mut self, surface: SurfaceId) {
        trace!(%surface, "Surface destroyed");
    }
}

/// Handler of the `wl_compositor` global
#[derive(Debug, Default, Clone, Copy)]
pub struct CompositorState;

impl GlobalHandler for CompositorState {
    fn bind(
        &self,
        _ctx: &mut DispatchContext<'_>,
        _id: ObjectId,
        _version: u32,
    ) -> Result<Box<dyn Resource>, BindError> {
        Ok(Box::new(Compositor))
    }
}

/// A bound `wl_compositor`
#[derive(Debug)]
pub struct Compositor;

impl Resource for Compositor {
    fn interface(&self) -> &'static Interface {
        &WL_COMPOSITOR
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let version = ctx.version_of(request.this);
        match request.opcode {
            // create_surface
            0 => {
                let id = request.new_id()?;
                ctx.insert(id, version, Surface::new(SurfaceId { client: ctx.client, object: id }))
            }
            // create_region
            1 => {
                let id = request.new_id()?;
                ctx.insert(id, version, Region::default())
            }
            _ => unreachable!(),
        }
    }
}
