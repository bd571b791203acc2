//! Utilities for handling shell surfaces with the `xdg_shell` protocol
//!
//! This module provides automatic handling of shell surfaces objects, by being registered
//! as a global handler for `xdg_wm_base`.
//!
//! ## The handshake
//!
//! A client turns a `wl_surface` into a window with the object chain
//! `xdg_wm_base.get_xdg_surface` → `xdg_surface.get_toplevel`. As soon as the toplevel
//! exists the server proposes a configuration: an `xdg_toplevel.configure` with the suggested
//! size and states, followed by an `xdg_surface.configure` carrying a fresh serial. The
//! client must answer `ack_configure` with exactly that serial; any other serial is a fatal
//! `invalid_serial` error. Commits on the surface stay invisible until the first valid
//! acknowledgement.
//!
//! Later configurations (maximizing, going fullscreen, or the refusal of an interactive
//! move) again require the newest serial to be acknowledged, but the window stays visible
//! meanwhile.
//!
//! ## Unsupported parts
//!
//! Positioners record what they are told and are only checked for completeness. Popups
//! are created inert and dismissed immediately with `popup_done`. Interactive move, resize, minimizing and the window menu are answered
//! with a configure repeating the current state.

use std::{cell::Cell, rc::Rc};

use tracing::{debug, trace};

mod positioner;
mod surface;
mod toplevel;

pub use self::positioner::XdgPositioner;
pub use self::surface::{XdgPopup, XdgSurface};
pub use self::toplevel::{Toplevel, ToplevelStates};

use self::surface::XdgSurfaceState;
use super::PingError;
use crate::{
    utils::Serial,
    wayland::{
        compositor::Surface,
        interfaces::{Interface, XDG_WM_BASE},
        registry::{BindError, GlobalHandler},
        resource::{DispatchContext, ProtocolError, Request, Resource},
        wire::{Message, ObjectId},
    },
};

/// The role given to surfaces by `xdg_wm_base.get_xdg_surface`
pub const XDG_SURFACE_ROLE: &str = "xdg_surface";

const EVENT_PING: u16 = 0;

/// `xdg_wm_base` error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WmBaseError {
    /// Given wl_surface has another role
    Role = 0,
    /// xdg_wm_base was destroyed before children
    DefunctSurfaces = 1,
    /// The client tried to map or destroy a non-topmost popup
    NotTheTopmostPopup = 2,
    /// The client specified an invalid popup parent surface
    InvalidPopupParent = 3,
    /// The client provided an invalid surface state
    InvalidSurfaceState = 4,
    /// The client provided an invalid positioner
    InvalidPositioner = 5,
    /// The client didn’t respond to a ping event in time
    Unresponsive = 6,
}

/// Handler of the `xdg_wm_base` global
#[derive(Debug, Default, Clone, Copy)]
pub struct XdgShellState;

impl GlobalHandler for XdgShellState {
    fn bind(
        &self,
        _ctx: &mut DispatchContext<'_>,
        _id: ObjectId,
        _version: u32,
    ) -> Result<Box<dyn Resource>, BindError> {
        Ok(Box::new(WmBase::default()))
    }
}

/// A bound `xdg_wm_base`
#[derive(Debug, Default)]
pub struct WmBase {
    pending_ping: Option<Serial>,
    surfaces: Rc<Cell<usize>>,
}

impl WmBase {
    /// Send a keep-alive ping
    ///
    /// Fails if the previous ping is still unanswered.
    pub fn ping(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId) -> Result<Serial, PingError> {
        if let Some(pending) = self.pending_ping {
            return Err(PingError::PingAlreadyPending(pending));
        }
        let serial = ctx.next_serial();
        self.pending_ping = Some(serial);
        ctx.send(Message::new(this, EVENT_PING).uint(serial.into()));
        Ok(serial)
    }

    /// The serial of the unanswered ping, if any
    pub fn pending_ping(&self) -> Option<Serial> {
        self.pending_ping
    }

    /// Number of live `xdg_surface` objects created from this base
    pub fn surface_count(&self) -> usize {
        self.surfaces.get()
    }
}

impl Resource for WmBase {
    fn interface(&self) -> &'static Interface {
        &XDG_WM_BASE
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        match request.opcode {
            // destroy
            0 => {
                if self.surfaces.get() > 0 {
                    return Err(ProtocolError::new(
                        this,
                        WmBaseError::DefunctSurfaces as u32,
                        format!("{} xdg_surface objects still alive", self.surfaces.get()),
                    ));
                }
            }
            // create_positioner
            1 => {
                let id = request.new_id()?;
                ctx.check_new_id(id)?;
                trace!(client = %ctx.client, positioner = %id, "New positioner");
                let version = ctx.version_of(this);
                ctx.insert(id, version, XdgPositioner::default())?;
            }
            // get_xdg_surface
            2 => {
                let id = request.new_id()?;
                let surface_id = request.object()?;
                ctx.check_new_id(id)?;
                let surface = ctx
                    .get::<Surface>(surface_id)
                    .ok_or_else(|| ProtocolError::invalid_object(surface_id))?
                    .data();
                surface
                    .borrow_mut()
                    .assign_role(XDG_SURFACE_ROLE)
                    .map_err(|role| {
                        ProtocolError::new(
                            this,
                            WmBaseError::Role as u32,
                            format!("wl_surface@{} already has the {} role", surface_id, role),
                        )
                    })?;
                debug!(client = %ctx.client, xdg_surface = %id, surface = %surface_id, "New xdg surface");
                let version = ctx.version_of(this);
                ctx.insert(
                    id,
                    version,
                    XdgSurface::new(XdgSurfaceState::new(surface, id), this, self.surfaces.clone()),
                )?;
            }
            // pong
            3 => {
                let serial = Serial::from(request.uint()?);
                if self.pending_ping == Some(serial) {
                    self.pending_ping = None;
                } else {
                    debug!(client = %ctx.client, wm_base = %this, %serial, "Ignoring unexpected pong");
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}
