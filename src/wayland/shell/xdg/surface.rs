use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use tracing::{debug, warn};

use super::{positioner::XdgPositioner, toplevel::Toplevel, WmBaseError};
use crate::{
    utils::{Rectangle, Serial},
    wayland::{
        compositor::SurfaceRef,
        interfaces::{Interface, XDG_POPUP, XDG_SURFACE},
        resource::{DispatchContext, ProtocolError, Request, Resource},
        shell::{ConfigurePhase, ConfigureTracker},
        wire::{Message, ObjectId},
    },
};

const EVENT_CONFIGURE: u16 = 0;
const POPUP_EVENT_POPUP_DONE: u16 = 1;

/// `xdg_surface` error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum XdgSurfaceError {
    NotConstructed = 1,
    AlreadyConstructed = 2,
    InvalidSerial = 4,
    InvalidSize = 5,
    DefunctRoleObject = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XdgRole {
    Toplevel(ObjectId),
    Popup(ObjectId),
}

/// State of an `xdg_surface`, shared with its role object
#[derive(Debug)]
pub(crate) struct XdgSurfaceState {
    pub(crate) surface: SurfaceRef,
    pub(crate) object: ObjectId,
    pub(crate) tracker: ConfigureTracker,
    pub(crate) role: Option<XdgRole>,
    pub(crate) constructed: bool,
}

pub(crate) type XdgSurfaceRef = Rc<RefCell<XdgSurfaceState>>;

impl XdgSurfaceState {
    pub(crate) fn new(surface: SurfaceRef, object: ObjectId) -> Self {
        XdgSurfaceState {
            surface,
            object,
            tracker: ConfigureTracker::new(),
            role: None,
            constructed: false,
        }
    }

    /// Record and send an `xdg_surface.configure`
    ///
    /// The role specific configure event must have been queued right before.
    pub(crate) fn send_configure(&mut self, ctx: &mut DispatchContext<'_>, serial: Serial) -> bool {
        if self.tracker.send(serial).is_err() {
            return false;
        }
        ctx.send(Message::new(self.object, EVENT_CONFIGURE).uint(serial.into()));
        true
    }
}

/// An `xdg_surface` object
#[derive(Debug)]
pub struct XdgSurface {
    state: XdgSurfaceRef,
    wm_base: ObjectId,
    surfaces: Rc<Cell<usize>>,
}

impl XdgSurface {
    pub(crate) fn new(state: XdgSurfaceState, wm_base: ObjectId, surfaces: Rc<Cell<usize>>) -> Self {
        surfaces.set(surfaces.get() + 1);
        XdgSurface {
            state: Rc::new(RefCell::new(state)),
            wm_base,
            surfaces,
        }
    }

    /// Phase of the configure handshake
    pub fn phase(&self) -> ConfigurePhase {
        self.state.borrow().tracker.phase()
    }

    /// Serial of the newest configure sent to the client
    pub fn last_configure(&self) -> Option<Serial> {
        self.state.borrow().tracker.last_sent()
    }

    fn error(this: ObjectId, code: XdgSurfaceError, message: impl Into<String>) -> ProtocolError {
        ProtocolError::new(this, code as u32, message)
    }
}

impl Resource for XdgSurface {
    fn interface(&self) -> &'static Interface {
        &XDG_SURFACE
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        match request.opcode {
            // destroy
            0 => {
                if let Some(role) = self.state.borrow().role {
                    return Err(Self::error(
                        this,
                        XdgSurfaceError::DefunctRoleObject,
                        format!("xdg_surface destroyed before its role object {:?}", role),
                    ));
                }
            }
            // get_toplevel
            1 => {
                let id = request.new_id()?;
                if self.state.borrow().constructed {
                    return Err(Self::error(
                        this,
                        XdgSurfaceError::AlreadyConstructed,
                        "xdg_surface already has a role object",
                    ));
                }
                ctx.check_new_id(id)?;
                {
                    let mut state = self.state.borrow_mut();
                    state.constructed = true;
                    state.role = Some(XdgRole::Toplevel(id));
                }
                let size = ctx.server.config.window_size;
                let mut toplevel = Toplevel::new(self.state.clone(), size);
                toplevel.send_configure(ctx, id);
                debug!(client = %ctx.client, toplevel = %id, xdg_surface = %this, "New toplevel");
                let version = ctx.version_of(this);
                ctx.insert(id, version, toplevel)?;
            }
            // get_popup
            2 => {
                let id = request.new_id()?;
                let parent = request.optional_object()?;
                let positioner = request.object()?;
                if self.state.borrow().constructed {
                    return Err(Self::error(
                        this,
                        XdgSurfaceError::AlreadyConstructed,
                        "xdg_surface already has a role object",
                    ));
                }
                let complete = ctx
                    .get::<XdgPositioner>(positioner)
                    .ok_or_else(|| ProtocolError::invalid_object(positioner))?
                    .is_complete();
                if !complete {
                    return Err(ProtocolError::new(
                        self.wm_base,
                        WmBaseError::InvalidPositioner as u32,
                        format!("xdg_positioner@{} has no size or anchor rectangle", positioner),
                    ));
                }
                if let Some(parent) = parent {
                    if parent == this || ctx.get::<XdgSurface>(parent).is_none() {
                        return Err(ProtocolError::new(
                            self.wm_base,
                            WmBaseError::InvalidPopupParent as u32,
                            format!("object {} is not a valid popup parent", parent),
                        ));
                    }
                }
                ctx.check_new_id(id)?;
                {
                    let mut state = self.state.borrow_mut();
                    state.constructed = true;
                    state.role = Some(XdgRole::Popup(id));
                }
                warn!(client = %ctx.client, popup = %id, "Popups are not supported, dismissing");
                let version = ctx.version_of(this);
                ctx.insert(
                    id,
                    version,
                    XdgPopup {
                        xdg: self.state.clone(),
                    },
                )?;
                ctx.send(Message::new(id, POPUP_EVENT_POPUP_DONE));
            }
            // set_window_geometry
            3 => {
                let geometry = Rectangle::new(request.int()?, request.int()?, request.int()?, request.int()?);
                if geometry.width <= 0 || geometry.height <= 0 {
                    return Err(Self::error(
                        this,
                        XdgSurfaceError::InvalidSize,
                        format!("invalid window geometry {}x{}", geometry.width, geometry.height),
                    ));
                }
                self.state.borrow().surface.borrow_mut().set_window_geometry(geometry);
            }
            // ack_configure
            4 => {
                let serial = Serial::from(request.uint()?);
                let mut state = self.state.borrow_mut();
                if !state.constructed {
                    return Err(Self::error(
                        this,
                        XdgSurfaceError::NotConstructed,
                        "xdg_surface has no role object",
                    ));
                }
                match state.tracker.ack(serial) {
                    Ok(true) => {
                        state.surface.borrow_mut().set_mapped(true);
                        debug!(client = %ctx.client, xdg_surface = %this, %serial, "Surface configured");
                    }
                    Ok(false) => {}
                    Err(err) => {
                        return Err(Self::error(this, XdgSurfaceError::InvalidSerial, err.to_string()));
                    }
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn destroyed(&mut self, _ctx: &mut DispatchContext<'_>, _this: ObjectId) {
        self.surfaces.set(self.surfaces.get().saturating_sub(1));
        let mut state = self.state.borrow_mut();
        state.tracker.close();
        state.surface.borrow_mut().release_role();
    }
}

/// An inert `xdg_popup`
///
/// Popups are dismissed as soon as they are created.
#[derive(Debug)]
pub struct XdgPopup {
    xdg: XdgSurfaceRef,
}

impl Resource for XdgPopup {
    fn interface(&self) -> &'static Interface {
        &XDG_POPUP
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, request: Request) -> Result<(), ProtocolError> {
        match request.opcode {
            // destroy
            0 => {}
            // grab
            1 => warn!(client = %ctx.client, popup = %request.this, "Ignoring grab of a dismissed popup"),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn destroyed(&mut self, _ctx: &mut DispatchContext<'_>, _this: ObjectId) {
        self.xdg.borrow_mut().role = None;
    }
}
