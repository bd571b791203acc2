use bitflags::bitflags;
use tracing::{debug, warn};

use super::surface::{XdgRole, XdgSurfaceRef};
use crate::{
    utils::Size,
    wayland::{
        interfaces::{Interface, XDG_TOPLEVEL},
        resource::{DispatchContext, ProtocolError, Request, Resource},
        shell::ConfigurePhase,
        wire::{Message, ObjectId},
    },
};

const EVENT_CONFIGURE: u16 = 0;
const EVENT_CLOSE: u16 = 1;

/// `xdg_toplevel` error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum ToplevelError {
    InvalidResizeEdge = 0,
    InvalidParent = 1,
    InvalidSize = 2,
}

bitflags! {
    /// States of a toplevel, as sent in its configure events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ToplevelStates: u32 {
        /// The surface is maximized
        const MAXIMIZED = 1 << 0;
        /// The surface is fullscreen
        const FULLSCREEN = 1 << 1;
        /// The surface is being resized
        const RESIZING = 1 << 2;
        /// The surface is now activated
        const ACTIVATED = 1 << 3;
    }
}

impl ToplevelStates {
    const WIRE: [(ToplevelStates, u32); 4] = [
        (ToplevelStates::MAXIMIZED, 1),
        (ToplevelStates::FULLSCREEN, 2),
        (ToplevelStates::RESIZING, 3),
        (ToplevelStates::ACTIVATED, 4),
    ];

    /// Encode as the `states` array of `xdg_toplevel.configure`
    pub fn to_wire(self) -> Vec<u8> {
        Self::WIRE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .flat_map(|(_, value)| value.to_ne_bytes())
            .collect()
    }

    /// Decode a `states` array
    ///
    /// Values unknown to this implementation are ignored.
    pub fn from_wire(array: &[u8]) -> ToplevelStates {
        array
            .chunks_exact(4)
            .filter_map(|chunk| {
                let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                Self::WIRE
                    .iter()
                    .find(|(_, wire)| *wire == value)
                    .map(|(flag, _)| *flag)
            })
            .fold(ToplevelStates::empty(), |states, flag| states | flag)
    }
}

/// An `xdg_toplevel` object
#[derive(Debug)]
pub struct Toplevel {
    xdg: XdgSurfaceRef,
    states: ToplevelStates,
    size: Size,
    title: Option<String>,
    app_id: Option<String>,
    parent: Option<ObjectId>,
    min_size: Size,
    max_size: Size,
}

impl Toplevel {
    pub(crate) fn new(xdg: XdgSurfaceRef, size: Size) -> Self {
        Toplevel {
            xdg,
            states: ToplevelStates::ACTIVATED,
            size,
            title: None,
            app_id: None,
            parent: None,
            min_size: Size::default(),
            max_size: Size::default(),
        }
    }

    /// The window title
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// The application id
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// The states sent with the newest configure
    pub fn states(&self) -> ToplevelStates {
        self.states
    }

    /// The size suggested by the newest configure, `0x0` leaving it to the client
    pub fn size(&self) -> Size {
        self.size
    }

    /// The parent toplevel
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// The minimum size, `0` meaning unconstrained
    pub fn min_size(&self) -> Size {
        self.min_size
    }

    /// The maximum size, `0` meaning unconstrained
    pub fn max_size(&self) -> Size {
        self.max_size
    }

    /// Phase of the configure handshake
    pub fn phase(&self) -> ConfigurePhase {
        self.xdg.borrow().tracker.phase()
    }

    /// Send the current state in a new configure sequence
    pub(crate) fn send_configure(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId) {
        if self.phase() == ConfigurePhase::Closed {
            return;
        }
        let serial = ctx.next_serial();
        ctx.send(
            Message::new(this, EVENT_CONFIGURE)
                .int(self.size.w)
                .int(self.size.h)
                .array(self.states.to_wire()),
        );
        self.xdg.borrow_mut().send_configure(ctx, serial);
    }

    /// Ask the client to close the window
    ///
    /// The toplevel enters its terminal phase; its surface is no longer displayed.
    pub(crate) fn close(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId) {
        let mut xdg = self.xdg.borrow_mut();
        if xdg.tracker.phase() == ConfigurePhase::Closed {
            return;
        }
        ctx.send(Message::new(this, EVENT_CLOSE));
        xdg.tracker.close();
        xdg.surface.borrow_mut().set_mapped(false);
    }

    fn set_state(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId, state: ToplevelStates, on: bool) {
        self.states.set(state, on);
        self.size = if self.states.intersects(ToplevelStates::MAXIMIZED | ToplevelStates::FULLSCREEN) {
            ctx.server.config.output_size
        } else {
            Size::default()
        };
        self.send_configure(ctx, this);
    }

    fn refuse(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId, what: &str) {
        warn!(client = %ctx.client, toplevel = %this, "{} is not supported", what);
        self.send_configure(ctx, this);
    }

    fn size_arg(request: &mut Request) -> Result<Size, ProtocolError> {
        let size = Size::new(request.int()?, request.int()?);
        if size.w < 0 || size.h < 0 {
            return Err(ProtocolError::new(
                request.this,
                ToplevelError::InvalidSize as u32,
                format!("invalid size {}x{}", size.w, size.h),
            ));
        }
        Ok(size)
    }
}

impl Resource for Toplevel {
    fn interface(&self) -> &'static Interface {
        &XDG_TOPLEVEL
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        match request.opcode {
            // destroy
            0 => {}
            // set_parent
            1 => {
                let parent = request.optional_object()?;
                if let Some(parent) = parent {
                    if parent == this || ctx.get::<Toplevel>(parent).is_none() {
                        return Err(ProtocolError::new(
                            this,
                            ToplevelError::InvalidParent as u32,
                            format!("invalid parent {}", parent),
                        ));
                    }
                }
                self.parent = parent;
            }
            // set_title
            2 => self.title = Some(request.string()?),
            // set_app_id
            3 => self.app_id = Some(request.string()?),
            // show_window_menu
            4 => self.refuse(ctx, this, "Window menu"),
            // move
            5 => self.refuse(ctx, this, "Interactive move"),
            // resize
            6 => {
                let _seat = request.object()?;
                let _serial = request.uint()?;
                let edges = request.uint()?;
                if !matches!(edges, 0 | 1 | 2 | 4 | 5 | 6 | 8 | 9 | 10) {
                    return Err(ProtocolError::new(
                        this,
                        ToplevelError::InvalidResizeEdge as u32,
                        format!("invalid resize edge {}", edges),
                    ));
                }
                self.refuse(ctx, this, "Interactive resize");
            }
            // set_max_size
            7 => self.max_size = Self::size_arg(&mut request)?,
            // set_min_size
            8 => self.min_size = Self::size_arg(&mut request)?,
            // set_maximized, unset_maximized
            9 | 10 => self.set_state(ctx, this, ToplevelStates::MAXIMIZED, request.opcode == 9),
            // set_fullscreen, unset_fullscreen
            11 | 12 => self.set_state(ctx, this, ToplevelStates::FULLSCREEN, request.opcode == 11),
            // set_minimized
            13 => self.refuse(ctx, this, "Minimizing"),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn destroyed(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId) {
        let mut xdg = self.xdg.borrow_mut();
        if xdg.role == Some(XdgRole::Toplevel(this)) {
            xdg.role = None;
        }
        xdg.tracker.close();
        xdg.surface.borrow_mut().set_mapped(false);
        debug!(client = %ctx.client, toplevel = %this, "Toplevel destroyed");
    }
}
