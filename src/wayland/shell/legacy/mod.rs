//! Utilities for handling shell surfaces with the `wl_shell` protocol
//!
//! This module provides automatic handling of shell surfaces objects, by being registered
//! as a global handler for `wl_shell`. This protocol is deprecated in favor of `xdg_shell`,
//! thus this module is provided as a compatibility layer with older clients, in a best-effort
//! manner.
//!
//! `wl_shell` has no configure acknowledgement. The handshake is emulated with the ping
//! mechanism: a new shell surface receives a `configure` with the suggested window size
//! followed by a `ping`, and the matching `pong` plays the part of `ack_configure`. Until then
//! commits on the surface are buffered.
//!
//! Interactive move and resize are not supported: they are answered with a configure
//! repeating the current size. Popups are refused with an immediate `popup_done`.
//!
//! `wl_shell_surface` has no destructor, it dies with its `wl_surface`. Once the surface is
//! destroyed the shell surface is defunct: its handshake is closed and its requests are
//! ignored.

use tracing::{debug, trace, warn};

use super::{ConfigurePhase, ConfigureTracker};
use crate::{
    utils::{Serial, Size},
    wayland::{
        compositor::{Surface, SurfaceRef},
        interfaces::{Interface, WL_SHELL, WL_SHELL_SURFACE},
        registry::{BindError, GlobalHandler},
        resource::{DispatchContext, ProtocolError, Request, Resource},
        wire::{Message, ObjectId},
    },
};

/// The role given to surfaces by `wl_shell.get_shell_surface`
pub const WL_SHELL_SURFACE_ROLE: &str = "wl_shell_surface";

const SHELL_ERROR_ROLE: u32 = 0;

const EVENT_PING: u16 = 0;
const EVENT_CONFIGURE: u16 = 1;
const EVENT_POPUP_DONE: u16 = 2;

/// Handler of the `wl_shell` global
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellState;

impl GlobalHandler for ShellState {
    fn bind(
        &self,
        _ctx: &mut DispatchContext<'_>,
        _id: ObjectId,
        _version: u32,
    ) -> Result<Box<dyn Resource>, BindError> {
        Ok(Box::new(Shell))
    }
}

/// A bound `wl_shell`
#[derive(Debug)]
pub struct Shell;

impl Resource for Shell {
    fn interface(&self) -> &'static Interface {
        &WL_SHELL
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        // get_shell_surface
        let this = request.this;
        let id = request.new_id()?;
        let surface_id = request.object()?;
        ctx.check_new_id(id)?;

        let surface = ctx
            .get::<Surface>(surface_id)
            .ok_or_else(|| ProtocolError::invalid_object(surface_id))?
            .data();
        surface
            .borrow_mut()
            .assign_role(WL_SHELL_SURFACE_ROLE)
            .map_err(|role| {
                ProtocolError::new(
                    this,
                    SHELL_ERROR_ROLE,
                    format!("wl_surface@{} already has the {} role", surface_id, role),
                )
            })?;

        let size = ctx.server.config.window_size;
        let mut shell_surface = ShellSurface::new(surface);
        shell_surface.configure(ctx, id, size);
        shell_surface.ping(ctx, id);
        debug!(client = %ctx.client, shell_surface = %id, surface = %surface_id, "New shell surface");

        let version = ctx.version_of(this);
        ctx.insert(id, version, shell_surface)
    }
}

/// What kind of window a shell surface is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSurfaceKind {
    /// No kind was set yet
    None,
    /// A regular window
    Toplevel,
    /// A window positioned relative to another surface
    Transient {
        /// the parent `wl_surface`
        parent: ObjectId,
        /// location relative to the parent
        location: (i32, i32),
        /// whether the window refuses keyboard focus
        inactive: bool,
    },
    /// A window filling the output
    Fullscreen,
    /// A maximized window
    Maximized,
}

/// A `wl_shell_surface` object
#[derive(Debug)]
pub struct ShellSurface {
    surface: SurfaceRef,
    tracker: ConfigureTracker,
    pending_ping: Option<Serial>,
    kind: ShellSurfaceKind,
    size: Size,
    title: Option<String>,
    class: Option<String>,
}

impl ShellSurface {
    fn new(surface: SurfaceRef) -> Self {
        ShellSurface {
            surface,
            tracker: ConfigureTracker::new(),
            pending_ping: None,
            kind: ShellSurfaceKind::None,
            size: Size::default(),
            title: None,
            class: None,
        }
    }

    /// Phase of the configure handshake
    pub fn phase(&self) -> ConfigurePhase {
        if self.is_defunct() {
            ConfigurePhase::Closed
        } else {
            self.tracker.phase()
        }
    }

    /// Whether the `wl_surface` was destroyed
    pub fn is_defunct(&self) -> bool {
        !self.surface.borrow().is_alive()
    }

    /// The kind of window
    pub fn kind(&self) -> ShellSurfaceKind {
        self.kind
    }

    /// The window title
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// The window class
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    fn configure(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId, size: Size) {
        self.size = size;
        ctx.send(
            Message::new(this, EVENT_CONFIGURE)
                .uint(0)
                .int(size.w)
                .int(size.h),
        );
    }

    fn ping(&mut self, ctx: &mut DispatchContext<'_>, this: ObjectId) {
        let serial = ctx.next_serial();
        if self.tracker.send(serial).is_err() {
            return;
        }
        self.pending_ping = Some(serial);
        ctx.send(Message::new(this, EVENT_PING).uint(serial.into()));
    }

    fn pong(&mut self, ctx: &DispatchContext<'_>, this: ObjectId, serial: Serial) {
        if self.pending_ping != Some(serial) {
            debug!(client = %ctx.client, shell_surface = %this, %serial, "Ignoring unexpected pong");
            return;
        }
        self.pending_ping = None;
        if let Ok(true) = self.tracker.ack(serial) {
            self.surface.borrow_mut().set_mapped(true);
            debug!(client = %ctx.client, shell_surface = %this, "Shell surface configured");
        }
    }
}

impl Resource for ShellSurface {
    fn interface(&self) -> &'static Interface {
        &WL_SHELL_SURFACE
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        if self.is_defunct() {
            self.tracker.close();
            self.pending_ping = None;
            trace!(
                client = %ctx.client,
                shell_surface = %this,
                opcode = request.opcode,
                "Ignoring request on a defunct shell surface"
            );
            return Ok(());
        }
        match request.opcode {
            // pong
            0 => {
                let serial = Serial::from(request.uint()?);
                self.pong(ctx, this, serial);
            }
            // move, resize
            1 | 2 => {
                warn!(client = %ctx.client, shell_surface = %this, "Interactive move and resize are not supported");
                let size = self.size;
                self.configure(ctx, this, size);
            }
            // set_toplevel
            3 => self.kind = ShellSurfaceKind::Toplevel,
            // set_transient
            4 => {
                let parent = request.object()?;
                let location = (request.int()?, request.int()?);
                let flags = request.uint()?;
                if ctx.get::<Surface>(parent).is_none() {
                    return Err(ProtocolError::invalid_object(parent));
                }
                self.kind = ShellSurfaceKind::Transient {
                    parent,
                    location,
                    inactive: flags & 0x1 != 0,
                };
            }
            // set_fullscreen, set_maximized
            5 | 7 => {
                self.kind = if request.opcode == 5 {
                    ShellSurfaceKind::Fullscreen
                } else {
                    ShellSurfaceKind::Maximized
                };
                let size = ctx.server.config.output_size;
                self.configure(ctx, this, size);
            }
            // set_popup
            6 => {
                warn!(client = %ctx.client, shell_surface = %this, "Popups are not supported");
                ctx.send(Message::new(this, EVENT_POPUP_DONE));
            }
            // set_title
            8 => self.title = Some(request.string()?),
            // set_class
            9 => self.class = Some(request.string()?),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn destroyed(&mut self, _ctx: &mut DispatchContext<'_>, _this: ObjectId) {
        self.tracker.close();
        self.surface.borrow_mut().release_role();
    }
}
