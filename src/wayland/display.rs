//! The `wl_display` singleton and `wl_callback`.

use tracing::debug;

use super::{
    interfaces::{Interface, WL_CALLBACK, WL_DISPLAY},
    registry::Registry,
    resource::{DispatchContext, ProtocolError, Request, Resource},
    wire::{Message, ObjectId},
};

pub(crate) const DISPLAY_ERROR: u16 = 0;
pub(crate) const DISPLAY_DELETE_ID: u16 = 1;
const CALLBACK_DONE: u16 = 0;

/// Global error codes, raised on the `wl_display` object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisplayError {
    /// Server couldn't find object
    InvalidObject = 0,
    /// Method doesn't exist on the specified interface or malformed request
    InvalidMethod = 1,
    /// Server is out of memory
    NoMemory = 2,
    /// Implementation error in the server
    Implementation = 3,
}

/// The `wl_display` object, id 1 of every client
#[derive(Debug)]
pub struct Display;

impl Resource for Display {
    fn interface(&self) -> &'static Interface {
        &WL_DISPLAY
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        match request.opcode {
            // sync
            0 => {
                let callback = request.new_id()?;
                ctx.check_new_id(callback)?;
                let serial = ctx.next_serial();
                ctx.send(Message::new(callback, CALLBACK_DONE).uint(serial.into()));
                ctx.delete_id(callback);
                Ok(())
            }
            // get_registry
            1 => {
                let id = request.new_id()?;
                ctx.insert(id, 1, Registry)?;
                let globals = ctx
                    .server
                    .globals
                    .iter()
                    .map(|global| (global.name(), global.interface().name, global.version()))
                    .collect::<Vec<_>>();
                debug!(client = %ctx.client, registry = %id, globals = globals.len(), "New registry");
                for (name, interface, version) in globals {
                    ctx.send(Registry::global_event(id, name, interface, version));
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }
}

/// A `wl_callback`, fired once then destroyed
#[derive(Debug)]
pub struct Callback;

impl Callback {
    /// Send `done` and destroy the callback
    pub fn done(ctx: &mut DispatchContext<'_>, id: ObjectId, data: u32) {
        ctx.send(Message::new(id, CALLBACK_DONE).uint(data));
        ctx.destroy(id);
    }
}

impl Resource for Callback {
    fn interface(&self) -> &'static Interface {
        &WL_CALLBACK
    }

    fn request(&mut self, _ctx: &mut DispatchContext<'_>, _request: Request) -> Result<(), ProtocolError> {
        unreachable!("wl_callback has no requests")
    }
}
