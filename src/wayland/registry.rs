//! Globals and the `wl_registry` interface.
//!
//! A global is an advertised capability: an interface, the highest version the server
//! supports for it and a [`GlobalHandler`] creating the client object when the global is
//! bound. Globals are advertised once, before the server accepts connections, and each
//! `wl_registry` lists them in registration order.
//!
//! ```no_run
//! use reflector::wayland::{
//!     compositor::CompositorState,
//!     interfaces::WL_COMPOSITOR,
//!     registry::GlobalRegistry,
//! };
//!
//! let mut globals = GlobalRegistry::new();
//! globals.advertise(&WL_COMPOSITOR, 4, CompositorState).unwrap();
//! // advertising the same interface a second time is refused
//! assert!(globals.advertise(&WL_COMPOSITOR, 4, CompositorState).is_err());
//! ```

use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use tracing::{debug, info};

use super::{
    display::DisplayError,
    interfaces::{Interface, WL_REGISTRY},
    resource::{DispatchContext, ProtocolError, Request, Resource},
    wire::{Message, ObjectId},
};

const REGISTRY_GLOBAL: u16 = 0;
const REGISTRY_GLOBAL_REMOVE: u16 = 1;

/// Creates the client object of a global when it is bound
pub trait GlobalHandler {
    /// Create the object for a bind of `version` at `id`
    ///
    /// The handler may queue events for the new object (they are sent after the bind
    /// succeeds) but must not insert it; the registry inserts the returned object.
    fn bind(
        &self,
        ctx: &mut DispatchContext<'_>,
        id: ObjectId,
        version: u32,
    ) -> Result<Box<dyn Resource>, BindError>;
}

impl<F> GlobalHandler for F
where
    F: Fn(&mut DispatchContext<'_>, ObjectId, u32) -> Result<Box<dyn Resource>, BindError>,
{
    fn bind(
        &self,
        ctx: &mut DispatchContext<'_>,
        id: ObjectId,
        version: u32,
    ) -> Result<Box<dyn Resource>, BindError> {
        self(ctx, id, version)
    }
}

/// A bind that could not produce an object
///
/// The client that asked for it is disconnected; the server and other clients go on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// The resources for the object could not be allocated
    #[error("out of memory")]
    OutOfMemory,
    /// The handler failed for another reason
    #[error("bind failed: {0}")]
    Failed(String),
}

impl BindError {
    fn code(&self) -> DisplayError {
        match self {
            BindError::OutOfMemory => DisplayError::NoMemory,
            BindError::Failed(_) => DisplayError::Implementation,
        }
    }
}

/// Errors while setting up globals
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The interface is already advertised
    #[error("interface {0} is advertised twice")]
    DuplicateInterface(&'static str),
    /// The version is zero or higher than what the implementation supports
    #[error("{interface} version {version} is not supported")]
    InvalidVersion {
        /// the interface
        interface: &'static str,
        /// the refused version
        version: u32,
    },
}

/// Name of a global, as sent in `wl_registry.global`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(u32);

impl GlobalId {
    /// The name clients use to bind the global
    pub fn name(&self) -> u32 {
        self.0
    }
}

/// An advertised global
pub struct Global {
    name: u32,
    interface: &'static Interface,
    version: u32,
    handler: Rc<dyn GlobalHandler>,
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Global")
            .field("name", &self.name)
            .field("interface", &self.interface.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Global {
    /// The name of this global
    pub fn name(&self) -> u32 {
        self.name
    }

    /// The advertised interface
    pub fn interface(&self) -> &'static Interface {
        self.interface
    }

    /// The advertised version
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// The globals of a server, in registration order
#[derive(Debug)]
pub struct GlobalRegistry {
    globals: IndexMap<u32, Global>,
    next_name: u32,
}

impl Default for GlobalRegistry {
    fn default() -> Self {
        GlobalRegistry {
            globals: IndexMap::new(),
            next_name: 1,
        }
    }
}

impl GlobalRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a new global
    ///
    /// Every interface may only be advertised once.
    pub fn advertise<H>(
        &mut self,
        interface: &'static Interface,
        version: u32,
        handler: H,
    ) -> Result<GlobalId, RegistryError>
    where
        H: GlobalHandler + 'static,
    {
        if self.globals.values().any(|global| global.interface == interface) {
            return Err(RegistryError::DuplicateInterface(interface.name));
        }
        if version == 0 || version > interface.version {
            return Err(RegistryError::InvalidVersion {
                interface: interface.name,
                version,
            });
        }
        let name = self.next_name;
        self.next_name += 1;
        self.globals.insert(
            name,
            Global {
                name,
                interface,
                version,
                handler: Rc::new(handler),
            },
        );
        info!(name, interface = interface.name, version, "Advertising global");
        Ok(GlobalId(name))
    }

    /// Look a global up by name
    pub fn get(&self, name: u32) -> Option<&Global> {
        self.globals.get(&name)
    }

    /// Withdraw a global, returning it
    pub fn remove(&mut self, name: u32) -> Option<Global> {
        self.globals.shift_remove(&name)
    }

    /// Names of every global, in registration order
    pub fn names(&self) -> Vec<u32> {
        self.globals.keys().copied().collect()
    }

    /// Iterate the globals in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    /// Number of globals
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    /// Whether no global is advertised
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

/// A `wl_registry` object
#[derive(Debug)]
pub struct Registry;

impl Registry {
    pub(crate) fn global_event(id: ObjectId, name: u32, interface: &str, version: u32) -> Message {
        Message::new(id, REGISTRY_GLOBAL)
            .uint(name)
            .string(interface)
            .uint(version)
    }

    pub(crate) fn global_remove_event(id: ObjectId, name: u32) -> Message {
        Message::new(id, REGISTRY_GLOBAL_REMOVE).uint(name)
    }
}

impl Resource for Registry {
    fn interface(&self) -> &'static Interface {
        &WL_REGISTRY
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        let name = request.uint()?;
        let interface = request.string()?;
        let version = request.uint()?;
        let id = request.new_id()?;

        let invalid = |message: String| {
            ProtocolError::new(ObjectId::DISPLAY, DisplayError::InvalidObject as u32, message)
        };
        let Some(global) = ctx.server.globals.get(name) else {
            return Err(invalid(format!("invalid global {} ({})", interface, name)));
        };
        if global.interface.name != interface {
            return Err(invalid(format!(
                "invalid interface for global {}: have {}, wanted {}",
                name, interface, global.interface.name
            )));
        }
        if version == 0 || version > global.version {
            return Err(invalid(format!(
                "invalid version for global {} ({}): have {}, wanted {}",
                interface, name, version, global.version
            )));
        }
        let handler = global.handler.clone();
        ctx.check_new_id(id)?;

        match handler.bind(ctx, id, version) {
            Ok(object) => {
                debug!(client = %ctx.client, registry = %this, "Bound {} v{} at {}", interface, version, id);
                ctx.insert_boxed(id, version, object)
            }
            Err(err) => Err(ProtocolError::new(
                ObjectId::DISPLAY,
                err.code() as u32,
                format!("binding {} failed: {}", interface, err),
            )),
        }
    }
}
