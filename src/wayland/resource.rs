//! Per-client protocol objects.
//!
//! Every object a client can address lives in its [`ResourceTable`], keyed by the id the
//! client chose for it. Implementations are `Box<dyn Resource>` and are downcast back to
//! their concrete type when another object needs to reach them (a `wl_surface` passed to
//! `xdg_wm_base.get_xdg_surface`, a `wl_buffer` passed to `wl_surface.attach`...).
//!
//! Destruction is two-phase: [`Resource::destroyed`] runs first, while the id is still
//! reserved, then the entry is removed and `wl_display.delete_id` is sent. Once removed, no
//! lookup resolves the id until the client reuses it.

use std::{collections::HashMap, fmt};

use downcast_rs::{impl_downcast, Downcast};
use tracing::trace;

use super::{
    client::{ClientId, Outbox},
    display::{DisplayError, DISPLAY_DELETE_ID},
    event_loop::ServerState,
    interfaces::Interface,
    wire::{ArgumentReader, Message, MessageError, ObjectId},
};
use crate::utils::Serial;

/// A protocol object owned by a client
pub trait Resource: Downcast {
    /// The interface this object implements
    fn interface(&self) -> &'static Interface;

    /// Handle a request addressed to this object
    ///
    /// The arguments have already been checked against the request signature. Destructor
    /// requests are followed by [`Resource::destroyed`] and the removal of the object when
    /// this returns `Ok`.
    fn request(&mut self, ctx: &mut DispatchContext<'_>, request: Request) -> Result<(), ProtocolError>;

    /// The object is being destroyed, by the client or by the server
    fn destroyed(&mut self, _ctx: &mut DispatchContext<'_>, _this: ObjectId) {}
}
impl_downcast!(Resource);

/// A fatal protocol error, ending the connection of the client that caused it
///
/// It is delivered to the client as `wl_display.error(object, code, message)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error {code} on object {object}: {message}")]
pub struct ProtocolError {
    /// The object the error is raised on
    pub object: ObjectId,
    /// Interface specific error code
    pub code: u32,
    /// Human readable description
    pub message: String,
}

impl ProtocolError {
    /// A new protocol error
    pub fn new(object: ObjectId, code: u32, message: impl Into<String>) -> Self {
        ProtocolError {
            object,
            code,
            message: message.into(),
        }
    }

    /// The client referenced an object that does not exist (or is of the wrong type)
    pub fn invalid_object(id: ObjectId) -> Self {
        ProtocolError::new(
            ObjectId::DISPLAY,
            DisplayError::InvalidObject as u32,
            format!("invalid object {}", id),
        )
    }

    /// The client sent a request the object cannot understand
    pub fn invalid_method(object: ObjectId, message: impl Into<String>) -> Self {
        ProtocolError::new(object, DisplayError::InvalidMethod as u32, message)
    }

    /// The request could not be decoded
    pub fn malformed(object: ObjectId, err: MessageError) -> Self {
        ProtocolError::invalid_method(object, err.to_string())
    }
}

/// A decoded request, giving typed access to its arguments
#[derive(Debug)]
pub struct Request {
    /// The object the request is addressed to
    pub this: ObjectId,
    /// Opcode of the request within the object's interface
    pub opcode: u16,
    args: ArgumentReader,
}

impl Request {
    pub(crate) fn new(message: Message) -> Self {
        Request {
            this: message.sender,
            opcode: message.opcode,
            args: message.into_reader(),
        }
    }

    /// Next argument as a signed integer
    pub fn int(&mut self) -> Result<i32, ProtocolError> {
        self.args.int().map_err(|err| ProtocolError::malformed(self.this, err))
    }

    /// Next argument as an unsigned integer
    pub fn uint(&mut self) -> Result<u32, ProtocolError> {
        self.args.uint().map_err(|err| ProtocolError::malformed(self.this, err))
    }

    /// Next argument as a possibly null string
    pub fn optional_string(&mut self) -> Result<Option<String>, ProtocolError> {
        self.args.string().map_err(|err| ProtocolError::malformed(self.this, err))
    }

    /// Next argument as a string, null being a protocol error
    pub fn string(&mut self) -> Result<String, ProtocolError> {
        self.optional_string()?
            .ok_or_else(|| ProtocolError::invalid_method(self.this, "unexpected null string"))
    }

    /// Next argument as a possibly null object
    pub fn optional_object(&mut self) -> Result<Option<ObjectId>, ProtocolError> {
        self.args.object().map_err(|err| ProtocolError::malformed(self.this, err))
    }

    /// Next argument as an object, null being a protocol error
    pub fn object(&mut self) -> Result<ObjectId, ProtocolError> {
        self.optional_object()?
            .ok_or_else(|| ProtocolError::invalid_method(self.this, "unexpected null object"))
    }

    /// Next argument as a new object id
    pub fn new_id(&mut self) -> Result<ObjectId, ProtocolError> {
        self.args.new_id().map_err(|err| ProtocolError::malformed(self.this, err))
    }

    /// Next argument as a file descriptor
    pub fn fd(&mut self) -> Result<std::os::unix::io::OwnedFd, ProtocolError> {
        self.args.fd().map_err(|err| ProtocolError::malformed(self.this, err))
    }
}

struct Entry {
    interface: &'static Interface,
    version: u32,
    // `None` while the object handles one of its own requests
    object: Option<Box<dyn Resource>>,
}

/// The objects of a single client, by id
#[derive(Default)]
pub struct ResourceTable {
    entries: HashMap<u32, Entry>,
}

impl fmt::Debug for ResourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, entry)| (id, entry.interface.name)))
            .finish()
    }
}

impl ResourceTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding only `display` at id 1, as every connection starts
    pub(crate) fn with_display(display: Box<dyn Resource>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ObjectId::DISPLAY.protocol_id(),
            Entry {
                interface: display.interface(),
                version: 1,
                object: Some(display),
            },
        );
        ResourceTable { entries }
    }

    /// Insert an object, returning it back if the id is taken
    pub fn insert(
        &mut self,
        id: ObjectId,
        version: u32,
        object: Box<dyn Resource>,
    ) -> Result<(), Box<dyn Resource>> {
        if self.entries.contains_key(&id.protocol_id()) {
            return Err(object);
        }
        self.entries.insert(
            id.protocol_id(),
            Entry {
                interface: object.interface(),
                version,
                object: Some(object),
            },
        );
        Ok(())
    }

    /// Whether the id currently names an object
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id.protocol_id())
    }

    /// Interface and version of an object
    pub fn info(&self, id: ObjectId) -> Option<(&'static Interface, u32)> {
        self.entries
            .get(&id.protocol_id())
            .map(|entry| (entry.interface, entry.version))
    }

    /// Borrow an object as its concrete type
    pub fn get<T: Resource>(&self, id: ObjectId) -> Option<&T> {
        self.entries
            .get(&id.protocol_id())?
            .object
            .as_ref()?
            .downcast_ref::<T>()
    }

    /// Mutably borrow an object as its concrete type
    pub fn get_mut<T: Resource>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.entries
            .get_mut(&id.protocol_id())?
            .object
            .as_mut()?
            .downcast_mut::<T>()
    }

    /// Ids of every object of the given type, in ascending order
    pub fn ids_of<T: Resource>(&self) -> Vec<ObjectId> {
        let mut ids = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.object.as_ref().map_or(false, |object| object.is::<T>()))
            .map(|(id, _)| ObjectId::new(*id))
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Every id in the table, in ascending order
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids = self.entries.keys().copied().map(ObjectId::new).collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no object
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn take(&mut self, id: ObjectId) -> Option<Box<dyn Resource>> {
        self.entries.get_mut(&id.protocol_id())?.object.take()
    }

    pub(crate) fn restore(&mut self, id: ObjectId, object: Box<dyn Resource>) {
        if let Some(entry) = self.entries.get_mut(&id.protocol_id()) {
            entry.object = Some(object);
        }
    }

    pub(crate) fn remove(&mut self, id: ObjectId) -> Option<Box<dyn Resource>> {
        self.entries.remove(&id.protocol_id())?.object
    }
}

/// Everything a resource may touch while handling a request
pub struct DispatchContext<'a> {
    /// The client the request came from
    pub client: ClientId,
    /// The objects of that client
    pub objects: &'a mut ResourceTable,
    pub(crate) outbox: &'a mut Outbox,
    /// State shared by every client of the server
    pub server: &'a mut ServerState,
}

impl fmt::Debug for DispatchContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("client", &self.client)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

impl<'a> DispatchContext<'a> {
    /// Queue an event for the client
    pub fn send(&mut self, event: Message) {
        if let Some((interface, _)) = self.objects.info(event.sender) {
            trace!(
                client = %self.client,
                "<- {}@{}.{}",
                interface.name,
                event.sender,
                interface.event_name(event.opcode)
            );
        }
        self.outbox.push(event);
    }

    /// Check that `id` is a valid id for a new client object
    pub fn check_new_id(&self, id: ObjectId) -> Result<(), ProtocolError> {
        if !id.is_client_id() || self.objects.contains(id) {
            return Err(ProtocolError::new(
                ObjectId::DISPLAY,
                DisplayError::InvalidObject as u32,
                format!("invalid new id {}", id),
            ));
        }
        Ok(())
    }

    /// Insert a new client object
    pub fn insert<R: Resource>(&mut self, id: ObjectId, version: u32, object: R) -> Result<(), ProtocolError> {
        self.insert_boxed(id, version, Box::new(object))
    }

    pub(crate) fn insert_boxed(
        &mut self,
        id: ObjectId,
        version: u32,
        object: Box<dyn Resource>,
    ) -> Result<(), ProtocolError> {
        self.check_new_id(id)?;
        trace!(client = %self.client, "new {}@{} (v{})", object.interface().name, id, version);
        self.objects
            .insert(id, version, object)
            .map_err(|_| ProtocolError::invalid_object(id))
    }

    /// Version of an object, `0` if it does not exist
    pub fn version_of(&self, id: ObjectId) -> u32 {
        self.objects.info(id).map_or(0, |(_, version)| version)
    }

    /// Borrow another object as its concrete type
    pub fn get<T: Resource>(&self, id: ObjectId) -> Option<&T> {
        self.objects.get(id)
    }

    /// Mutably borrow another object as its concrete type
    pub fn get_mut<T: Resource>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.objects.get_mut(id)
    }

    /// Run `f` on an object of type `T` while keeping access to the context
    ///
    /// Returns `None` if `id` does not name a `T`.
    pub fn with_object<T: Resource, R>(
        &mut self,
        id: ObjectId,
        f: impl FnOnce(&mut T, &mut DispatchContext<'_>) -> R,
    ) -> Option<R> {
        let mut object = self.objects.take(id)?;
        let result = object.downcast_mut::<T>().map(|object| f(object, self));
        self.objects.restore(id, object);
        result
    }

    /// Draw the next serial from the server-wide counter
    pub fn next_serial(&mut self) -> Serial {
        self.server.serials.next_serial()
    }

    /// Tell the client it may reuse `id`
    pub fn delete_id(&mut self, id: ObjectId) {
        self.outbox
            .push(Message::new(ObjectId::DISPLAY, DISPLAY_DELETE_ID).uint(id.protocol_id()));
    }

    /// Destroy an object from the server side
    ///
    /// Runs the destruction callback, removes the object and sends `delete_id`.
    pub fn destroy(&mut self, id: ObjectId) {
        let Some(mut object) = self.objects.take(id) else {
            return;
        };
        object.destroyed(self, id);
        self.objects.remove(id);
        self.delete_id(id);
    }
}
