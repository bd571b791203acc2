//! Client connections.

use std::{
    collections::VecDeque,
    fmt, io,
    os::unix::{io::OwnedFd, net::UnixStream},
};

use tracing::{debug, error, trace, warn};

use super::{
    display::{Display, DISPLAY_ERROR},
    event_loop::ServerState,
    resource::{DispatchContext, ProtocolError, Request, ResourceTable},
    wire::{self, Message, MessageHeader, ObjectId, HEADER_SIZE, MAX_FDS_OUT},
};

/// Unsent bytes after which a client is considered stuck and disconnected
pub const MAX_BACKLOG: usize = 4 * 1024 * 1024;

/// Identifier of a client connection, unique for the lifetime of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Reasons a client connection ends
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client closed its end of the socket
    #[error("client hung up")]
    HungUp,
    /// Reading from or writing to the socket failed
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// The client violated the protocol
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The client does not read its events
    #[error("client backlog of {0} bytes exceeds the limit")]
    Backlog(usize),
}

/// Events waiting to be written to a client
#[derive(Debug, Default)]
pub struct Outbox {
    bytes: Vec<u8>,
    fds: Vec<OwnedFd>,
}

impl Outbox {
    pub(crate) fn push(&mut self, event: Message) {
        let (sender, opcode) = (event.sender, event.opcode);
        if let Err(err) = event.encode(&mut self.bytes, &mut self.fds) {
            error!(object = %sender, opcode, "Dropping unencodable event: {}", err);
        }
    }

    /// Number of bytes not yet written
    pub fn pending(&self) -> usize {
        self.bytes.len()
    }
}

/// A connected client
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    stream: UnixStream,
    incoming: Vec<u8>,
    incoming_fds: VecDeque<OwnedFd>,
    outbox: Outbox,
    objects: ResourceTable,
}

impl Client {
    /// Wrap a freshly accepted connection
    ///
    /// The new client owns a single object: `wl_display`, with id 1.
    pub fn new(id: ClientId, stream: UnixStream) -> io::Result<Client> {
        stream.set_nonblocking(true)?;
        let objects = ResourceTable::with_display(Box::new(Display));
        Ok(Client {
            id,
            stream,
            incoming: Vec::new(),
            incoming_fds: VecDeque::new(),
            outbox: Outbox::default(),
            objects,
        })
    }

    /// The id of this client
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The client socket
    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    /// The objects of this client
    pub fn objects(&self) -> &ResourceTable {
        &self.objects
    }

    /// A dispatch context to act on this client's objects outside of a request
    pub fn context<'a>(&'a mut self, server: &'a mut ServerState) -> DispatchContext<'a> {
        DispatchContext {
            client: self.id,
            objects: &mut self.objects,
            outbox: &mut self.outbox,
            server,
        }
    }

    /// Read everything available on the socket, then execute every complete request
    pub fn dispatch(&mut self, server: &mut ServerState) -> Result<(), ClientError> {
        let mut hung_up = false;
        let mut buf = [0u8; 4096];
        loop {
            match wire::recv_with_fds(&self.stream, &mut buf, &mut self.incoming_fds) {
                Ok(0) => {
                    hung_up = true;
                    break;
                }
                Ok(n) => self.incoming.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ClientError::Io(err)),
            }
        }

        while let Some(header) = MessageHeader::peek(&self.incoming)
            .map_err(|err| ProtocolError::invalid_method(ObjectId::DISPLAY, err.to_string()))?
        {
            if self.incoming.len() < header.size {
                break;
            }
            let frame = self.incoming.drain(..header.size).collect::<Vec<u8>>();
            self.handle_message(header, &frame[HEADER_SIZE..], server)?;
        }

        if hung_up {
            return Err(ClientError::HungUp);
        }
        Ok(())
    }

    fn handle_message(
        &mut self,
        header: MessageHeader,
        body: &[u8],
        server: &mut ServerState,
    ) -> Result<(), ProtocolError> {
        let id = ObjectId::new(header.sender_id);
        let (interface, version) = self
            .objects
            .info(id)
            .ok_or_else(|| ProtocolError::invalid_object(id))?;
        let desc = interface.requests.get(header.opcode as usize).ok_or_else(|| {
            ProtocolError::invalid_method(
                id,
                format!("invalid opcode {} for {}@{}", header.opcode, interface.name, id),
            )
        })?;
        if desc.since > version {
            return Err(ProtocolError::invalid_method(
                id,
                format!(
                    "{}.{} needs version {}, object has version {}",
                    interface.name, desc.name, desc.since, version
                ),
            ));
        }
        let message = Message::parse(header, body, desc.signature, &mut self.incoming_fds).map_err(|err| {
            ProtocolError::invalid_method(id, format!("malformed {}.{}: {}", interface.name, desc.name, err))
        })?;
        trace!(client = %self.id, "-> {}@{}.{}", interface.name, id, desc.name);

        let mut object = self
            .objects
            .take(id)
            .ok_or_else(|| ProtocolError::invalid_object(id))?;
        let mut ctx = self.context(server);
        let result = object.request(&mut ctx, Request::new(message));
        if desc.destructor && result.is_ok() {
            object.destroyed(&mut ctx, id);
            ctx.objects.remove(id);
            ctx.delete_id(id);
        } else {
            ctx.objects.restore(id, object);
        }
        result
    }

    /// Write as much of the pending events as the socket accepts
    pub fn flush(&mut self) -> Result<(), ClientError> {
        while !self.outbox.bytes.is_empty() {
            let fd_count = self.outbox.fds.len().min(MAX_FDS_OUT);
            match wire::send_with_fds(&self.stream, &self.outbox.bytes, &self.outbox.fds[..fd_count]) {
                Ok(written) => {
                    self.outbox.bytes.drain(..written);
                    self.outbox.fds.drain(..fd_count);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ClientError::Io(err)),
            }
        }
        if self.outbox.pending() > MAX_BACKLOG {
            return Err(ClientError::Backlog(self.outbox.pending()));
        }
        Ok(())
    }

    /// Report a fatal protocol error to the client
    ///
    /// The error is sent and flushed best-effort; the caller disconnects the client.
    pub fn post_error(&mut self, err: &ProtocolError) {
        warn!(client = %self.id, object = %err.object, code = err.code, "Protocol error: {}", err.message);
        self.outbox.push(
            Message::new(ObjectId::DISPLAY, DISPLAY_ERROR)
                .object(Some(err.object))
                .uint(err.code)
                .string(err.message.clone()),
        );
        if let Err(err) = self.flush() {
            debug!(client = %self.id, "Could not deliver protocol error: {}", err);
        }
    }

    /// Destroy every object of the client, newest first
    pub fn teardown(&mut self, server: &mut ServerState) {
        let ids = self.objects.ids();
        debug!(client = %self.id, objects = ids.len(), "Tearing down client");
        for id in ids.into_iter().rev() {
            let Some(mut object) = self.objects.take(id) else {
                continue;
            };
            let mut ctx = self.context(server);
            object.destroyed(&mut ctx, id);
            self.objects.remove(id);
        }
        self.outbox = Outbox::default();
        self.incoming_fds.clear();
    }
}
