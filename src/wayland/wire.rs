//! Wayland wire format.
//!
//! Every message starts with an 8 byte header: the id of the sending object, then a word
//! holding the total message size in its upper 16 bits and the opcode in its lower 16 bits.
//! Arguments follow as 32-bit words in native byte order; strings and arrays are length
//! prefixed and padded to a multiple of 4, file descriptors travel out of band as
//! `SCM_RIGHTS` ancillary data.
//!
//! This module is shared by the server and by clients (the integration tests drive the
//! server with it), so encoding and parsing are symmetric.

use std::{
    collections::VecDeque,
    fmt,
    io::{self, IoSlice, IoSliceMut},
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
};

use rustix::net::{
    recvmsg, sendmsg, RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags,
};
use smallvec::SmallVec;

/// Size of a message header in bytes
pub const HEADER_SIZE: usize = 8;
/// Largest message the protocol allows
pub const MAX_MESSAGE_SIZE: usize = 4096;
/// Largest number of file descriptors passed in a single `sendmsg`
pub const MAX_FDS_OUT: usize = 28;

/// Largest id a client may allocate; ids above are reserved for server-created objects
pub const CLIENT_ID_MAX: u32 = 0xFEFF_FFFF;

/// Identifier of a protocol object, scoped to its client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// The `wl_display` singleton every connection starts with
    pub const DISPLAY: ObjectId = ObjectId(1);

    /// Wrap a raw protocol id
    pub const fn new(id: u32) -> Self {
        ObjectId(id)
    }

    /// The raw protocol id
    pub const fn protocol_id(&self) -> u32 {
        self.0
    }

    /// Whether this id lies in the range clients allocate from
    pub fn is_client_id(&self) -> bool {
        (1..=CLIENT_ID_MAX).contains(&self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The type of a message argument, as found in interface signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentType {
    /// Signed 32-bit integer
    Int,
    /// Unsigned 32-bit integer
    Uint,
    /// Signed 24.8 fixed point number
    Fixed,
    /// Length prefixed, NUL terminated string; may be null
    Str,
    /// Id of an existing object; `0` is null
    Object,
    /// Id of an object created by this message
    NewId,
    /// Length prefixed byte array
    Array,
    /// File descriptor, passed out of band
    Fd,
}

/// A decoded message argument
#[derive(Debug)]
pub enum Argument {
    /// Signed 32-bit integer
    Int(i32),
    /// Unsigned 32-bit integer
    Uint(u32),
    /// Signed 24.8 fixed point number, raw
    Fixed(i32),
    /// A string, `None` when null
    Str(Option<String>),
    /// An object id, `0` when null
    Object(u32),
    /// A new object id
    NewId(u32),
    /// A byte array
    Array(Vec<u8>),
    /// A file descriptor
    Fd(OwnedFd),
}

/// Errors while encoding or decoding a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The header announces an impossible size
    #[error("invalid message size {0}")]
    InvalidSize(usize),
    /// The encoded message would not fit into a single protocol message
    #[error("message of {0} bytes exceeds the protocol limit")]
    TooLarge(usize),
    /// The body ended in the middle of an argument
    #[error("message truncated while reading argument {0}")]
    Truncated(usize),
    /// A string argument is missing its NUL terminator
    #[error("string argument {0} is not NUL terminated")]
    MissingNul(usize),
    /// A string argument contains an interior NUL byte
    #[error("string argument contains an interior NUL byte")]
    InteriorNul,
    /// A string argument is not valid UTF-8
    #[error("string argument {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    /// The signature asks for a file descriptor that was not received
    #[error("missing file descriptor for argument {0}")]
    MissingFd(usize),
    /// Bytes remain after the last argument of the signature
    #[error("{0} trailing bytes after the last argument")]
    TrailingBytes(usize),
    /// A typed accessor found a different argument
    #[error("expected {expected:?} argument")]
    UnexpectedArgument {
        /// the type the caller asked for
        expected: ArgumentType,
    },
}

/// Header of a message sitting in a receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Id of the object the message is addressed to (requests) or sent from (events)
    pub sender_id: u32,
    /// Opcode within the object's interface
    pub opcode: u16,
    /// Total message size, header included
    pub size: usize,
}

impl MessageHeader {
    /// Read the header at the start of `buf`
    ///
    /// Returns `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are available. The caller
    /// still needs to check that `size` bytes have arrived before parsing the body.
    pub fn peek(buf: &[u8]) -> Result<Option<MessageHeader>, MessageError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let sender_id = read_word(buf, 0);
        let word = read_word(buf, 4);
        let size = (word >> 16) as usize;
        if size < HEADER_SIZE || size % 4 != 0 || size > MAX_MESSAGE_SIZE {
            return Err(MessageError::InvalidSize(size));
        }
        Ok(Some(MessageHeader {
            sender_id,
            opcode: (word & 0xffff) as u16,
            size,
        }))
    }
}

/// A protocol message: request or event
#[derive(Debug)]
pub struct Message {
    /// Object sending (events) or receiving (requests) the message
    pub sender: ObjectId,
    /// Opcode within the object's interface
    pub opcode: u16,
    /// Arguments, in signature order
    pub args: SmallVec<[Argument; 4]>,
}

impl Message {
    /// Start building a message
    pub fn new(sender: ObjectId, opcode: u16) -> Self {
        Message {
            sender,
            opcode,
            args: SmallVec::new(),
        }
    }

    /// Append a signed integer
    pub fn int(mut self, value: i32) -> Self {
        self.args.push(Argument::Int(value));
        self
    }

    /// Append an unsigned integer
    pub fn uint(mut self, value: u32) -> Self {
        self.args.push(Argument::Uint(value));
        self
    }

    /// Append a raw 24.8 fixed point number
    pub fn fixed(mut self, value: i32) -> Self {
        self.args.push(Argument::Fixed(value));
        self
    }

    /// Append a non-null string
    pub fn string(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::Str(Some(value.into())));
        self
    }

    /// Append a possibly null string
    pub fn optional_string(mut self, value: Option<String>) -> Self {
        self.args.push(Argument::Str(value));
        self
    }

    /// Append an object reference, `None` encoding null
    pub fn object(mut self, id: Option<ObjectId>) -> Self {
        self.args.push(Argument::Object(id.map_or(0, |id| id.0)));
        self
    }

    /// Append a new object id
    pub fn new_id(mut self, id: ObjectId) -> Self {
        self.args.push(Argument::NewId(id.0));
        self
    }

    /// Append a byte array
    pub fn array(mut self, bytes: Vec<u8>) -> Self {
        self.args.push(Argument::Array(bytes));
        self
    }

    /// Append a file descriptor
    pub fn fd(mut self, fd: OwnedFd) -> Self {
        self.args.push(Argument::Fd(fd));
        self
    }

    /// Encode this message at the end of `bytes`, moving its file descriptors into `fds`
    ///
    /// On error `bytes` is left unchanged.
    pub fn encode(self, bytes: &mut Vec<u8>, fds: &mut Vec<OwnedFd>) -> Result<(), MessageError> {
        let start = bytes.len();
        let mut new_fds = Vec::new();
        bytes.extend_from_slice(&self.sender.0.to_ne_bytes());
        bytes.extend_from_slice(&[0; 4]);
        for arg in self.args {
            match arg {
                Argument::Int(value) | Argument::Fixed(value) => bytes.extend_from_slice(&value.to_ne_bytes()),
                Argument::Uint(value) | Argument::Object(value) | Argument::NewId(value) => {
                    bytes.extend_from_slice(&value.to_ne_bytes())
                }
                Argument::Str(None) => bytes.extend_from_slice(&0u32.to_ne_bytes()),
                Argument::Str(Some(string)) => {
                    if string.as_bytes().contains(&0) {
                        bytes.truncate(start);
                        return Err(MessageError::InteriorNul);
                    }
                    let len = string.len() + 1;
                    bytes.extend_from_slice(&(len as u32).to_ne_bytes());
                    bytes.extend_from_slice(string.as_bytes());
                    bytes.push(0);
                    pad(bytes, len);
                }
                Argument::Array(array) => {
                    bytes.extend_from_slice(&(array.len() as u32).to_ne_bytes());
                    bytes.extend_from_slice(&array);
                    pad(bytes, array.len());
                }
                Argument::Fd(fd) => new_fds.push(fd),
            }
        }
        let size = bytes.len() - start;
        if size > MAX_MESSAGE_SIZE {
            bytes.truncate(start);
            return Err(MessageError::TooLarge(size));
        }
        let word = ((size as u32) << 16) | u32::from(self.opcode);
        bytes[start + 4..start + HEADER_SIZE].copy_from_slice(&word.to_ne_bytes());
        fds.extend(new_fds);
        Ok(())
    }

    /// Parse the body of a message according to `signature`
    ///
    /// `body` holds the bytes following the header. File descriptors are taken from the
    /// front of `fds`, in order.
    pub fn parse(
        header: MessageHeader,
        body: &[u8],
        signature: &[ArgumentType],
        fds: &mut VecDeque<OwnedFd>,
    ) -> Result<Message, MessageError> {
        let mut offset = 0;
        let mut args = SmallVec::new();
        for (index, kind) in signature.iter().enumerate() {
            let arg = match kind {
                ArgumentType::Int => Argument::Int(take_word(body, &mut offset, index)? as i32),
                ArgumentType::Uint => Argument::Uint(take_word(body, &mut offset, index)?),
                ArgumentType::Fixed => Argument::Fixed(take_word(body, &mut offset, index)? as i32),
                ArgumentType::Object => Argument::Object(take_word(body, &mut offset, index)?),
                ArgumentType::NewId => Argument::NewId(take_word(body, &mut offset, index)?),
                ArgumentType::Str => {
                    let len = take_word(body, &mut offset, index)? as usize;
                    if len == 0 {
                        Argument::Str(None)
                    } else {
                        let raw = take_padded(body, &mut offset, len, index)?;
                        let (nul, text) = raw.split_last().ok_or(MessageError::MissingNul(index))?;
                        if *nul != 0 {
                            return Err(MessageError::MissingNul(index));
                        }
                        let text = std::str::from_utf8(text).map_err(|_| MessageError::InvalidUtf8(index))?;
                        Argument::Str(Some(text.to_owned()))
                    }
                }
                ArgumentType::Array => {
                    let len = take_word(body, &mut offset, index)? as usize;
                    Argument::Array(take_padded(body, &mut offset, len, index)?.to_vec())
                }
                ArgumentType::Fd => Argument::Fd(fds.pop_front().ok_or(MessageError::MissingFd(index))?),
            };
            args.push(arg);
        }
        if offset != body.len() {
            return Err(MessageError::TrailingBytes(body.len() - offset));
        }
        Ok(Message {
            sender: ObjectId(header.sender_id),
            opcode: header.opcode,
            args,
        })
    }

    /// Consume the message into a typed argument reader
    pub fn into_reader(self) -> ArgumentReader {
        ArgumentReader {
            args: self.args.into_iter(),
        }
    }
}

/// Typed, in-order access to the arguments of a parsed message
#[derive(Debug)]
pub struct ArgumentReader {
    args: smallvec::IntoIter<[Argument; 4]>,
}

impl ArgumentReader {
    /// Next argument as a signed integer
    pub fn int(&mut self) -> Result<i32, MessageError> {
        match self.args.next() {
            Some(Argument::Int(value)) => Ok(value),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Int,
            }),
        }
    }

    /// Next argument as an unsigned integer
    pub fn uint(&mut self) -> Result<u32, MessageError> {
        match self.args.next() {
            Some(Argument::Uint(value)) => Ok(value),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Uint,
            }),
        }
    }

    /// Next argument as a raw fixed point number
    pub fn fixed(&mut self) -> Result<i32, MessageError> {
        match self.args.next() {
            Some(Argument::Fixed(value)) => Ok(value),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Fixed,
            }),
        }
    }

    /// Next argument as a possibly null string
    pub fn string(&mut self) -> Result<Option<String>, MessageError> {
        match self.args.next() {
            Some(Argument::Str(value)) => Ok(value),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Str,
            }),
        }
    }

    /// Next argument as a possibly null object reference
    pub fn object(&mut self) -> Result<Option<ObjectId>, MessageError> {
        match self.args.next() {
            Some(Argument::Object(0)) => Ok(None),
            Some(Argument::Object(id)) => Ok(Some(ObjectId(id))),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Object,
            }),
        }
    }

    /// Next argument as a new object id
    pub fn new_id(&mut self) -> Result<ObjectId, MessageError> {
        match self.args.next() {
            Some(Argument::NewId(id)) => Ok(ObjectId(id)),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::NewId,
            }),
        }
    }

    /// Next argument as a byte array
    pub fn array(&mut self) -> Result<Vec<u8>, MessageError> {
        match self.args.next() {
            Some(Argument::Array(bytes)) => Ok(bytes),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Array,
            }),
        }
    }

    /// Next argument as a file descriptor
    pub fn fd(&mut self) -> Result<OwnedFd, MessageError> {
        match self.args.next() {
            Some(Argument::Fd(fd)) => Ok(fd),
            _ => Err(MessageError::UnexpectedArgument {
                expected: ArgumentType::Fd,
            }),
        }
    }
}

/// Receive bytes and file descriptors from a non-blocking socket
///
/// Returns the number of bytes read, `0` meaning the peer hung up. Received descriptors are
/// appended to `fds` with `CLOEXEC` set.
pub fn recv_with_fds(socket: impl AsFd, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
    let mut space = [0u8; rustix::cmsg_space!(ScmRights(MAX_FDS_OUT))];
    let mut control = RecvAncillaryBuffer::new(&mut space);
    let received = recvmsg(
        socket,
        &mut [IoSliceMut::new(buf)],
        &mut control,
        RecvFlags::DONTWAIT | RecvFlags::CMSG_CLOEXEC,
    )?;
    for message in control.drain() {
        if let RecvAncillaryMessage::ScmRights(received_fds) = message {
            fds.extend(received_fds);
        }
    }
    Ok(received.bytes)
}

/// Send bytes and file descriptors on a non-blocking socket
///
/// The descriptors ride along with the first byte written. Returns the number of bytes
/// written.
pub fn send_with_fds(socket: impl AsFd, bytes: &[u8], fds: &[OwnedFd]) -> io::Result<usize> {
    if fds.len() > MAX_FDS_OUT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "too many file descriptors for a single message",
        ));
    }
    let borrowed: SmallVec<[BorrowedFd<'_>; 4]> = fds.iter().map(|fd| fd.as_fd()).collect();
    let mut space = [0u8; rustix::cmsg_space!(ScmRights(MAX_FDS_OUT))];
    let mut control = SendAncillaryBuffer::new(&mut space);
    if !borrowed.is_empty() && !control.push(SendAncillaryMessage::ScmRights(&borrowed)) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "file descriptors do not fit the control buffer",
        ));
    }
    let written = sendmsg(
        socket,
        &[IoSlice::new(bytes)],
        &mut control,
        SendFlags::DONTWAIT | SendFlags::NOSIGNAL,
    )?;
    Ok(written)
}

fn read_word(buf: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

fn take_word(body: &[u8], offset: &mut usize, index: usize) -> Result<u32, MessageError> {
    if body.len() < *offset + 4 {
        return Err(MessageError::Truncated(index));
    }
    let word = read_word(body, *offset);
    *offset += 4;
    Ok(word)
}

fn take_padded<'a>(
    body: &'a [u8],
    offset: &mut usize,
    len: usize,
    index: usize,
) -> Result<&'a [u8], MessageError> {
    let padded = (len + 3) & !3;
    if body.len() < *offset + padded {
        return Err(MessageError::Truncated(index));
    }
    let slice = &body[*offset..*offset + len];
    *offset += padded;
    Ok(slice)
}

fn pad(bytes: &mut Vec<u8>, len: usize) {
    let padding = ((len + 3) & !3) - len;
    bytes.extend(std::iter::repeat(0).take(padding));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_back(message: Message, signature: &[ArgumentType]) -> Result<Message, MessageError> {
        let mut bytes = Vec::new();
        let mut fds = Vec::new();
        message.encode(&mut bytes, &mut fds).unwrap();
        let header = MessageHeader::peek(&bytes).unwrap().unwrap();
        assert_eq!(header.size, bytes.len());
        let mut fds = fds.into_iter().collect();
        Message::parse(header, &bytes[HEADER_SIZE..], signature, &mut fds)
    }

    #[test]
    fn registry_global_layout() {
        let mut bytes = Vec::new();
        Message::new(ObjectId::new(2), 0)
            .uint(1)
            .string("wl_compositor")
            .uint(4)
            .encode(&mut bytes, &mut Vec::new())
            .unwrap();
        // header + name + (len + "wl_compositor\0" padded to 16) + version
        assert_eq!(bytes.len(), 8 + 4 + 4 + 16 + 4);
        let header = MessageHeader::peek(&bytes).unwrap().unwrap();
        assert_eq!(header.sender_id, 2);
        assert_eq!(header.opcode, 0);
        assert_eq!(read_word(&bytes, 12), 14);
    }

    #[test]
    fn strings_and_null_objects() {
        let message = Message::new(ObjectId::new(7), 3)
            .optional_string(None)
            .string("title")
            .object(None)
            .new_id(ObjectId::new(9));
        let parsed = parse_back(
            message,
            &[ArgumentType::Str, ArgumentType::Str, ArgumentType::Object, ArgumentType::NewId],
        )
        .unwrap();
        assert_eq!(parsed.sender, ObjectId::new(7));
        let mut reader = parsed.into_reader();
        assert_eq!(reader.string().unwrap(), None);
        assert_eq!(reader.string().unwrap().as_deref(), Some("title"));
        assert_eq!(reader.object().unwrap(), None);
        assert_eq!(reader.new_id().unwrap(), ObjectId::new(9));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let message = Message::new(ObjectId::new(3), 0).int(1).int(2);
        assert_eq!(
            parse_back(message, &[ArgumentType::Int]).unwrap_err(),
            MessageError::TrailingBytes(4)
        );
    }

    #[test]
    fn truncated_body_is_rejected() {
        let message = Message::new(ObjectId::new(3), 0).int(1);
        assert_eq!(
            parse_back(message, &[ArgumentType::Int, ArgumentType::Int]).unwrap_err(),
            MessageError::Truncated(1)
        );
    }

    #[test]
    fn missing_fd_is_rejected() {
        let message = Message::new(ObjectId::new(3), 0).new_id(ObjectId::new(4)).int(4096);
        assert_eq!(
            parse_back(
                message,
                &[ArgumentType::NewId, ArgumentType::Fd, ArgumentType::Int]
            )
            .unwrap_err(),
            MessageError::MissingFd(1)
        );
    }

    #[test]
    fn header_size_is_validated() {
        let mut bytes = vec![0u8; 8];
        bytes[..4].copy_from_slice(&1u32.to_ne_bytes());
        bytes[4..].copy_from_slice(&((6u32 << 16) | 1).to_ne_bytes());
        assert_eq!(MessageHeader::peek(&bytes), Err(MessageError::InvalidSize(6)));
        assert_eq!(MessageHeader::peek(&bytes[..4]), Ok(None));
    }

    #[test]
    fn interior_nul_is_refused_on_encode() {
        let mut bytes = vec![1, 2, 3, 4];
        let err = Message::new(ObjectId::new(3), 0)
            .string("a\0b")
            .encode(&mut bytes, &mut Vec::new())
            .unwrap_err();
        assert_eq!(err, MessageError::InteriorNul);
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn fds_cross_a_socket_pair() {
        use std::os::unix::net::UnixStream;

        let (left, right) = UnixStream::pair().unwrap();
        let (passed, _keep) = UnixStream::pair().unwrap();
        let written = send_with_fds(&left, b"ping", &[OwnedFd::from(passed)]).unwrap();
        assert_eq!(written, 4);

        let mut buf = [0u8; 16];
        let mut fds = VecDeque::new();
        let read = recv_with_fds(&right, &mut buf, &mut fds).unwrap();
        assert_eq!(&buf[..read], b"ping");
        assert_eq!(fds.len(), 1);
    }
}
