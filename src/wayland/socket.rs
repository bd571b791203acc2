//! The display socket
//!
//! Clients find the server through a socket in the runtime directory. It lives next to a
//! `<name>.lock` file whose `flock` tells whether the name is in use.
//! [`ListeningSocketSource`] accepts connections on it from a [`calloop`] event loop and hands
//! every new [`UnixStream`] to its callback.
//!
//! # Example usage
//!
//! ```no_run
//! use reflector::wayland::socket::ListeningSocketSource;
//!
//! let event_loop = calloop::EventLoop::<()>::try_new().unwrap();
//! let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").unwrap();
//!
//! // first free wayland-N name
//! let listening_socket = ListeningSocketSource::new_auto(runtime_dir.as_ref()).unwrap();
//!
//! event_loop
//!     .handle()
//!     .insert_source(listening_socket, |client_stream, _, _| {
//!         // hand the stream over to the display
//!         drop(client_stream);
//!     })
//!     .unwrap();
//! ```

use std::{
    fs::File,
    io,
    os::unix::{
        io::{AsFd, BorrowedFd},
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
};

use calloop::{
    generic::Generic, EventSource, Interest, Mode, Poll, PostAction, Readiness, Token, TokenFactory,
};
use rustix::fs::{flock, FlockOperation};
use tracing::{debug, info, warn};

/// Errors while creating the listening socket
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Another server holds the lock of this socket name
    #[error("socket name {0} is already in use")]
    AlreadyInUse(String),
    /// Every automatic socket name is taken
    #[error("no free socket name in the runtime directory")]
    NoFreeName,
    /// The lock file could not be created or locked
    #[error("could not lock the socket: {0}")]
    Lock(#[source] io::Error),
    /// The socket could not be bound
    #[error("could not bind the socket: {0}")]
    Io(#[source] io::Error),
}

/// A bound listening socket and its lock
///
/// Dropping it removes both the socket and the lock file.
#[derive(Debug)]
pub struct ListeningSocket {
    listener: UnixListener,
    _lock: File,
    socket_path: PathBuf,
    lock_path: PathBuf,
    name: String,
}

impl ListeningSocket {
    /// Bind `<runtime_dir>/<name>`
    pub fn bind(runtime_dir: &Path, name: &str) -> Result<ListeningSocket, SocketError> {
        let socket_path = runtime_dir.join(name);
        let lock_path = runtime_dir.join(format!("{}.lock", name));

        let lock = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(SocketError::Lock)?;
        if let Err(err) = flock(&lock, FlockOperation::NonBlockingLockExclusive) {
            if err == rustix::io::Errno::WOULDBLOCK {
                return Err(SocketError::AlreadyInUse(name.to_owned()));
            }
            return Err(SocketError::Lock(err.into()));
        }

        // We hold the lock, a leftover socket belongs to a dead server
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = ?socket_path, "Removed stale socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(SocketError::Io(err)),
        }

        let listener = UnixListener::bind(&socket_path).map_err(SocketError::Io)?;
        listener.set_nonblocking(true).map_err(SocketError::Io)?;

        Ok(ListeningSocket {
            listener,
            _lock: lock,
            socket_path,
            lock_path,
            name: name.to_owned(),
        })
    }

    /// Bind the first free `wayland-N` name for N in 1..=32
    pub fn bind_auto(runtime_dir: &Path) -> Result<ListeningSocket, SocketError> {
        // wayland-0 is skipped, clients connecting without WAYLAND_DISPLAY would end up here
        for n in 1..33 {
            match Self::bind(runtime_dir, &format!("wayland-{}", n)) {
                Ok(socket) => return Ok(socket),
                Err(SocketError::AlreadyInUse(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(SocketError::NoFreeName)
    }

    /// Accept a pending connection, if any
    pub fn accept(&self) -> io::Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(stream)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The name of the socket within the runtime directory
    pub fn socket_name(&self) -> &str {
        &self.name
    }

    /// The full path of the socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl AsFd for ListeningSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

impl Drop for ListeningSocket {
    fn drop(&mut self) {
        for path in [&self.socket_path, &self.lock_path] {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = ?path, "Failed to remove socket file: {}", err);
            }
        }
    }
}

/// Event source yielding a stream per connecting client
#[derive(Debug)]
pub struct ListeningSocketSource {
    socket: Generic<ListeningSocket>,
}

impl ListeningSocketSource {
    /// Listen on the first free `wayland-N` name
    pub fn new_auto(runtime_dir: &Path) -> Result<ListeningSocketSource, SocketError> {
        let socket = ListeningSocket::bind_auto(runtime_dir)?;
        info!(name = ?socket.socket_path(), "Created new socket");

        Ok(ListeningSocketSource {
            socket: Generic::new(socket, Interest::READ, Mode::Level),
        })
    }

    /// Listen on `name`, failing if another server holds it
    pub fn with_name(runtime_dir: &Path, name: &str) -> Result<ListeningSocketSource, SocketError> {
        let socket = ListeningSocket::bind(runtime_dir, name)?;
        info!(name = ?socket.socket_path(), "Created new socket");

        Ok(ListeningSocketSource {
            socket: Generic::new(socket, Interest::READ, Mode::Level),
        })
    }

    /// Name of the socket, as clients expect it in `WAYLAND_DISPLAY`
    pub fn socket_name(&self) -> &str {
        self.socket.get_ref().socket_name()
    }

    /// Full path of the socket
    pub fn socket_path(&self) -> &Path {
        self.socket.get_ref().socket_path()
    }
}

impl EventSource for ListeningSocketSource {
    type Event = UnixStream;
    type Metadata = ();
    type Ret = ();
    type Error = io::Error;

    fn process_events<F>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: F,
    ) -> io::Result<PostAction>
    where
        F: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        self.socket.process_events(readiness, token, |_, socket| {
            while let Some(client) = socket.accept()? {
                debug!(socket = socket.socket_name(), client = ?client, "New client connected");
                callback(client, &mut ());
            }

            Ok(PostAction::Continue)
        })
    }

    fn register(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.socket.register(poll, token_factory)
    }

    fn reregister(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.socket.reregister(poll, token_factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.socket.unregister(poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_names_skip_locked_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let first = ListeningSocket::bind_auto(dir.path()).unwrap();
        let second = ListeningSocket::bind_auto(dir.path()).unwrap();
        assert_eq!(first.socket_name(), "wayland-1");
        assert_eq!(second.socket_name(), "wayland-2");
    }

    #[test]
    fn explicit_name_in_use_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let _held = ListeningSocket::bind(dir.path(), "reflector-test").unwrap();
        assert!(matches!(
            ListeningSocket::bind(dir.path(), "reflector-test"),
            Err(SocketError::AlreadyInUse(_))
        ));
    }

    #[test]
    fn drop_removes_socket_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let socket = ListeningSocket::bind(dir.path(), "wayland-9").unwrap();
        let path = socket.socket_path().to_owned();
        assert!(path.exists());
        assert!(dir.path().join("wayland-9.lock").exists());
        drop(socket);
        assert!(!path.exists());
        assert!(!dir.path().join("wayland-9.lock").exists());
    }

    #[test]
    fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let stale = UnixListener::bind(dir.path().join("wayland-3")).unwrap();
        drop(stale);
        let socket = ListeningSocket::bind(dir.path(), "wayland-3").unwrap();
        assert!(UnixStream::connect(socket.socket_path()).is_ok());
        assert!(socket.accept().unwrap().is_some());
    }
}
