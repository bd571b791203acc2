//! Server configuration

use std::{env, ffi::OsString, path::PathBuf, time::Duration};

use crate::utils::Size;

/// Environment variable naming the directory the display socket is created in
pub const RUNTIME_DIR_VAR: &str = "XDG_RUNTIME_DIR";
/// Environment variable overriding the display socket name
pub const SOCKET_NAME_VAR: &str = "REFLECTOR_SOCKET";

/// Configuration of a display server
///
/// ```
/// use std::time::Duration;
/// use reflector::ServerConfig;
///
/// let config = ServerConfig::from_env()
///     .with_socket_name("wayland-test")
///     .with_window_size((640, 480))
///     .with_ping_interval(Duration::from_secs(5));
/// assert_eq!(config.socket_name.as_deref(), Some("wayland-test"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory of the display socket, `$XDG_RUNTIME_DIR` when unset
    pub runtime_dir: Option<PathBuf>,
    /// Name of the display socket, the first free `wayland-N` when unset
    pub socket_name: Option<String>,
    /// Size suggested to new windows, `0x0` letting clients decide
    pub window_size: Size,
    /// Size of the (single, virtual) output, used by maximized and fullscreen windows
    pub output_size: Size,
    /// Interval of the `xdg_wm_base` keep-alive pings, disabled when unset
    pub ping_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            runtime_dir: None,
            socket_name: None,
            window_size: Size::new(800, 600),
            output_size: Size::new(1920, 1080),
            ping_interval: None,
        }
    }
}

impl ServerConfig {
    /// The default configuration, with the runtime directory and socket name read from
    /// the environment
    pub fn from_env() -> Self {
        ServerConfig {
            runtime_dir: runtime_dir_from(env::var_os(RUNTIME_DIR_VAR)),
            socket_name: env::var(SOCKET_NAME_VAR).ok().filter(|name| !name.is_empty()),
            ..ServerConfig::default()
        }
    }

    /// Use `dir` for the display socket
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Use a fixed socket name
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    /// Suggest `size` to new windows
    pub fn with_window_size(mut self, size: impl Into<Size>) -> Self {
        self.window_size = size.into();
        self
    }

    /// Set the output size
    pub fn with_output_size(mut self, size: impl Into<Size>) -> Self {
        self.output_size = size.into();
        self
    }

    /// Ping clients every `interval`
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// The directory the socket is created in
    ///
    /// Falls back to `$XDG_RUNTIME_DIR` if none was configured. An empty path counts as
    /// unset, it would put the socket in the working directory.
    pub fn runtime_dir(&self) -> Option<PathBuf> {
        self.runtime_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
            .or_else(|| runtime_dir_from(env::var_os(RUNTIME_DIR_VAR)))
    }
}

fn runtime_dir_from(value: Option<OsString>) -> Option<PathBuf> {
    value.filter(|dir| !dir.is_empty()).map(PathBuf::from)
}
