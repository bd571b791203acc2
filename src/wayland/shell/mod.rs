//! Handler utilities for the various shell protocols
//!
//! Wayland, via its different protocol extensions, supports different kind of
//! shells. Here a shell represent the logic associated to displaying windows and
//! arranging them on the screen.
//!
//! Two of them are provided:
//!
//! - The [`xdg`] module provides handlers for the stable `xdg_shell` protocol, which is
//!   the current standard for desktop apps
//! - The [`legacy`] module provides handlers for the deprecated `wl_shell` protocol
//!
//! Both share the configure handshake modeled by [`ConfigureTracker`]: the server proposes a
//! configuration tagged with a serial, and the surface only becomes visible once the client
//! acknowledges the newest one.

use thiserror::Error;

use crate::utils::Serial;

pub mod legacy;
pub mod xdg;

/// Represents the possible errors returned from
/// a surface ping
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PingError {
    /// There is already a pending ping
    #[error("there is already a ping pending `{0:?}`")]
    PingAlreadyPending(Serial),
}

/// Phase of the configure handshake of a role object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurePhase {
    /// No configure was sent yet
    Unconfigured,
    /// A configure was sent and awaits its acknowledgement
    Configuring,
    /// The client acknowledged a configure, commits are visible
    Configured,
    /// The role object is closed, no further handshake is possible
    Closed,
}

/// Errors of the configure handshake
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ConfigureError {
    /// The client acknowledged a configure that was never sent
    #[error("no configure was sent, cannot acknowledge serial {0}")]
    NothingSent(Serial),
    /// The client acknowledged something else than the newest configure
    #[error("serial {acked} does not match the last configure serial {expected}")]
    Mismatch {
        /// the serial sent by the client
        acked: Serial,
        /// the serial of the newest configure
        expected: Serial,
    },
    /// The role object is closed
    #[error("the surface is closed")]
    Closed,
    /// A configure serial was not newer than the previous one
    #[error("configure serial {0} is not newer than the previous one")]
    NotIncreasing(Serial),
}

/// Tracks the configure handshake of a role object
///
/// Only the serial of the newest configure may be acknowledged; acknowledging it again is
/// harmless.
#[derive(Debug, Clone)]
pub struct ConfigureTracker {
    phase: ConfigurePhase,
    last_sent: Option<Serial>,
    last_acked: Option<Serial>,
}

impl Default for ConfigureTracker {
    fn default() -> Self {
        ConfigureTracker {
            phase: ConfigurePhase::Unconfigured,
            last_sent: None,
            last_acked: None,
        }
    }
}

impl ConfigureTracker {
    /// A tracker in the `Unconfigured` phase
    pub fn new() -> Self {
        Self::default()
    }

    /// The current phase
    pub fn phase(&self) -> ConfigurePhase {
        self.phase
    }

    /// Serial of the newest configure
    pub fn last_sent(&self) -> Option<Serial> {
        self.last_sent
    }

    /// Serial of the newest acknowledged configure
    pub fn last_acked(&self) -> Option<Serial> {
        self.last_acked
    }

    /// Record that a configure with `serial` is being sent
    pub fn send(&mut self, serial: Serial) -> Result<(), ConfigureError> {
        if self.phase == ConfigurePhase::Closed {
            return Err(ConfigureError::Closed);
        }
        if let Some(last) = self.last_sent {
            if serial <= last {
                return Err(ConfigureError::NotIncreasing(serial));
            }
        }
        self.last_sent = Some(serial);
        if self.phase == ConfigurePhase::Unconfigured {
            self.phase = ConfigurePhase::Configuring;
        }
        Ok(())
    }

    /// Process an acknowledgement
    ///
    /// Returns `true` when this acknowledgement completes the first handshake.
    pub fn ack(&mut self, serial: Serial) -> Result<bool, ConfigureError> {
        let expected = match (self.phase, self.last_sent) {
            (ConfigurePhase::Closed, _) => return Err(ConfigureError::Closed),
            (_, None) => return Err(ConfigureError::NothingSent(serial)),
            (_, Some(expected)) => expected,
        };
        if serial != expected {
            return Err(ConfigureError::Mismatch { acked: serial, expected });
        }
        self.last_acked = Some(serial);
        let first = self.phase == ConfigurePhase::Configuring;
        self.phase = ConfigurePhase::Configured;
        Ok(first)
    }

    /// Enter the terminal `Closed` phase
    pub fn close(&mut self) {
        self.phase = ConfigurePhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SerialCounter;

    #[test]
    fn handshake_walks_the_phases() {
        let mut serials = SerialCounter::new();
        let mut tracker = ConfigureTracker::new();
        assert_eq!(tracker.phase(), ConfigurePhase::Unconfigured);

        let serial = serials.next_serial();
        tracker.send(serial).unwrap();
        assert_eq!(tracker.phase(), ConfigurePhase::Configuring);

        assert_eq!(tracker.ack(serial), Ok(true));
        assert_eq!(tracker.phase(), ConfigurePhase::Configured);
        // acknowledging the same configure again changes nothing
        assert_eq!(tracker.ack(serial), Ok(false));

        tracker.close();
        assert_eq!(tracker.ack(serial), Err(ConfigureError::Closed));
        assert_eq!(tracker.send(serials.next_serial()), Err(ConfigureError::Closed));
    }

    #[test]
    fn only_the_newest_serial_is_accepted() {
        let mut serials = SerialCounter::new();
        let mut tracker = ConfigureTracker::new();
        let first = serials.next_serial();
        let second = serials.next_serial();
        tracker.send(first).unwrap();
        tracker.send(second).unwrap();

        assert_eq!(
            tracker.ack(first),
            Err(ConfigureError::Mismatch {
                acked: first,
                expected: second
            })
        );
        let future = serials.next_serial();
        assert!(tracker.ack(future).is_err());
        assert_eq!(tracker.phase(), ConfigurePhase::Configuring);
        assert_eq!(tracker.ack(second), Ok(true));
    }

    #[test]
    fn ack_without_configure_is_refused() {
        let mut tracker = ConfigureTracker::new();
        assert_eq!(
            tracker.ack(Serial::from(1)),
            Err(ConfigureError::NothingSent(Serial::from(1)))
        );
    }

    #[test]
    fn serials_must_increase() {
        let mut tracker = ConfigureTracker::new();
        tracker.send(Serial::from(5)).unwrap();
        assert_eq!(
            tracker.send(Serial::from(5)),
            Err(ConfigureError::NotIncreasing(Serial::from(5)))
        );
        assert_eq!(
            tracker.send(Serial::from(4)),
            Err(ConfigureError::NotIncreasing(Serial::from(4)))
        );
        assert!(tracker.send(Serial::from(6)).is_ok());
    }
}
