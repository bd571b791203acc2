use std::{cmp::Ordering, fmt};

/// A serial sent to clients in configure and ping events
///
/// Serials are ordered by their distance on the wrapping `u32` counter: a serial less than
/// half the range ahead of another is newer, so the order survives an overflow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Serial(pub(crate) u32);

impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.0 == other.0 {
            return Some(Ordering::Equal);
        }
        let ahead = self.0.wrapping_sub(other.0);
        Some(if ahead < u32::MAX / 2 {
            Ordering::Greater
        } else {
            Ordering::Less
        })
    }
}

impl From<u32> for Serial {
    fn from(n: u32) -> Self {
        Serial(n)
    }
}

impl From<Serial> for u32 {
    fn from(serial: Serial) -> u32 {
        serial.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Source of the serials of a display
///
/// Every display loop owns exactly one counter, so serials are unique across all the
/// clients of a server. `0` is skipped when the counter wraps.
#[derive(Debug)]
pub struct SerialCounter {
    next: u32,
}

impl Default for SerialCounter {
    fn default() -> Self {
        SerialCounter { next: 1 }
    }
}

impl SerialCounter {
    /// A counter whose first serial is `1`
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next serial
    pub fn next_serial(&mut self) -> Serial {
        let serial = self.next;
        self.next = match serial.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        Serial(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serials_increase() {
        let mut counter = SerialCounter::new();
        let first = counter.next_serial();
        for _ in 0..147 {
            counter.next_serial();
        }
        let later = counter.next_serial();
        assert_eq!(u32::from(first), 1);
        assert!(first < later);
        assert!(later > first);
    }

    #[test]
    fn order_survives_overflow() {
        let mut counter = SerialCounter { next: u32::MAX };
        let last = counter.next_serial();
        let wrapped = counter.next_serial();
        assert_eq!(last, Serial(u32::MAX));
        // zero is never handed out
        assert_eq!(wrapped, Serial(1));
        assert!(last < wrapped);
    }
}
