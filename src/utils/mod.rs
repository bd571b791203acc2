//! Various utilities functions and types

mod geometry;
mod serial;

pub use self::geometry::{Rectangle, Size};
pub use self::serial::{Serial, SerialCounter};
