use tracing::trace;

use crate::{
    utils::{Rectangle, Size},
    wayland::{
        interfaces::{Interface, XDG_POSITIONER},
        resource::{DispatchContext, ProtocolError, Request, Resource},
        wire::ObjectId,
    },
};

const ERROR_INVALID_INPUT: u32 = 0;

// xdg_positioner.anchor and gravity both go from none (0) to bottom_right (8)
const MAX_EDGE: u32 = 8;

/// An `xdg_positioner`
///
/// Popups are dismissed as soon as they are created, so the placement rules are only
/// recorded and checked for completeness, never applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct XdgPositioner {
    size: Option<Size>,
    anchor_rect: Option<Rectangle>,
    anchor: u32,
    gravity: u32,
    constraint_adjustment: u32,
    offset: (i32, i32),
}

impl XdgPositioner {
    /// Size of the popup to place
    pub fn size(&self) -> Option<Size> {
        self.size
    }

    /// Rectangle of the parent the popup is anchored to
    pub fn anchor_rect(&self) -> Option<Rectangle> {
        self.anchor_rect
    }

    /// Offset of the popup from its anchor point
    pub fn offset(&self) -> (i32, i32) {
        self.offset
    }

    /// A positioner is complete once both its size and anchor rectangle are set
    pub fn is_complete(&self) -> bool {
        self.size.is_some() && self.anchor_rect.is_some()
    }
}

impl Resource for XdgPositioner {
    fn interface(&self) -> &'static Interface {
        &XDG_POSITIONER
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        match request.opcode {
            // destroy
            0 => {}
            // set_size
            1 => {
                let (width, height) = (request.int()?, request.int()?);
                if width < 1 || height < 1 {
                    return Err(ProtocolError::new(
                        this,
                        ERROR_INVALID_INPUT,
                        "Invalid size for positioner.",
                    ));
                }
                self.size = Some(Size::new(width, height));
            }
            // set_anchor_rect
            2 => {
                let rect = Rectangle::new(request.int()?, request.int()?, request.int()?, request.int()?);
                if rect.width < 1 || rect.height < 1 {
                    return Err(ProtocolError::new(
                        this,
                        ERROR_INVALID_INPUT,
                        "Invalid size for positioner's anchor rectangle.",
                    ));
                }
                self.anchor_rect = Some(rect);
            }
            // set_anchor, set_gravity
            3 | 4 => {
                let edge = request.uint()?;
                if edge <= MAX_EDGE {
                    if request.opcode == 3 {
                        self.anchor = edge;
                    } else {
                        self.gravity = edge;
                    }
                }
            }
            // set_constraint_adjustment
            5 => self.constraint_adjustment = request.uint()? & 0x3f,
            // set_offset
            6 => self.offset = (request.int()?, request.int()?),
            _ => unreachable!(),
        }
        trace!(client = %ctx.client, positioner = %this, positioner_state = ?self, "Positioner updated");
        Ok(())
    }
}
