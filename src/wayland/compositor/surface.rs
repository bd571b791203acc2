use std::{cell::RefCell, rc::Rc};

use tracing::{debug, trace};

use super::{RegionAttributes, SurfaceId};
use crate::{
    utils::Rectangle,
    wayland::{
        compositor::Region,
        display::Callback,
        interfaces::{Interface, WL_SURFACE},
        resource::{DispatchContext, ProtocolError, Request, Resource},
        shm::{Buffer, ShmBuffer},
        wire::ObjectId,
    },
};

/// `wl_surface` error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum SurfaceError {
    InvalidScale = 0,
    InvalidTransform = 1,
    InvalidOffset = 3,
}

/// Description of which part of a surface
/// should be considered damaged and needs to be redrawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Damage {
    /// A rectangle containing the damaged zone, in surface coordinates
    Surface(Rectangle),
    /// A rectangle containing the damaged zone, in buffer coordinates
    ///
    /// Note: Buffer scaling must be taken into consideration
    Buffer(Rectangle),
}

/// Transform under which the contents of a buffer are to be interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transform {
    /// Identity
    #[default]
    Normal,
    /// Rotated by 90 degrees counter-clockwise
    _90,
    /// Rotated by 180 degrees
    _180,
    /// Rotated by 270 degrees counter-clockwise
    _270,
    /// Flipped around the vertical axis
    Flipped,
    /// Flipped, then rotated by 90 degrees
    Flipped90,
    /// Flipped, then rotated by 180 degrees
    Flipped180,
    /// Flipped, then rotated by 270 degrees
    Flipped270,
}

impl Transform {
    /// Decode a `wl_output.transform` value
    pub fn from_wire(value: i32) -> Option<Transform> {
        Some(match value {
            0 => Transform::Normal,
            1 => Transform::_90,
            2 => Transform::_180,
            3 => Transform::_270,
            4 => Transform::Flipped,
            5 => Transform::Flipped90,
            6 => Transform::Flipped180,
            7 => Transform::Flipped270,
            _ => return None,
        })
    }
}

/// New buffer assignation for a surface
#[derive(Debug, Clone)]
pub enum BufferAssignment {
    /// The surface no longer has a buffer attached to it
    Removed,
    /// A new buffer has been attached
    NewBuffer {
        /// the `wl_buffer` object
        id: ObjectId,
        /// its contents
        buffer: Buffer,
    },
}

/// Committed state of a surface
///
/// This is what the compositing stage sees; it only ever changes as a whole, on commit.
#[derive(Debug, Clone)]
pub struct SurfaceAttributes {
    /// Buffer defining the contents of the surface
    pub buffer: Option<Buffer>,
    /// Scale of the contents of the buffer, for higher-resolution contents.
    pub buffer_scale: i32,
    /// Transform under which interpret the contents of the buffer
    pub buffer_transform: Transform,
    /// Region of the surface that is guaranteed to be opaque
    ///
    /// By default the whole surface is potentially transparent
    pub opaque_region: Option<RegionAttributes>,
    /// Region of the surface that is sensitive to user input
    ///
    /// By default the whole surface should be sensitive
    pub input_region: Option<RegionAttributes>,
    /// Damage accumulated by the last commit, in request order
    pub damage: Vec<Damage>,
    /// Window geometry set through the shell, if any
    pub window_geometry: Option<Rectangle>,
}

impl Default for SurfaceAttributes {
    fn default() -> SurfaceAttributes {
        SurfaceAttributes {
            buffer: None,
            buffer_scale: 1,
            buffer_transform: Transform::Normal,
            opaque_region: None,
            input_region: None,
            damage: Vec::new(),
            window_geometry: None,
        }
    }
}

#[derive(Debug, Default)]
struct PendingState {
    buffer: Option<BufferAssignment>,
    buffer_scale: Option<i32>,
    buffer_transform: Option<Transform>,
    opaque_region: Option<Option<RegionAttributes>>,
    input_region: Option<Option<RegionAttributes>>,
    damage: Vec<Damage>,
    window_geometry: Option<Rectangle>,
    frame_callbacks: Vec<ObjectId>,
}

/// State of a surface, shared with the role objects built on it
#[derive(Debug)]
pub(crate) struct SurfaceData {
    id: SurfaceId,
    role: Option<&'static str>,
    role_object: bool,
    mapped: bool,
    alive: bool,
    pending: PendingState,
    current: SurfaceAttributes,
    current_buffer: Option<ObjectId>,
    frame_callbacks: Vec<ObjectId>,
}

pub(crate) type SurfaceRef = Rc<RefCell<SurfaceData>>;

#[derive(Debug, Default)]
struct CommitOutcome {
    replaced: Option<(ObjectId, Buffer)>,
}

impl SurfaceData {
    fn new(id: SurfaceId) -> Self {
        SurfaceData {
            id,
            role: None,
            role_object: false,
            mapped: false,
            alive: true,
            pending: PendingState::default(),
            current: SurfaceAttributes::default(),
            current_buffer: None,
            frame_callbacks: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> SurfaceId {
        self.id
    }

    pub(crate) fn role(&self) -> Option<&'static str> {
        self.role
    }

    /// Give the surface a role object
    ///
    /// A surface keeps its role for its whole life; it may get a new object of the same
    /// role once the previous one is gone. Returns the conflicting role otherwise.
    pub(crate) fn assign_role(&mut self, role: &'static str) -> Result<(), &'static str> {
        match self.role {
            Some(existing) if existing != role || self.role_object => Err(existing),
            _ => {
                self.role = Some(role);
                self.role_object = true;
                Ok(())
            }
        }
    }

    /// The role object is gone, the surface is no longer displayed
    pub(crate) fn release_role(&mut self) {
        self.role_object = false;
        self.mapped = false;
    }

    pub(crate) fn set_mapped(&mut self, mapped: bool) {
        self.mapped = mapped && self.alive && self.role_object;
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn set_window_geometry(&mut self, geometry: Rectangle) {
        self.pending.window_geometry = Some(geometry);
    }

    pub(crate) fn current(&self) -> &SurfaceAttributes {
        &self.current
    }

    fn commit(&mut self) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        let pending = std::mem::take(&mut self.pending);

        if let Some(assignment) = pending.buffer {
            let previous = self.current_buffer.take().zip(self.current.buffer.take());
            match assignment {
                BufferAssignment::Removed => outcome.replaced = previous,
                BufferAssignment::NewBuffer { id, buffer } => {
                    outcome.replaced = previous.filter(|(_, old)| !old.ptr_eq(&buffer));
                    self.current_buffer = Some(id);
                    self.current.buffer = Some(buffer);
                }
            }
        }
        if let Some(scale) = pending.buffer_scale {
            self.current.buffer_scale = scale;
        }
        if let Some(transform) = pending.buffer_transform {
            self.current.buffer_transform = transform;
        }
        if let Some(region) = pending.opaque_region {
            self.current.opaque_region = region;
        }
        if let Some(region) = pending.input_region {
            self.current.input_region = region;
        }
        if let Some(geometry) = pending.window_geometry {
            self.current.window_geometry = Some(geometry);
        }
        self.current.damage = pending.damage;
        self.frame_callbacks.extend(pending.frame_callbacks);
        outcome
    }
}

/// A `wl_surface` object
#[derive(Debug)]
pub struct Surface {
    data: SurfaceRef,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId) -> Self {
        Surface {
            data: Rc::new(RefCell::new(SurfaceData::new(id))),
        }
    }

    pub(crate) fn data(&self) -> SurfaceRef {
        self.data.clone()
    }

    /// The id of this surface
    pub fn id(&self) -> SurfaceId {
        self.data.borrow().id
    }

    /// Whether commits of this surface are currently visible
    pub fn is_mapped(&self) -> bool {
        self.data.borrow().mapped
    }

    /// Access the committed state
    pub fn with_state<T>(&self, f: impl FnOnce(&SurfaceAttributes) -> T) -> T {
        f(&self.data.borrow().current)
    }

    fn region_arg(ctx: &DispatchContext<'_>, id: Option<ObjectId>) -> Result<Option<RegionAttributes>, ProtocolError> {
        match id {
            None => Ok(None),
            Some(id) => ctx
                .get::<Region>(id)
                .map(|region| Some(region.attributes().clone()))
                .ok_or_else(|| ProtocolError::invalid_object(id)),
        }
    }

    fn commit(&mut self, ctx: &mut DispatchContext<'_>) {
        let outcome = self.data.borrow_mut().commit();

        if let Some((id, old)) = outcome.replaced {
            // the client may have destroyed the buffer, or reused its id
            if ctx.get::<ShmBuffer>(id).map_or(false, |b| b.buffer().ptr_eq(&old)) {
                ctx.send(ShmBuffer::release_event(id));
            }
        }

        let data = self.data.borrow();
        if !data.mapped {
            trace!(surface = %data.id, role = ?data.role, "Commit buffered until configured");
            return;
        }
        ctx.server.compositor.commit(data.id, &data.current);
        drop(data);

        let callbacks = std::mem::take(&mut self.data.borrow_mut().frame_callbacks);
        let time = ctx.server.elapsed_ms();
        for callback in callbacks {
            Callback::done(ctx, callback, time);
        }
    }
}

impl Resource for Surface {
    fn interface(&self) -> &'static Interface {
        &WL_SURFACE
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        match request.opcode {
            // destroy
            0 => {}
            // attach
            1 => {
                let buffer = request.optional_object()?;
                let (x, y) = (request.int()?, request.int()?);
                if (x, y) != (0, 0) {
                    return Err(ProtocolError::new(
                        this,
                        SurfaceError::InvalidOffset as u32,
                        format!("buffer offset ({}, {}) must be (0, 0)", x, y),
                    ));
                }
                let assignment = match buffer {
                    None => BufferAssignment::Removed,
                    Some(id) => {
                        let buffer = ctx
                            .get::<ShmBuffer>(id)
                            .ok_or_else(|| ProtocolError::invalid_object(id))?
                            .buffer()
                            .clone();
                        BufferAssignment::NewBuffer { id, buffer }
                    }
                };
                self.data.borrow_mut().pending.buffer = Some(assignment);
            }
            // damage, damage_buffer
            2 | 9 => {
                let rect = Rectangle::new(request.int()?, request.int()?, request.int()?, request.int()?);
                let damage = if request.opcode == 2 {
                    Damage::Surface(rect)
                } else {
                    Damage::Buffer(rect)
                };
                self.data.borrow_mut().pending.damage.push(damage);
            }
            // frame
            3 => {
                let callback = request.new_id()?;
                ctx.insert(callback, 1, Callback)?;
                self.data.borrow_mut().pending.frame_callbacks.push(callback);
            }
            // set_opaque_region
            4 => {
                let region = Self::region_arg(ctx, request.optional_object()?)?;
                self.data.borrow_mut().pending.opaque_region = Some(region);
            }
            // set_input_region
            5 => {
                let region = Self::region_arg(ctx, request.optional_object()?)?;
                self.data.borrow_mut().pending.input_region = Some(region);
            }
            // commit
            6 => self.commit(ctx),
            // set_buffer_transform
            7 => {
                let value = request.int()?;
                let transform = Transform::from_wire(value).ok_or_else(|| {
                    ProtocolError::new(
                        this,
                        SurfaceError::InvalidTransform as u32,
                        format!("invalid transform {}", value),
                    )
                })?;
                self.data.borrow_mut().pending.buffer_transform = Some(transform);
            }
            // set_buffer_scale
            8 => {
                let scale = request.int()?;
                if scale < 1 {
                    return Err(ProtocolError::new(
                        this,
                        SurfaceError::InvalidScale as u32,
                        format!("invalid scale {}", scale),
                    ));
                }
                self.data.borrow_mut().pending.buffer_scale = Some(scale);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn destroyed(&mut self, ctx: &mut DispatchContext<'_>, _this: ObjectId) {
        let id = {
            let mut data = self.data.borrow_mut();
            data.alive = false;
            data.mapped = false;
            data.id
        };
        debug!(surface = %id, "Surface destroyed");
        ctx.server.compositor.destroyed(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wayland::client::ClientId;

    fn surface_data() -> SurfaceData {
        SurfaceData::new(SurfaceId {
            client: ClientId(1),
            object: ObjectId::new(3),
        })
    }

    #[test]
    fn commit_moves_pending_state() {
        let mut data = surface_data();
        data.pending.damage.push(Damage::Surface(Rectangle::new(0, 0, 4, 4)));
        data.pending.damage.push(Damage::Surface(Rectangle::new(0, 0, 4, 4)));
        data.pending.buffer_scale = Some(2);
        data.commit();
        assert_eq!(data.current.damage.len(), 2);
        assert_eq!(data.current.buffer_scale, 2);

        // pending damage is cleared, the rest of the committed state stays
        data.commit();
        assert!(data.current.damage.is_empty());
        assert_eq!(data.current.buffer_scale, 2);
    }

    #[test]
    fn roles_are_exclusive() {
        let mut data = surface_data();
        assert!(data.assign_role("xdg_surface").is_ok());
        assert_eq!(data.assign_role("xdg_surface"), Err("xdg_surface"));
        assert_eq!(data.assign_role("wl_shell_surface"), Err("xdg_surface"));
        data.release_role();
        assert!(data.assign_role("xdg_surface").is_ok());
        assert_eq!(data.role(), Some("xdg_surface"));
    }

    #[test]
    fn mapping_needs_a_live_role_object() {
        let mut data = surface_data();
        data.set_mapped(true);
        assert!(!data.is_mapped());
        data.assign_role("xdg_surface").unwrap();
        data.set_mapped(true);
        assert!(data.is_mapped());
        data.release_role();
        assert!(!data.is_mapped());
    }

    #[test]
    fn transforms_are_bounded() {
        assert_eq!(Transform::from_wire(0), Some(Transform::Normal));
        assert_eq!(Transform::from_wire(7), Some(Transform::Flipped270));
        assert_eq!(Transform::from_wire(8), None);
        assert_eq!(Transform::from_wire(-1), None);
    }
}
