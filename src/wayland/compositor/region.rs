use crate::{
    utils::Rectangle,
    wayland::{
        interfaces::{Interface, WL_REGION},
        resource::{DispatchContext, ProtocolError, Request, Resource},
    },
};

/// Kind of a rectangle part of a region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RectangleKind {
    /// This rectangle should be added to the region
    Add,
    /// The intersection of this rectangle with the region should
    /// be removed from the region
    Subtract,
}

/// Description of the contents of a region
///
/// A region is defined as an union and difference of rectangle.
///
/// This struct contains an ordered `Vec` containing the rectangles defining
/// a region. They should be added or subtracted in this order to compute the
/// actual contents of the region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionAttributes {
    /// List of rectangle part of this region
    pub rects: Vec<(RectangleKind, Rectangle)>,
}

impl RegionAttributes {
    /// Checks whether given point is inside the region.
    pub fn contains(&self, point: (i32, i32)) -> bool {
        let mut contains = false;
        for (kind, rect) in &self.rects {
            if rect.contains(point) {
                match kind {
                    RectangleKind::Add => contains = true,
                    RectangleKind::Subtract => contains = false,
                }
            }
        }
        contains
    }
}

/// A `wl_region` object
#[derive(Debug, Default)]
pub struct Region {
    attributes: RegionAttributes,
}

impl Region {
    /// The current contents of the region
    pub fn attributes(&self) -> &RegionAttributes {
        &self.attributes
    }
}

impl Resource for Region {
    fn interface(&self) -> &'static Interface {
        &WL_REGION
    }

    fn request(&mut self, _ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let kind = match request.opcode {
            // destroy
            0 => return Ok(()),
            1 => RectangleKind::Add,
            2 => RectangleKind::Subtract,
            _ => unreachable!(),
        };
        let rect = Rectangle::new(request.int()?, request.int()?, request.int()?, request.int()?);
        self.attributes.rects.push((kind, rect));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_contains_any() {
        let region = RegionAttributes {
            rects: vec![(RectangleKind::Add, Rectangle::new(0, 0, 10, 10))],
        };

        assert!(region.contains((0, 0)));
    }

    #[test]
    fn region_doesnt_contain_subtracted() {
        let mut region = RegionAttributes {
            rects: vec![(RectangleKind::Add, Rectangle::new(0, 0, 10, 10))],
        };
        let area = (0, 0);
        region.rects.push((RectangleKind::Subtract, Rectangle::new(0, 0, 5, 5)));

        assert!(!region.contains(area));
    }

    #[test]
    fn region_add_subtracted() {
        let mut region = RegionAttributes {
            rects: vec![(RectangleKind::Add, Rectangle::new(0, 0, 10, 10))],
        };
        region.rects.push((RectangleKind::Subtract, Rectangle::new(0, 0, 5, 5)));
        region.rects.push((RectangleKind::Add, Rectangle::new(2, 2, 2, 2)));

        assert!(region.contains((2, 2)));
        assert!(!region.contains((1, 1)));
    }
}
