/// A two-dimensional size, in surface-local pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    /// horizontal extent
    pub w: i32,
    /// vertical extent
    pub h: i32,
}

impl Size {
    /// Create a new size
    pub const fn new(w: i32, h: i32) -> Self {
        Size { w, h }
    }

    /// Whether both dimensions are zero, which the shell protocols read as "client decides"
    pub fn is_empty(&self) -> bool {
        self.w == 0 && self.h == 0
    }
}

impl From<(i32, i32)> for Size {
    fn from((w, h): (i32, i32)) -> Self {
        Size { w, h }
    }
}

/// A rectangle defined by its top-left corner and dimensions
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// horizontal position of the top-left corner of the rectangle, in surface coordinates
    pub x: i32,
    /// vertical position of the top-left corner of the rectangle, in surface coordinates
    pub y: i32,
    /// width of the rectangle
    pub width: i32,
    /// height of the rectangle
    pub height: i32,
}

impl Rectangle {
    /// Create a new rectangle from its location and extent
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rectangle { x, y, width, height }
    }

    /// The extent of this rectangle
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Right edge, excluded from the rectangle
    ///
    /// Clamped to `i32::MAX`, client provided rectangles may reach past it.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge, excluded from the rectangle
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Checks whether given point is inside a rectangle
    pub fn contains(&self, point: (i32, i32)) -> bool {
        let (x, y) = point;
        (x >= self.x) && (x < self.right()) && (y >= self.y) && (y < self.bottom())
    }

    /// Checks whether a given rectangle overlaps with this one
    pub fn overlaps(&self, other: &Rectangle) -> bool {
        !(self.right() <= other.x
            || self.x >= other.right()
            || self.bottom() <= other.y
            || self.y >= other.bottom())
    }
}
