use crate::error::FluidError;

/// Smallest edge length that still leaves one interior cell between the
/// boundary strips.
pub const MIN_GRID_DIM: u32 = 3;

/// Texel dimensions of every simulation field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    width: u32,
    height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> Result<Self, FluidError> {
        if width == 0 || height == 0 {
            return Err(FluidError::InvalidGrid {
                width,
                height,
                reason: "dimensions must be positive",
            });
        }
        if width < MIN_GRID_DIM || height < MIN_GRID_DIM {
            return Err(FluidError::InvalidGrid {
                width,
                height,
                reason: "grid has no interior cells",
            });
        }
        Ok(Self { width, height })
    }

    /// Grid for a viewport, scaled so the longer side spans `resolution` cells.
    /// Fractional cells are truncated.
    pub fn from_viewport(
        viewport_width: u32,
        viewport_height: u32,
        resolution: u32,
    ) -> Result<Self, FluidError> {
        let longest = viewport_width.max(viewport_height);
        if viewport_width == 0 || viewport_height == 0 || resolution == 0 {
            return Err(FluidError::InvalidGrid {
                width: viewport_width,
                height: viewport_height,
                reason: "viewport and resolution must be positive",
            });
        }
        let scale = resolution as f64 / longest as f64;
        let width = (viewport_width as f64 * scale) as u32;
        let height = (viewport_height as f64 * scale) as u32;
        Self::new(width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y as usize * self.width as usize + x as usize
    }

    /// Number of cells in the edge strip.
    pub fn boundary_len(&self) -> usize {
        2 * self.width as usize + 2 * (self.height as usize - 2)
    }

    /// Edge cell `k` of the strip: bottom row, top row, left column, right
    /// column. Kernels enumerate the strip in the same order.
    pub fn boundary_cell(&self, k: usize) -> (u32, u32) {
        let w = self.width as usize;
        let h = self.height as usize;
        debug_assert!(k < self.boundary_len());
        if k < w {
            (k as u32, 0)
        } else if k < 2 * w {
            ((k - w) as u32, self.height - 1)
        } else {
            let side = k - 2 * w;
            if side < h - 2 {
                (0, (side + 1) as u32)
            } else {
                (self.width - 1, (side - (h - 2) + 1) as u32)
            }
        }
    }

    /// Nearest interior cell to an edge cell; the diagonal one for corners.
    pub fn inward_neighbor(&self, x: u32, y: u32) -> (u32, u32) {
        (x.clamp(1, self.width - 2), y.clamp(1, self.height - 2))
    }

    /// Cells a pass over `region` touches, in kernel order.
    pub fn region_cells(&self, region: Region) -> Box<dyn Iterator<Item = (u32, u32)> + '_> {
        match region {
            Region::Interior => Box::new(
                (1..self.height - 1).flat_map(move |y| (1..self.width - 1).map(move |x| (x, y))),
            ),
            Region::Boundary => Box::new((0..self.boundary_len()).map(move |k| self.boundary_cell(k))),
            Region::Closure => {
                Box::new((0..self.height).flat_map(move |y| (0..self.width).map(move |x| (x, y))))
            }
        }
    }
}

/// Geometry a pass is rasterized over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    /// Domain inset by one cell on every side.
    Interior,
    /// The one-cell edge strip only.
    Boundary,
    /// The full unit quad.
    Closure,
}

/// Finite-difference constants derived from the grid dimensions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridConstants {
    pub width: u32,
    pub height: u32,
    /// Texel step in normalized coordinates along x.
    pub pixel_x: f32,
    pub pixel_y: f32,
    /// Resolution-independent discretization scale, `sqrt(width * height)`.
    pub grid_scale: f32,
    pub aspect_ratio: f32,
}

impl GridConstants {
    pub fn new(width: u32, height: u32) -> Self {
        debug_assert!(width > 0 && height > 0);
        Self {
            width,
            height,
            pixel_x: 1.0 / width as f32,
            pixel_y: 1.0 / height as f32,
            grid_scale: (width as f32 * height as f32).sqrt(),
            aspect_ratio: width as f32 / height as f32,
        }
    }
}

impl From<GridSize> for GridConstants {
    fn from(grid: GridSize) -> Self {
        Self::new(grid.width, grid.height)
    }
}
