//! Field Store: the velocity, pressure and divergence planes of one grid.

use crate::backend::{PassBackend, Texel};
use crate::error::FluidError;
use crate::grid::GridSize;

/// Pair of same-shaped buffers with alternating read/write roles.
///
/// The front buffer is the field's public texture. [`DoubleBuffer::swap`]
/// flips the roles and hands out the new back buffer as the read source and
/// the new front buffer as the write target of the pass about to run.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    buffers: [T; 2],
    front: usize,
}

/// Bindings for a pass that rewrites a double-buffered field.
pub struct Swap<'a, T> {
    pub read: &'a T,
    pub write: &'a T,
}

impl<T> DoubleBuffer<T> {
    pub fn new(front: T, back: T) -> Self {
        Self {
            buffers: [front, back],
            front: 0,
        }
    }

    pub fn front(&self) -> &T {
        &self.buffers[self.front]
    }

    pub fn back(&self) -> &T {
        &self.buffers[self.front ^ 1]
    }

    /// Slot (0 or 1) of the buffer currently in front.
    pub fn front_index(&self) -> usize {
        self.front
    }

    pub fn swap(&mut self) -> Swap<'_, T> {
        self.front ^= 1;
        Swap {
            read: &self.buffers[self.front ^ 1],
            write: &self.buffers[self.front],
        }
    }

    pub fn into_buffers(self) -> [T; 2] {
        self.buffers
    }
}

/// The three fields of one simulation, all sized to the same grid.
#[derive(Debug)]
pub struct FieldSet<T> {
    pub velocity: DoubleBuffer<T>,
    pub pressure: DoubleBuffer<T>,
    /// Written in full and read immediately after; never swapped.
    pub divergence: T,
}

const FIELD_LABELS: [&str; 5] = [
    "velocity_a",
    "velocity_b",
    "pressure_a",
    "pressure_b",
    "divergence",
];

/// Owns the current [`FieldSet`] and replaces it wholesale on resize.
#[derive(Debug)]
pub struct FieldStore<T> {
    fields: Option<FieldSet<T>>,
    grid: Option<GridSize>,
}

impl<T> Default for FieldStore<T> {
    fn default() -> Self {
        Self {
            fields: None,
            grid: None,
        }
    }
}

impl<T> FieldStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every field with fresh zeroed planes sized to `grid`.
    ///
    /// The previous set is released first. If any plane fails to allocate,
    /// the planes created so far are released and the store is left empty
    /// until the next successful call.
    pub fn allocate<B>(&mut self, backend: &mut B, grid: GridSize) -> Result<(), FluidError>
    where
        B: PassBackend<Texture = T>,
    {
        self.release(backend);

        let mut created = Vec::with_capacity(FIELD_LABELS.len());
        for label in FIELD_LABELS {
            match backend.create_texture(label, grid) {
                Ok(texture) => created.push(texture),
                Err(err) => {
                    log::warn!(
                        "field allocation for {}x{} failed at {label}: {err}",
                        grid.width(),
                        grid.height()
                    );
                    for texture in created {
                        backend.release_texture(texture);
                    }
                    return Err(err);
                }
            }
        }

        let mut planes = created.into_iter();
        let (Some(va), Some(vb), Some(pa), Some(pb), Some(div)) = (
            planes.next(),
            planes.next(),
            planes.next(),
            planes.next(),
            planes.next(),
        ) else {
            return Err(FluidError::ShapeMismatch {
                expected: FIELD_LABELS.len(),
                actual: 0,
            });
        };
        self.fields = Some(FieldSet {
            velocity: DoubleBuffer::new(va, vb),
            pressure: DoubleBuffer::new(pa, pb),
            divergence: div,
        });
        self.grid = Some(grid);
        log::info!("allocated fields for {}x{} grid", grid.width(), grid.height());
        Ok(())
    }

    pub fn release<B>(&mut self, backend: &mut B)
    where
        B: PassBackend<Texture = T>,
    {
        self.grid = None;
        if let Some(fields) = self.fields.take() {
            let [va, vb] = fields.velocity.into_buffers();
            let [pa, pb] = fields.pressure.into_buffers();
            for texture in [va, vb, pa, pb, fields.divergence] {
                backend.release_texture(texture);
            }
        }
    }

    /// Zeroes every plane without reallocating.
    pub fn clear<B>(&self, backend: &mut B)
    where
        B: PassBackend<Texture = T>,
    {
        if let Some(fields) = &self.fields {
            for texture in [
                fields.velocity.front(),
                fields.velocity.back(),
                fields.pressure.front(),
                fields.pressure.back(),
                &fields.divergence,
            ] {
                backend.clear_texture(texture);
            }
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.fields.is_some()
    }

    pub fn grid(&self) -> Option<GridSize> {
        self.grid
    }

    pub fn fields(&self) -> Option<&FieldSet<T>> {
        self.fields.as_ref()
    }

    pub fn fields_mut(&mut self) -> Option<&mut FieldSet<T>> {
        self.fields.as_mut()
    }
}

/// Number of texels holding a NaN or infinite component.
pub fn count_non_finite(texels: &[Texel]) -> usize {
    texels
        .iter()
        .filter(|t| !t[0].is_finite() || !t[1].is_finite())
        .count()
}
