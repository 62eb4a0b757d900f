//! Flat fixed-stride surfel attribute storage
//!
//! Surfels live in two parallel arrays matching the wire layout: an attribute
//! array of half-precision words (x, y, z, radius, nx, ny, nz, pad) and an
//! RGBA byte array. Geometry is immutable after construction; colors can be
//! painted and are staged behind a dirty flag until the renderer re-uploads.

use half::f16;

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use super::batch::SurfelBatch;

/// Half-precision words per surfel in the attribute array
pub const SURFEL_WORDS: usize = 8;
/// Bytes per surfel in the color array (RGBA)
pub const COLOR_BYTES: usize = 4;

/// A decoded disk-shaped point primitive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surfel {
    pub position: Vec3,
    pub radius: f32,
    /// Unit length
    pub normal: Vec3,
    pub color: [u8; 3],
}

/// Dense store of surfel attributes, addressed by integer index
#[derive(Clone, Debug, Default)]
pub struct SurfelStore {
    attribs: Vec<u16>,
    colors: Vec<u8>,
    colors_dirty: bool,
}

impl SurfelStore {
    /// Wrap raw attribute and color arrays decoded from a subtree buffer
    pub fn from_raw(attribs: Vec<u16>, colors: Vec<u8>) -> Result<Self> {
        if attribs.len() % SURFEL_WORDS != 0 {
            return Err(Error::MalformedTree(format!(
                "attribute array length {} not a multiple of {}",
                attribs.len(),
                SURFEL_WORDS
            )));
        }
        let count = attribs.len() / SURFEL_WORDS;
        if colors.len() != count * COLOR_BYTES {
            return Err(Error::MalformedTree(format!(
                "color array holds {} surfels, attribute array {}",
                colors.len() / COLOR_BYTES,
                count
            )));
        }
        Ok(Self {
            attribs,
            colors,
            colors_dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.attribs.len() / SURFEL_WORDS
    }

    pub fn is_empty(&self) -> bool {
        self.attribs.is_empty()
    }

    /// Append a surfel, encoding attributes to half precision
    pub fn push(&mut self, s: &Surfel) {
        for v in [
            s.position.x,
            s.position.y,
            s.position.z,
            s.radius,
            s.normal.x,
            s.normal.y,
            s.normal.z,
        ] {
            self.attribs.push(f16::from_f32(v).to_bits());
        }
        self.attribs.push(u16::MAX); // pad word
        self.colors.extend_from_slice(&[s.color[0], s.color[1], s.color[2], 255]);
    }

    pub fn position(&self, i: usize) -> Vec3 {
        let w = &self.attribs[i * SURFEL_WORDS..];
        Vec3::new(Self::decode(w[0]), Self::decode(w[1]), Self::decode(w[2]))
    }

    pub fn radius(&self, i: usize) -> f32 {
        Self::decode(self.attribs[i * SURFEL_WORDS + 3])
    }

    pub fn normal(&self, i: usize) -> Vec3 {
        let w = &self.attribs[i * SURFEL_WORDS + 4..];
        Vec3::new(Self::decode(w[0]), Self::decode(w[1]), Self::decode(w[2]))
    }

    pub fn color(&self, i: usize) -> [u8; 3] {
        let c = &self.colors[i * COLOR_BYTES..];
        [c[0], c[1], c[2]]
    }

    pub fn get(&self, i: usize) -> Surfel {
        Surfel {
            position: self.position(i),
            radius: self.radius(i),
            normal: self.normal(i),
            color: self.color(i),
        }
    }

    /// Paint a surfel. The edit is staged; `take_colors_dirty` tells the
    /// upload path a flush is needed.
    pub fn set_color(&mut self, i: usize, rgb: [u8; 3]) {
        let c = &mut self.colors[i * COLOR_BYTES..i * COLOR_BYTES + 3];
        c.copy_from_slice(&rgb);
        self.colors_dirty = true;
    }

    /// Consume the staged-edit flag, returning whether colors changed since
    /// the last call
    pub fn take_colors_dirty(&mut self) -> bool {
        std::mem::take(&mut self.colors_dirty)
    }

    /// Raw half words, ready for vertex upload
    pub fn raw_attribs(&self) -> &[u16] {
        &self.attribs
    }

    /// Raw RGBA bytes, ready for vertex upload
    pub fn raw_colors(&self) -> &[u8] {
        &self.colors
    }

    /// Copy one surfel's raw attributes and color into a query batch
    pub(crate) fn append_to(&self, i: usize, out: &mut SurfelBatch) {
        out.attribs
            .append(&self.attribs[i * SURFEL_WORDS..(i + 1) * SURFEL_WORDS]);
        out.colors
            .append(&self.colors[i * COLOR_BYTES..(i + 1) * COLOR_BYTES]);
    }

    fn decode(bits: u16) -> f32 {
        f16::from_bits(bits).to_f32()
    }
}
