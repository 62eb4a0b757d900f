//! Growable typed buffers for query results
//!
//! Traversals append selected surfels into a [`SurfelBatch`] each frame; the
//! caller uploads the two arrays and calls [`SurfelBatch::clear`] to reuse the
//! allocations. Growth is geometric (1.5x) with the logical length tracked
//! separately from capacity, so steady-state frames do not reallocate.

/// Append-only buffer with explicit 1.5x geometric growth
#[derive(Clone, Debug)]
pub struct AttribBuffer<T: Copy> {
    data: Vec<T>,
    cap: usize,
    grows: usize,
}

impl<T: Copy> AttribBuffer<T> {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
            cap,
            grows: 0,
        }
    }

    /// Logical length in elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Physical capacity in elements
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of reallocations since construction
    pub fn grows(&self) -> usize {
        self.grows
    }

    pub fn append(&mut self, items: &[T]) {
        self.ensure(items.len());
        self.data.extend_from_slice(items);
    }

    pub fn push(&mut self, item: T) {
        self.ensure(1);
        self.data.push(item);
    }

    /// Reset the logical length, keeping the backing allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    fn ensure(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed <= self.cap {
            return;
        }
        let mut new_cap = self.cap.max(1);
        while new_cap < needed {
            new_cap = (new_cap * 3 / 2).max(new_cap + 1);
        }
        let mut grown = Vec::with_capacity(new_cap);
        grown.extend_from_slice(&self.data);
        self.data = grown;
        self.cap = new_cap;
        self.grows += 1;
    }
}

impl<T: Copy> Default for AttribBuffer<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Parallel position/color result buffers for one traversal
///
/// `attribs` holds 8 half words per surfel (position, radius, normal, pad),
/// `colors` 4 bytes per surfel, both in wire layout for instanced upload.
#[derive(Clone, Debug)]
pub struct SurfelBatch {
    pub attribs: AttribBuffer<u16>,
    pub colors: AttribBuffer<u8>,
}

impl SurfelBatch {
    /// Initial capacity of 128 surfels, enough for one leaf
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    pub fn with_capacity(surfels: usize) -> Self {
        Self {
            attribs: AttribBuffer::with_capacity(surfels * 8),
            colors: AttribBuffer::with_capacity(surfels * 4),
        }
    }

    /// Number of surfels collected
    pub fn len(&self) -> usize {
        self.attribs.len() / 8
    }

    pub fn is_empty(&self) -> bool {
        self.attribs.is_empty()
    }

    /// Reset for the next frame without releasing storage
    pub fn clear(&mut self) {
        self.attribs.clear();
        self.colors.clear();
    }
}

impl Default for SurfelBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut buf = AttribBuffer::<u8>::with_capacity(64);
        buf.append(&[1u8; 64]);
        assert_eq!(buf.len(), 64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.grows(), 0);
    }

    #[test]
    fn test_growth_is_geometric() {
        let mut buf = AttribBuffer::<u8>::with_capacity(64);
        buf.append(&[0u8; 64]);

        // One element over capacity: one growth to 96
        buf.push(1);
        assert_eq!(buf.capacity(), 96);
        assert_eq!(buf.grows(), 1);

        // Fill to 96, then push once more: 96 -> 144
        buf.append(&[0u8; 31]);
        assert_eq!(buf.grows(), 1);
        buf.push(2);
        assert_eq!(buf.capacity(), 144);
        assert_eq!(buf.grows(), 2);
    }

    #[test]
    fn test_large_append_grows_once() {
        let mut buf = AttribBuffer::<u8>::with_capacity(16);
        // Needs several 1.5x steps but a single reallocation
        buf.append(&[0u8; 100]);
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.grows(), 1);
        assert!(buf.capacity() >= 100);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = AttribBuffer::<u8>::with_capacity(8);
        buf.append(&[0u8; 20]);
        let cap = buf.capacity();
        let grows = buf.grows();

        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), cap);

        // Re-append within the grown capacity: no further reallocation
        buf.append(&[0u8; 20]);
        assert_eq!(buf.grows(), grows);
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_batch_len_and_clear() {
        let mut batch = SurfelBatch::new();
        batch.attribs.append(&[0u16; 16]);
        batch.colors.append(&[0u8; 8]);
        assert_eq!(batch.len(), 2);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.attribs.capacity(), 128 * 8);
    }
}
