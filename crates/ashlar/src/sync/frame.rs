//! Round-robin array of in-flight frame slots

/// Fixed-size ring of per-frame resources indexed by a monotonic frame counter
#[derive(Debug)]
pub struct FrameSyncArray<S> {
    slots: Vec<S>,
    frame_index: u64,
}

impl<S> FrameSyncArray<S> {
    /// Wrap pre-built slots; returns `None` for an empty list
    pub fn new(slots: Vec<S>) -> Option<Self> {
        if slots.is_empty() {
            return None;
        }
        Some(Self { slots, frame_index: 0 })
    }

    /// Build `count` slots with `make`, stopping at the first error
    pub fn build<E>(count: usize, mut make: impl FnMut(usize) -> Result<S, E>) -> Result<Option<Self>, E> {
        let slots = (0..count).map(&mut make).collect::<Result<Vec<_>, E>>()?;
        Ok(Self::new(slots))
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; an array has at least one slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Frames advanced so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Slot used by the current frame
    pub fn current_index(&self) -> usize {
        (self.frame_index % self.slots.len() as u64) as usize
    }

    /// Current slot
    pub fn current(&self) -> &S {
        &self.slots[self.current_index()]
    }

    /// Slot by index
    pub fn get(&self, index: usize) -> Option<&S> {
        self.slots.get(index)
    }

    /// Move to the next frame
    pub fn advance(&mut self) {
        self.frame_index = self.frame_index.wrapping_add(1);
    }

    /// All slots
    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_modulo_slot_count() {
        let mut frames = FrameSyncArray::new(vec!['a', 'b']).unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(frames.current_index());
            frames.advance();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert_eq!(frames.frame_index(), 5);
        assert_eq!(*frames.current(), 'b');
    }

    #[test]
    fn test_empty_rejected() {
        assert!(FrameSyncArray::<u8>::new(Vec::new()).is_none());
        assert!(FrameSyncArray::build(0, |i| Ok::<_, ()>(i)).unwrap().is_none());
    }

    #[test]
    fn test_build_stops_at_first_error() {
        let mut made = 0;
        let result = FrameSyncArray::build(3, |i| {
            made += 1;
            if i == 1 {
                Err("boom")
            } else {
                Ok(i)
            }
        });
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(made, 2);
    }
}
