/// Position inside a ring of fixed length.
///
/// Wraps on [`RingIndex::advance`]; the ring length is fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingIndex {
    value: usize,
    len: usize,
}

impl RingIndex {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "ring length must be non-zero");
        Self { value: 0, len }
    }

    pub fn get(&self) -> usize {
        self.value
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// The position one step ahead, without moving.
    pub fn next(&self) -> Self {
        Self {
            value: (self.value + 1) % self.len,
            len: self.len,
        }
    }

    pub fn advance(&mut self) {
        *self = self.next();
    }

    /// Number of steps from `self` forward to `other`.
    pub fn distance_to(&self, other: RingIndex) -> usize {
        debug_assert_eq!(self.len, other.len);
        (other.value + self.len - self.value) % self.len
    }
}
