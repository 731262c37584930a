//! Monotonic bump regions inside the arena buffer.

use crate::error::{GraphicsError, GraphicsResult};

/// Every write into a region starts on a 4-byte boundary.
pub const REGION_ALIGNMENT: u64 = 4;

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Space reserved in a region but not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Reservation {
    /// Absolute byte offset in the arena buffer.
    pub offset: u64,
    /// Aligned size in bytes.
    pub size: u64,
}

/// A byte range `[base, base + capacity)` of the arena buffer filled front to
/// back by a write cursor that only moves forward.
///
/// Allocation is two-phase: [`reserve`](Self::reserve) checks capacity and
/// hands out the next aligned range without moving the cursor, and
/// [`commit`](Self::commit) advances the cursor once the data is known to be
/// in place.
#[derive(Debug, Clone)]
pub struct ArenaRegion {
    name: &'static str,
    base: u64,
    capacity: u64,
    cursor: u64,
}

impl ArenaRegion {
    pub fn new(name: &'static str, base: u64, capacity: u64) -> Self {
        debug_assert_eq!(base % REGION_ALIGNMENT, 0);
        Self {
            name,
            base,
            capacity,
            cursor: base,
        }
    }

    /// Reserve `bytes` rounded up to the region alignment.
    pub fn reserve(&self, bytes: u64) -> GraphicsResult<Reservation> {
        let size = align_up(bytes, REGION_ALIGNMENT);
        let end = self.base + self.capacity;
        if self.cursor + size > end {
            return Err(GraphicsError::ArenaCapacityExceeded {
                region: self.name,
                requested: size,
                offset: self.used(),
                limit: self.capacity,
            });
        }
        Ok(Reservation {
            offset: self.cursor,
            size,
        })
    }

    /// Advance the cursor past a reservation obtained from this region.
    pub fn commit(&mut self, reservation: Reservation) {
        debug_assert_eq!(
            reservation.offset, self.cursor,
            "reservations must be committed in order"
        );
        self.cursor = reservation.offset + reservation.size;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Absolute offset of the first byte of the region.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Absolute offset of the next write.
    pub fn write_offset(&self) -> u64 {
        self.cursor
    }

    /// Bytes committed so far.
    pub fn used(&self) -> u64 {
        self.cursor - self.base
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_does_not_advance() {
        let mut region = ArenaRegion::new("vertex", 0, 64);
        let first = region.reserve(10).unwrap();
        assert_eq!(first, Reservation { offset: 0, size: 12 });
        assert_eq!(region.write_offset(), 0);

        region.commit(first);
        assert_eq!(region.write_offset(), 12);
        let second = region.reserve(4).unwrap();
        assert_eq!(second.offset, 12);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut region = ArenaRegion::new("index", 100, 16);
        let reservation = region.reserve(12).unwrap();
        region.commit(reservation);
        assert_eq!(reservation.offset, 100);

        match region.reserve(8) {
            Err(GraphicsError::ArenaCapacityExceeded {
                region,
                requested,
                offset,
                limit,
            }) => {
                assert_eq!(region, "index");
                assert_eq!(requested, 8);
                assert_eq!(offset, 12);
                assert_eq!(limit, 16);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
        assert_eq!(region.used(), 12);
        assert_eq!(region.remaining(), 4);
    }

    #[test]
    fn test_exact_fit() {
        let region = ArenaRegion::new("vertex", 0, 8);
        assert!(region.reserve(8).is_ok());
        assert!(region.reserve(0).is_ok());
    }
}
