use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("address {address:#X} is not contiguous with segment {start:#X}..{end:#X}")]
    Discontiguous { address: u32, start: u32, end: u64 },

    #[error("segment allocation failed: {0}")]
    OutOfMemory(#[from] TryReserveError),

    #[error(
        "invalid split bounds {end_of_first}..{start_of_second} for segment of length {length}"
    )]
    InvalidSplit {
        end_of_first: u32,
        start_of_second: u32,
        length: usize,
    },
}

/// An owned, contiguous run of bytes anchored at a 32-bit address.
///
/// A segment covers `[address, address + data.len())`. The exclusive end is
/// computed in `u64` so a segment may butt up against the top of the 32-bit
/// address space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(address: u32) -> Self {
        Self {
            address,
            data: Vec::new(),
        }
    }

    pub fn with_data(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Exclusive end address.
    pub fn end_address(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }

    /// True iff `address` is strictly inside the segment.
    pub fn has_address(&self, address: u32) -> bool {
        address >= self.address && (address as u64) < self.end_address()
    }

    /// True iff `address` is inside the segment or immediately follows it.
    /// The closed upper bound is what permits contiguous appends.
    pub fn will_accept_address(&self, address: u32) -> bool {
        address >= self.address && (address as u64) <= self.end_address()
    }

    /// Whether this segment lies entirely before `address`. The predicate that
    /// drives `partition_point` searches across a sorted collection.
    pub fn precedes(&self, address: u32) -> bool {
        self.end_address() <= address as u64
    }

    /// Overwrite or extend the segment with `buf` starting at `address`.
    ///
    /// The write must start inside the segment or immediately after its end;
    /// anything else is `Discontiguous`. The backing store grows as needed and
    /// growth is fallible (`OutOfMemory`).
    pub fn write(&mut self, address: u32, buf: &[u8]) -> Result<(), SegmentError> {
        if buf.is_empty() {
            return Ok(());
        }

        if !self.will_accept_address(address) {
            return Err(SegmentError::Discontiguous {
                address,
                start: self.address,
                end: self.end_address(),
            });
        }

        let offset = (address - self.address) as usize;
        let required = offset + buf.len();

        // The grown segment must still fit the 32-bit address space.
        if self.address as u64 + required as u64 > (1 << 32) {
            return Err(SegmentError::Discontiguous {
                address,
                start: self.address,
                end: self.end_address(),
            });
        }

        if self.data.len() < required {
            self.data.try_reserve(required - self.data.len())?;
            self.data.resize(required, 0);
        }

        self.data[offset..offset + buf.len()].copy_from_slice(buf);

        Ok(())
    }

    /// Bytes covered by this segment starting at `address`, truncated at the
    /// segment end. Empty if `address` is outside the segment; never fails.
    pub fn read(&self, address: u32, max_len: usize) -> &[u8] {
        if max_len == 0 || !self.has_address(address) {
            return &[];
        }

        let offset = (address - self.address) as usize;
        let available = self.data.len() - offset;
        &self.data[offset..offset + available.min(max_len)]
    }

    /// Whether `remove(address, len)` would take any bytes off this segment.
    ///
    /// Only ranges touching the front or reaching past the back qualify;
    /// interior ranges require an explicit split at the collection level. The
    /// range is clamped to the segment bounds before the tail test, matching
    /// what `remove` actually does.
    pub fn can_remove(&self, address: u32, len: u32) -> bool {
        if len == 0 || address == self.address {
            return true;
        }

        if address < self.address {
            return address as u64 + len as u64 > self.address as u64;
        }

        (address as u64) < self.end_address()
            && address as u64 + len as u64 >= self.end_address()
    }

    /// Shrink the segment from the front or the back.
    ///
    /// The range is clamped to the segment bounds. Returns the number of bytes
    /// actually removed; 0 if the clamped range matches neither end.
    pub fn remove(&mut self, address: u32, len: u32) -> u32 {
        if len == 0 || self.data.is_empty() {
            return 0;
        }

        let (address, len) = if address < self.address {
            (self.address, len.saturating_sub(self.address - address))
        } else {
            (address, len)
        };

        if (address as u64) >= self.end_address() || len == 0 {
            return 0;
        }

        let available = (self.end_address() - address as u64) as u32;
        let len = len.min(available);

        if address == self.address {
            self.data.drain(..len as usize);
            self.address += len;
            len
        } else if address as u64 + len as u64 == self.end_address() {
            self.data.truncate(self.data.len() - len as usize);
            len
        } else {
            0
        }
    }

    /// Split into two new segments, discarding `[end_of_first, start_of_second)`.
    ///
    /// The first covers `[0, end_of_first)` at the original address, the
    /// second `[start_of_second, len)` at `address + start_of_second`.
    pub fn split(
        &self,
        end_of_first: u32,
        start_of_second: u32,
    ) -> Result<(Segment, Segment), SegmentError> {
        if end_of_first > start_of_second
            || end_of_first as usize > self.data.len()
            || start_of_second as usize > self.data.len()
        {
            return Err(SegmentError::InvalidSplit {
                end_of_first,
                start_of_second,
                length: self.data.len(),
            });
        }

        let mut first = Vec::new();
        first.try_reserve(end_of_first as usize)?;
        first.extend_from_slice(&self.data[..end_of_first as usize]);

        let mut second = Vec::new();
        second.try_reserve(self.data.len() - start_of_second as usize)?;
        second.extend_from_slice(&self.data[start_of_second as usize..]);

        Ok((
            Segment::with_data(self.address, first),
            Segment::with_data(self.address + start_of_second, second),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_extends_end() {
        let mut seg = Segment::new(0x100);
        seg.write(0x100, &[0x01, 0x02]).unwrap();
        seg.write(0x102, &[0x03]).unwrap();
        assert_eq!(seg.data, vec![0x01, 0x02, 0x03]);
        assert_eq!(seg.end_address(), 0x103);
    }

    #[test]
    fn test_write_overwrites_interior() {
        let mut seg = Segment::with_data(0x100, vec![0xAA; 4]);
        seg.write(0x101, &[0x01, 0x02]).unwrap();
        assert_eq!(seg.data, vec![0xAA, 0x01, 0x02, 0xAA]);
    }

    #[test]
    fn test_write_discontiguous() {
        let mut seg = Segment::with_data(0x100, vec![0xAA]);
        assert!(matches!(
            seg.write(0x102, &[0x01]),
            Err(SegmentError::Discontiguous { .. })
        ));
        assert!(matches!(
            seg.write(0xFF, &[0x01]),
            Err(SegmentError::Discontiguous { .. })
        ));
    }

    #[test]
    fn test_write_zero_len_anywhere() {
        let mut seg = Segment::with_data(0x100, vec![0xAA]);
        seg.write(0xDEAD_0000, &[]).unwrap();
        assert_eq!(seg.data, vec![0xAA]);
    }

    #[test]
    fn test_write_past_address_space() {
        let mut seg = Segment::with_data(0xFFFF_FFFE, vec![0xAA]);
        seg.write(0xFFFF_FFFF, &[0xBB]).unwrap();
        assert_eq!(seg.end_address(), 1 << 32);
        assert!(matches!(
            seg.write(0xFFFF_FFFF, &[0xBB, 0xCC]),
            Err(SegmentError::Discontiguous { .. })
        ));
    }

    #[test]
    fn test_read_truncates() {
        let seg = Segment::with_data(0x100, vec![0x01, 0x02, 0x03]);
        assert_eq!(seg.read(0x101, 8), &[0x02, 0x03]);
        assert_eq!(seg.read(0x100, 2), &[0x01, 0x02]);
        assert_eq!(seg.read(0x0FF, 2), &[] as &[u8]);
        assert_eq!(seg.read(0x103, 2), &[] as &[u8]);
    }

    #[test]
    fn test_accept_bounds() {
        let seg = Segment::with_data(0x100, vec![0x01, 0x02]);
        assert!(seg.has_address(0x101));
        assert!(!seg.has_address(0x102));
        assert!(seg.will_accept_address(0x102));
        assert!(!seg.will_accept_address(0x103));
        assert!(!seg.will_accept_address(0x0FF));
    }

    #[test]
    fn test_can_remove() {
        let seg = Segment::with_data(0x10, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(seg.can_remove(0x10, 1)); // front
        assert!(seg.can_remove(0x13, 1)); // exact tail
        assert!(seg.can_remove(0x12, 8)); // tail overshoot, clamped
        assert!(seg.can_remove(0x0E, 4)); // overlaps from before
        assert!(seg.can_remove(0x20, 0)); // zero length
        assert!(!seg.can_remove(0x11, 1)); // interior
        assert!(!seg.can_remove(0x11, 2)); // interior
        assert!(!seg.can_remove(0x0E, 2)); // ends before segment
        assert!(!seg.can_remove(0x14, 2)); // starts past end
    }

    #[test]
    fn test_remove_front_advances_address() {
        let mut seg = Segment::with_data(0x10, vec![1, 2, 3, 4]);
        assert_eq!(seg.remove(0x10, 2), 2);
        assert_eq!(seg.address, 0x12);
        assert_eq!(seg.data, vec![3, 4]);
    }

    #[test]
    fn test_remove_front_clamps_leading_gap() {
        let mut seg = Segment::with_data(0x10, vec![1, 2, 3, 4]);
        assert_eq!(seg.remove(0x0C, 6), 2);
        assert_eq!(seg.address, 0x12);
        assert_eq!(seg.data, vec![3, 4]);
    }

    #[test]
    fn test_remove_back() {
        let mut seg = Segment::with_data(0x10, vec![1, 2, 3, 4]);
        assert_eq!(seg.remove(0x13, 1), 1);
        assert_eq!(seg.data, vec![1, 2, 3]);
        assert_eq!(seg.remove(0x11, 9), 2);
        assert_eq!(seg.data, vec![1]);
    }

    #[test]
    fn test_remove_interior_refused() {
        let mut seg = Segment::with_data(0x10, vec![1, 2, 3, 4]);
        assert_eq!(seg.remove(0x11, 1), 0);
        assert_eq!(seg.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_whole() {
        let mut seg = Segment::with_data(0x10, vec![1, 2]);
        assert_eq!(seg.remove(0x10, 2), 2);
        assert!(seg.is_empty());
    }

    #[test]
    fn test_split() {
        let seg = Segment::with_data(0x10, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let (first, second) = seg.split(1, 2).unwrap();
        assert_eq!(first.address, 0x10);
        assert_eq!(first.data, vec![0xDE]);
        assert_eq!(second.address, 0x12);
        assert_eq!(second.data, vec![0xBE, 0xEF]);
    }

    #[test]
    fn test_split_bad_bounds() {
        let seg = Segment::with_data(0x10, vec![1, 2, 3]);
        assert!(matches!(
            seg.split(2, 1),
            Err(SegmentError::InvalidSplit { .. })
        ));
        assert!(matches!(
            seg.split(1, 4),
            Err(SegmentError::InvalidSplit { .. })
        ));
    }

    #[test]
    fn test_precedes() {
        let seg = Segment::with_data(0x10, vec![1, 2]);
        assert!(seg.precedes(0x12));
        assert!(!seg.precedes(0x11));
    }
}
