use std::fs;
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::error::Error;
use crate::io::{parse_hex, write_hex};
use crate::segment::{Segment, SegmentError};

/// Fill value returned for gaps by `nand_read`; also the erase value
/// `has_data` compares against.
pub const NAND_ERASE_VALUE: u8 = 0xFF;
/// Fill value returned for gaps by `nor_read`.
pub const NOR_ERASE_VALUE: u8 = 0x00;

/// Two segments cover the same address.
#[derive(Debug, Error)]
#[error("overlapping segments at address {address:#X}")]
pub struct OverlapError {
    pub address: u32,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("no data at address {address:#X}")]
    ReadOutsideImage { address: u32 },

    #[error("segment index {index} out of range ({count} segments)")]
    SegmentIndex { index: usize, count: usize },

    #[error("offset {offset:#X} past end of segment {index} (length {length})")]
    SegmentOffset {
        index: usize,
        offset: u32,
        length: usize,
    },

    #[error("overlapping segments at address {address:#X}")]
    OverlappingSegments { address: u32 },
}

/// A sparse memory image: an ordered collection of non-overlapping segments.
///
/// Segments are kept sorted by address and never overlap. Adjacent segments
/// may coexist as separate entries; they are never implicitly coalesced, so
/// segment boundaries can reflect the record boundaries of the file the image
/// was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    segments: Vec<Segment>,
}

impl SparseImage {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build an image from a segment list. Empty segments are dropped, the
    /// rest sorted by address; any overlap is rejected.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, OverlapError> {
        let mut segments: Vec<_> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        segments.sort_by_key(|s| s.address);

        if let Some(address) = first_overlap(&segments) {
            return Err(OverlapError { address });
        }

        Ok(Self { segments })
    }

    /// Parse an image from a hex file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let input = fs::read(path).map_err(|source| Error::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;

        let image = parse_hex(&input)?;
        debug!(
            "opened {}: {} segments, {} bytes",
            path.display(),
            image.segment_count(),
            image.total_bytes()
        );

        Ok(image)
    }

    /// Serialize the image to a hex file on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        fs::write(path, write_hex(self)).map_err(|source| Error::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(
            "saved {}: {} segments, {} bytes",
            path.display(),
            self.segment_count(),
            self.total_bytes()
        );

        Ok(())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_address(&self, index: usize) -> Result<u32, ImageError> {
        self.segment(index).map(|s| s.address)
    }

    pub fn segment_length(&self, index: usize) -> Result<u32, ImageError> {
        self.segment(index).map(|s| s.len() as u32)
    }

    /// Read up to `max_len` bytes from segment `index` starting `offset` bytes
    /// into it, truncated at the segment end.
    pub fn read_segment(
        &self,
        index: usize,
        offset: u32,
        max_len: usize,
    ) -> Result<Vec<u8>, ImageError> {
        let seg = self.segment(index)?;

        if offset as usize > seg.len() {
            return Err(ImageError::SegmentOffset {
                index,
                offset,
                length: seg.len(),
            });
        }

        if offset as usize == seg.len() {
            return Ok(Vec::new());
        }

        Ok(seg.read(seg.address + offset, max_len).to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Lowest covered address, if any.
    pub fn min_address(&self) -> Option<u32> {
        self.segments.first().map(|s| s.address)
    }

    /// Highest covered address (inclusive), if any.
    pub fn max_address(&self) -> Option<u32> {
        self.segments.last().map(|s| (s.end_address() - 1) as u32)
    }

    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Earliest covered range at or after `offset`, limited to one segment:
    /// `(result_address, bytes available from there to that segment's end)`.
    pub fn find(&self, offset: u32) -> Option<(u32, u32)> {
        let idx = self.segments.partition_point(|s| s.precedes(offset));
        let seg = self.segments.get(idx)?;
        let address = seg.address.max(offset);

        Some((address, (seg.end_address() - address as u64) as u32))
    }

    /// Like `find`, but extends across exactly-adjacent segments, stopping at
    /// the first gap.
    pub fn find_contiguous(&self, offset: u32) -> Option<(u32, u32)> {
        let (address, mut total) = self.find(offset)?;

        loop {
            let Ok(end) = u32::try_from(address as u64 + total as u64) else {
                break;
            };
            match self.find(end) {
                Some((next, len)) if next == end => total += len,
                _ => break,
            }
        }

        Some((address, total))
    }

    /// `find_contiguous` with the reported length capped at `max`.
    pub fn find_contiguous_max(&self, offset: u32, max: u32) -> Option<(u32, u32)> {
        self.find_contiguous(offset)
            .map(|(address, len)| (address, len.min(max)))
    }

    /// Read up to `max_len` bytes starting at `address`.
    ///
    /// Fails if `address` is not covered by any segment. The read continues
    /// into following segments only while each starts exactly where the
    /// previous one ended, so the result is short at the first gap.
    pub fn read(&self, address: u32, max_len: usize) -> Result<Vec<u8>, ImageError> {
        if max_len == 0 {
            return Ok(Vec::new());
        }

        let idx = self.segments.partition_point(|s| s.precedes(address));
        let first = match self.segments.get(idx) {
            Some(seg) => seg.read(address, max_len),
            None => &[],
        };

        if first.is_empty() {
            return Err(ImageError::ReadOutsideImage { address });
        }

        let mut out = first.to_vec();
        for seg in &self.segments[idx + 1..] {
            if out.len() >= max_len {
                break;
            }
            if seg.address as u64 != address as u64 + out.len() as u64 {
                break;
            }
            out.extend_from_slice(seg.read(seg.address, max_len - out.len()));
        }

        Ok(out)
    }

    /// Read `len` bytes at `address`, with gaps reading as `0xFF` (NAND erase
    /// value). Never fails.
    pub fn nand_read(&self, address: u32, len: usize) -> Vec<u8> {
        self.fill_read(address, len, NAND_ERASE_VALUE)
    }

    /// Read `len` bytes at `address`, with gaps reading as `0x00` (NOR erase
    /// value). Never fails.
    pub fn nor_read(&self, address: u32, len: usize) -> Vec<u8> {
        self.fill_read(address, len, NOR_ERASE_VALUE)
    }

    fn fill_read(&self, address: u32, len: usize, fill: u8) -> Vec<u8> {
        let mut out = vec![fill; len];
        if len == 0 {
            return out;
        }

        let end = address as u64 + len as u64;
        let idx = self.segments.partition_point(|s| s.precedes(address));

        for seg in &self.segments[idx..] {
            if seg.address as u64 >= end {
                break;
            }
            let from = seg.address.max(address);
            let chunk = seg.read(from, (end - from as u64) as usize);
            let offset = (from - address) as usize;
            out[offset..offset + chunk.len()].copy_from_slice(chunk);
        }

        out
    }

    /// Write `data` at `address`, overwriting covered bytes and filling gaps.
    ///
    /// Extends an existing segment when the write starts inside it or at its
    /// end, otherwise inserts a new segment at the sorted position; a chunk is
    /// clipped at the next segment's start and the loop carries the suffix
    /// into that segment, so one call may touch several segments.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), SegmentError> {
        let mut address = address;
        let mut data = data;

        while !data.is_empty() {
            let idx = self.segments.partition_point(|s| s.precedes(address));

            if idx == self.segments.len() {
                // Past every existing segment; the remainder cannot overlap.
                match self.segments.last_mut() {
                    Some(last) if last.will_accept_address(address) => {
                        last.write(address, data)?;
                    }
                    _ => {
                        let mut seg = Segment::new(address);
                        seg.write(address, data)?;
                        self.segments.push(seg);
                    }
                }
                break;
            }

            let next_start = if self.segments[idx].will_accept_address(address) {
                self.segments.get(idx + 1).map(|s| s.address)
            } else {
                let start = self.segments[idx].address;
                self.segments.insert(idx, Segment::new(address));
                Some(start)
            };

            let chunk_len = match next_start {
                Some(next) if address as u64 + data.len() as u64 > next as u64 => {
                    (next - address) as usize
                }
                _ => data.len(),
            };

            self.segments[idx].write(address, &data[..chunk_len])?;

            data = &data[chunk_len..];
            match next_start {
                Some(next) if !data.is_empty() => address = next,
                _ => break,
            }
        }

        Ok(())
    }

    /// Remove `len` bytes of coverage starting at `address`.
    ///
    /// A range strictly inside a segment splits it in two; otherwise segments
    /// shrink from whichever end the range touches, and are dropped outright
    /// once empty. Gaps inside the range are skipped.
    pub fn remove(&mut self, address: u32, len: u32) -> Result<(), SegmentError> {
        let mut address = address;
        let mut len = len;
        let mut idx = self.segments.partition_point(|s| s.precedes(address));

        while len > 0 && idx < self.segments.len() {
            let seg = &self.segments[idx];

            if !seg.can_remove(address, len) {
                if seg.address > address {
                    // Range ends in the gap before this segment.
                    return Ok(());
                }

                // Interior range: keep both ends, drop the middle.
                let first_len = address - seg.address;
                let (first, second) = seg.split(first_len, first_len + len)?;
                self.segments[idx] = first;
                self.segments.insert(idx + 1, second);
                return Ok(());
            }

            let mut count = 0;
            if address < self.segments[idx].address {
                count += self.segments[idx].address - address;
            }
            count += self.segments[idx].remove(address, len);

            if self.segments[idx].is_empty() {
                self.segments.remove(idx);
            } else {
                idx += 1;
            }

            address = address.saturating_add(count);
            len -= count.min(len);
        }

        Ok(())
    }

    /// Whether any covered byte in `[start, end)` differs from the NAND erase
    /// value `0xFF`.
    pub fn has_data(&self, start: u32, end: u32) -> bool {
        if end <= start {
            return false;
        }

        let idx = self.segments.partition_point(|s| s.precedes(start));

        for seg in &self.segments[idx..] {
            if seg.address as u64 >= end as u64 {
                break;
            }
            let from = seg.address.max(start);
            let chunk = seg.read(from, (end as u64 - from as u64) as usize);
            if chunk.iter().any(|&b| b != NAND_ERASE_VALUE) {
                return true;
            }
        }

        false
    }

    /// Fold `other`'s segments into this image.
    ///
    /// Any overlap between the two images fails the merge and leaves this
    /// image cleared; `other` is never modified.
    pub fn merge(&mut self, other: &SparseImage) -> Result<(), ImageError> {
        if other.segments.is_empty() {
            return Ok(());
        }

        self.segments.extend(other.segments.iter().cloned());
        self.segments.sort_by_key(|s| s.address);

        if let Some(address) = first_overlap(&self.segments) {
            self.segments.clear();
            return Err(ImageError::OverlappingSegments { address });
        }

        debug!("merged image: {} segments", self.segments.len());

        Ok(())
    }

    /// Merge two images into a new one, leaving both inputs untouched.
    pub fn merged(lhs: &SparseImage, rhs: &SparseImage) -> Result<SparseImage, ImageError> {
        let mut segments = Vec::with_capacity(lhs.segments.len() + rhs.segments.len());
        segments.extend(lhs.segments.iter().cloned());
        segments.extend(rhs.segments.iter().cloned());
        segments.sort_by_key(|s| s.address);

        if let Some(address) = first_overlap(&segments) {
            return Err(ImageError::OverlappingSegments { address });
        }

        Ok(SparseImage { segments })
    }

    fn segment(&self, index: usize) -> Result<&Segment, ImageError> {
        self.segments.get(index).ok_or(ImageError::SegmentIndex {
            index,
            count: self.segments.len(),
        })
    }
}

fn first_overlap(segments: &[Segment]) -> Option<u32> {
    segments
        .windows(2)
        .find(|w| (w[1].address as u64) < w[0].end_address())
        .map(|w| w[1].address)
}
