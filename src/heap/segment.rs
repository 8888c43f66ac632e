use strum::{Display, EnumIter};

use crate::{address::Address, session::RuntimeLayout, Error, Result};

/// Generation class of a heap segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum SegmentKind {
    /// Ephemeral and gen2 segments holding ordinary objects
    Small,
    /// The large-object heap
    Large,
    /// The pinned-object heap
    Pinned,
}

/// A contiguous range of the managed heap.
///
/// Objects are laid out back to back from `start` up to `min(allocated, end)`. `start` is the
/// address of the first object, whose header lives one pointer below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Address of the first object
    pub start: Address,
    /// Reserved end of the segment
    pub end: Address,
    /// End of the allocated part of the segment
    pub allocated: Address,
    /// Generation class
    pub kind: SegmentKind,
}

impl Segment {
    /// Create a segment.
    #[must_use]
    pub fn new(start: Address, end: Address, allocated: Address, kind: SegmentKind) -> Segment {
        Segment {
            start,
            end,
            allocated,
            kind,
        }
    }

    /// Address where object enumeration stops.
    #[must_use]
    pub fn walk_end(&self) -> Address {
        self.allocated.min(self.end)
    }

    /// Returns `true` if `address` lies in the walkable part of the segment.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address < self.walk_end()
    }

    /// Object alignment used when stepping through this segment.
    #[must_use]
    pub fn alignment(&self, layout: &RuntimeLayout) -> u64 {
        match self.kind {
            SegmentKind::Small => layout.object_alignment,
            SegmentKind::Large | SegmentKind::Pinned => layout.large_object_alignment,
        }
    }

    /// Checks the segment bounds.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidSegment`] if the segment starts at null, ends before it
    /// starts, or has its allocation pointer before its start.
    pub fn validate(&self) -> Result<()> {
        if self.start.is_null() {
            return Err(Error::InvalidSegment(format!(
                "{} segment starts at null",
                self.kind
            )));
        }
        if self.end < self.start {
            return Err(Error::InvalidSegment(format!(
                "segment {}..{} ends before it starts",
                self.start, self.end
            )));
        }
        if self.allocated < self.start {
            return Err(Error::InvalidSegment(format!(
                "segment {}..{} has its allocation pointer at {}",
                self.start, self.end, self.allocated
            )));
        }
        Ok(())
    }
}

/// Supplier of the heap's segment list.
///
/// Dump readers describe the heap through this trait; the list is read once when a
/// [`crate::Session`] attaches.
pub trait SegmentProvider {
    /// Every segment of the heap, in enumeration order.
    ///
    /// # Errors
    /// Returns an error if the segment list cannot be read from the target.
    fn segments(&self) -> Result<Vec<Segment>>;
}

impl SegmentProvider for Vec<Segment> {
    fn segments(&self) -> Result<Vec<Segment>> {
        Ok(self.clone())
    }
}

impl SegmentProvider for [Segment] {
    fn segments(&self) -> Result<Vec<Segment>> {
        Ok(self.to_vec())
    }
}

impl<P: SegmentProvider + ?Sized> SegmentProvider for &P {
    fn segments(&self) -> Result<Vec<Segment>> {
        (**self).segments()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: u64, end: u64, allocated: u64) -> Segment {
        Segment::new(
            Address::new(start),
            Address::new(end),
            Address::new(allocated),
            SegmentKind::Small,
        )
    }

    #[test]
    fn test_walk_end() {
        assert_eq!(segment(0x1000, 0x2000, 0x1800).walk_end(), Address::new(0x1800));
        assert_eq!(segment(0x1000, 0x2000, 0x3000).walk_end(), Address::new(0x2000));
    }

    #[test]
    fn test_contains() {
        let segment = segment(0x1000, 0x2000, 0x1800);
        assert!(segment.contains(Address::new(0x1000)));
        assert!(segment.contains(Address::new(0x17FF)));
        assert!(!segment.contains(Address::new(0x1800)));
        assert!(!segment.contains(Address::new(0x0FFF)));
    }

    #[test]
    fn test_validate() {
        assert!(segment(0x1000, 0x2000, 0x1000).validate().is_ok());
        assert!(matches!(
            segment(0x1000, 0x2000, 0x0800).validate(),
            Err(Error::InvalidSegment(_))
        ));
        assert!(segment(0x2000, 0x1000, 0x2000).validate().is_err());
        assert!(segment(0, 0x1000, 0x10).validate().is_err());
    }

    #[test]
    fn test_alignment() {
        let layout = RuntimeLayout::x86();
        let mut segment = segment(0x1000, 0x2000, 0x1000);
        assert_eq!(segment.alignment(&layout), 4);
        segment.kind = SegmentKind::Large;
        assert_eq!(segment.alignment(&layout), 8);
    }

    #[test]
    fn test_provider() {
        let segments = vec![segment(0x1000, 0x2000, 0x1000)];
        assert_eq!(segments.segments().unwrap(), segments);
        assert_eq!(segments.as_slice().segments().unwrap().len(), 1);
        assert_eq!(SegmentKind::Large.to_string(), "Large");
    }
}
