use super::{ClrObject, Segment};
use crate::{address::Address, session::Session, Error, Result};

/// Forward-only walk over every object of a set of segments.
///
/// Each segment is walked from `start` to `min(allocated, end)`, stepping from one object to
/// the next by the object's aligned size. An object whose header cannot be decoded makes it
/// impossible to find the next one, so it yields a single
/// [`crate::Error::CorruptMetadata`] item and the walk resumes at the next segment.
///
/// Enumerators are created by [`Session::enumerate_objects`]; every call starts a fresh pass.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::Session;
///
/// # fn count(session: &Session) {
/// let mut objects = session.enumerate_objects();
/// let strings = objects
///     .by_ref()
///     .filter_map(Result::ok)
///     .filter(|object| object.ty().is_some_and(|ty| ty.is_string()))
///     .count();
/// println!("{strings} strings, {} unreadable headers", objects.error_count());
/// # }
/// ```
pub struct HeapEnumerator<'s> {
    session: &'s Session,
    segments: &'s [Segment],
    /// Index of the segment being walked
    segment: usize,
    /// Next object address; `None` before a segment is entered
    cursor: Option<Address>,
    errors: usize,
}

impl<'s> HeapEnumerator<'s> {
    pub(crate) fn new(session: &'s Session, segments: &'s [Segment]) -> Self {
        HeapEnumerator {
            session,
            segments,
            segment: 0,
            cursor: None,
            errors: 0,
        }
    }

    /// Number of items that were errors so far.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Decode the object at `address` and the address of its successor.
    fn step(&self, segment: &Segment, address: Address) -> Result<(ClrObject<'s>, Address)> {
        let layout = self.session.layout();
        let object = self.session.get_object(address)?;
        if object.is_null() {
            return Err(corrupt_metadata!("Null descriptor pointer at {}", address));
        }

        let ty = object.ty().ok_or(Error::NullReference)?;
        let size = ty
            .instance_size(object.component_count()?, segment.alignment(layout))
            .ok_or_else(|| corrupt_metadata!("Size of object at {} overflows", address))?;
        if size < layout.min_object_size {
            return Err(corrupt_metadata!(
                "Object at {} has size {} below the minimum object size",
                address,
                size
            ));
        }

        let next = address.offset(size)?;
        if next > segment.walk_end() {
            return Err(corrupt_metadata!(
                "Object at {} of size {} overruns its segment ending at {}",
                address,
                size,
                segment.walk_end()
            ));
        }

        Ok((object, next))
    }
}

impl<'s> Iterator for HeapEnumerator<'s> {
    type Item = Result<ClrObject<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.segments.get(self.segment)?;
            let address = *self.cursor.get_or_insert(segment.start);
            if address >= segment.walk_end() {
                self.segment += 1;
                self.cursor = None;
                continue;
            }

            match self.step(segment, address) {
                Ok((object, next)) => {
                    self.cursor = Some(next);
                    return Some(Ok(object));
                }
                Err(error) => {
                    tracing::warn!(
                        address = %address,
                        segment = %segment.start,
                        error = %error,
                        "corrupt object header, skipping rest of segment"
                    );
                    self.errors += 1;
                    self.segment += 1;
                    self.cursor = None;

                    let error = match error {
                        Error::CorruptMetadata { .. } => error,
                        other => corrupt_metadata!("Object at {}: {}", address, other),
                    };
                    return Some(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::HeapImageBuilder,
        heap::SegmentKind,
        test::attach,
        typesystem::ElementKind,
    };

    #[test]
    fn test_enumerate_all_segments() {
        let mut builder = HeapImageBuilder::x64();
        let node = builder
            .define_class("Sample.Node")
            .field("_next", ElementKind::Class)
            .build();
        let ints = builder.define_array("System.Int32[]", ElementKind::I4, Address::NULL);

        let small = builder.segment(SegmentKind::Small);
        let large = builder.segment(SegmentKind::Large);
        let a = builder.alloc(small, node).unwrap();
        let b = builder.alloc_string(small, "abc").unwrap();
        let c = builder.alloc_array(large, ints, 10_000).unwrap();
        let session = attach(builder);

        let mut objects = session.enumerate_objects();
        let addresses: Vec<Address> = objects
            .by_ref()
            .map(|object| object.unwrap().address())
            .collect();
        assert_eq!(addresses, vec![a, b, c]);
        assert_eq!(objects.error_count(), 0);
    }

    #[test]
    fn test_restart() {
        let mut builder = HeapImageBuilder::x64();
        let node = builder.define_class("Sample.Node").build();
        let segment = builder.segment(SegmentKind::Small);
        for _ in 0..16 {
            builder.alloc(segment, node).unwrap();
        }
        let session = attach(builder);

        let first: Vec<_> = session.enumerate_objects().map(|o| o.unwrap()).collect();
        let second: Vec<_> = session.enumerate_objects().map(|o| o.unwrap()).collect();
        assert_eq!(first.len(), 16);
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_header_ends_segment() {
        let mut builder = HeapImageBuilder::x64();
        let node = builder.define_class("Sample.Node").build();
        let first = builder.segment(SegmentKind::Small);
        let second = builder.segment(SegmentKind::Small);
        let a = builder.alloc(first, node).unwrap();
        let broken = builder.alloc(first, node).unwrap();
        builder.alloc(first, node).unwrap();
        let d = builder.alloc(second, node).unwrap();
        builder.write_bytes(broken, &0xDEAD_BEE0u64.to_le_bytes()).unwrap();
        let session = attach(builder);

        let mut objects = session.enumerate_objects();
        let items: Vec<_> = objects.by_ref().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().address(), a);
        assert!(matches!(items[1], Err(Error::CorruptMetadata { .. })));
        assert_eq!(items[2].as_ref().unwrap().address(), d);
        assert_eq!(objects.error_count(), 1);
    }

    #[test]
    fn test_overrun_detected() {
        let mut builder = HeapImageBuilder::x64();
        let ints = builder.define_array("System.Int32[]", ElementKind::I4, Address::NULL);
        let segment = builder.segment(SegmentKind::Small);
        let array = builder.alloc_array(segment, ints, 4).unwrap();
        // Claim far more elements than the segment holds
        builder
            .write_bytes(array.offset(8).unwrap(), &1_000_000u32.to_le_bytes())
            .unwrap();
        let session = attach(builder);

        let items: Vec<_> = session.enumerate_objects().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_empty_and_truncated_segments() {
        let mut builder = HeapImageBuilder::x64();
        let node = builder.define_class("Sample.Node").build();
        let empty = builder.segment(SegmentKind::Small);
        let full = builder.segment(SegmentKind::Small);
        builder.alloc(full, node).unwrap();
        builder.alloc(full, node).unwrap();
        let (memory, mut segments) = builder.finish();
        assert_eq!(segments[empty].start, segments[empty].allocated);

        // end before allocated caps the walk
        segments[full].end = segments[full].start.offset(24).unwrap();
        let session = crate::Session::attach(memory, segments, crate::HeapConfig::x64()).unwrap();
        let items: Vec<_> = session.enumerate_objects().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }
}
