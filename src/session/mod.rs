//! Heap inspection sessions.
//!
//! A [`Session`] binds everything needed to interpret one heap: the [`MemorySource`] holding
//! the bytes, the segment list describing where objects live, the [`HeapConfig`] describing the
//! runtime's geometry, and the [`TypeCatalog`] caching decoded type descriptors. Every object
//! handle borrows the session it came from, so the catalog is released exactly when the
//! session is dropped or [`Session::detach`]ed.
//!
//! # Example
//!
//! ```rust,no_run
//! use heapscope::prelude::*;
//!
//! let image = MappedImage::open("gen0.bin", Address::new(0x0000_0000_03d7_0000))?;
//! let segments = vec![Segment::new(
//!     Address::new(0x0000_0000_03d7_0008),
//!     Address::new(0x0000_0000_03e7_0000),
//!     Address::new(0x0000_0000_03e6_8000),
//!     SegmentKind::Small,
//! )];
//!
//! let session = Session::attach(image, segments, HeapConfig::x64())?;
//! for object in session.enumerate_objects().flatten() {
//!     println!("{object}");
//! }
//! session.detach();
//! # Ok::<(), heapscope::Error>(())
//! ```

mod config;

use std::sync::Arc;

pub use config::{HeapConfig, RuntimeLayout};
use widestring::U16String;

use crate::{
    address::Address,
    heap::{
        compute_statistics, ClrObject, HeapEnumerator, HeapStatistics, Segment, SegmentProvider,
    },
    source::{MemorySource, MemorySourceExt},
    typesystem::{ClrTypeRc, TypeCatalog, TypeDescriptorReader},
    Error, Result,
};

/// An attached heap.
///
/// Sessions are `Send + Sync`: the catalog is a concurrent map, so one session can serve
/// readers on several threads. [`Session::statistics`] uses this to scan segments in parallel.
pub struct Session {
    source: Arc<dyn MemorySource>,
    segments: Vec<Segment>,
    config: HeapConfig,
    catalog: TypeCatalog,
}

impl Session {
    /// Attach to a heap using the default descriptor reader.
    ///
    /// ## Arguments
    /// * 'source'   - Target memory
    /// * 'segments' - Heap layout
    /// * 'config'   - Runtime geometry and decode limits
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidConfig`] if `config` fails validation, and
    /// [`crate::Error::InvalidSegment`] if a segment is malformed or two segments overlap.
    pub fn attach<S, P>(source: S, segments: P, config: HeapConfig) -> Result<Session>
    where
        S: MemorySource + 'static,
        P: SegmentProvider,
    {
        Self::attach_with_catalog(source, segments, config, TypeCatalog::new())
    }

    /// Attach to a heap, decoding type descriptors with a custom reader.
    ///
    /// # Errors
    /// See [`Session::attach`].
    pub fn attach_with_reader<S, P>(
        source: S,
        segments: P,
        config: HeapConfig,
        reader: Box<dyn TypeDescriptorReader>,
    ) -> Result<Session>
    where
        S: MemorySource + 'static,
        P: SegmentProvider,
    {
        Self::attach_with_catalog(source, segments, config, TypeCatalog::with_reader(reader))
    }

    fn attach_with_catalog<S, P>(
        source: S,
        segments: P,
        config: HeapConfig,
        catalog: TypeCatalog,
    ) -> Result<Session>
    where
        S: MemorySource + 'static,
        P: SegmentProvider,
    {
        config.validate()?;
        let segments = segments.segments()?;
        for segment in &segments {
            segment.validate()?;
        }

        let mut sorted: Vec<&Segment> = segments.iter().collect();
        sorted.sort_by_key(|segment| segment.start);
        for pair in sorted.windows(2) {
            if pair[1].start < pair[0].walk_end() {
                return Err(Error::InvalidSegment(format!(
                    "segments at {} and {} overlap",
                    pair[0].start, pair[1].start
                )));
            }
        }

        tracing::info!(
            segments = segments.len(),
            pointer_size = config.layout.pointer_size,
            "attached heap session"
        );

        Ok(Session {
            source: Arc::new(source),
            segments,
            config,
            catalog,
        })
    }

    /// Tear the session down, releasing the type cache.
    pub fn detach(self) {
        tracing::info!(types = self.catalog.len(), "detaching heap session");
        self.catalog.clear();
    }

    /// The memory source.
    #[must_use]
    pub fn source(&self) -> &dyn MemorySource {
        self.source.as_ref()
    }

    /// The heap's segments, in enumeration order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The runtime geometry.
    #[must_use]
    pub fn layout(&self) -> &RuntimeLayout {
        &self.config.layout
    }

    /// The type cache.
    #[must_use]
    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// Resolve the type described at `descriptor`, through the cache.
    ///
    /// # Errors
    /// Returns [`crate::Error::CorruptMetadata`] if the descriptor cannot be decoded.
    pub fn resolve_type(&self, descriptor: Address) -> Result<ClrTypeRc> {
        self.catalog
            .resolve(self.source.as_ref(), &self.config, descriptor)
    }

    /// Descriptor address stored in the header of the object at `address`, mark bits cleared.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the header is not backed.
    pub fn descriptor_of(&self, address: Address) -> Result<Address> {
        let layout = self.layout();
        let raw = self.source.read_pointer(address, layout.pointer_size)?;
        Ok(Address::new(raw.value() & layout.descriptor_mask))
    }

    /// The object at `address`, typed from its own header. Null yields the null sentinel.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the header is not backed, and
    /// [`crate::Error::CorruptMetadata`] if its type cannot be resolved.
    pub fn get_object(&self, address: Address) -> Result<ClrObject<'_>> {
        if address.is_null() {
            return Ok(ClrObject::null(self));
        }

        let descriptor = self.descriptor_of(address)?;
        let ty = self.resolve_type(descriptor)?;
        Ok(ClrObject::new(self, address, ty))
    }

    /// Decode the string object at `address` as exact UTF-16 code units.
    ///
    /// Strings longer than [`HeapConfig::max_string_length`] are truncated.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotMapped`] if the length or the characters are not backed.
    pub fn get_string_utf16(&self, address: Address) -> Result<U16String> {
        let layout = self.layout();
        let length = self
            .source
            .read_value::<u32>(address.offset(layout.length_offset)?)? as usize;

        let count = if length > self.config.max_string_length {
            tracing::debug!(
                address = %address,
                length,
                limit = self.config.max_string_length,
                "truncating string"
            );
            self.config.max_string_length
        } else {
            length
        };
        if count == 0 {
            return Ok(U16String::new());
        }

        let bytes = self
            .source
            .read_bytes(address.offset(layout.string_data_offset)?, count * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(U16String::from_vec(units))
    }

    /// Decode the string object at `address`, replacing unpaired surrogates.
    ///
    /// # Errors
    /// See [`Session::get_string_utf16`].
    pub fn get_string_value(&self, address: Address) -> Result<String> {
        Ok(self.get_string_utf16(address)?.to_string_lossy())
    }

    /// The segment whose walkable range contains `address`.
    #[must_use]
    pub fn segment_of(&self, address: Address) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|segment| segment.contains(address))
    }

    /// Start a fresh pass over every object on the heap.
    #[must_use]
    pub fn enumerate_objects(&self) -> HeapEnumerator<'_> {
        HeapEnumerator::new(self, &self.segments)
    }

    /// Per-type counts and sizes of the whole heap.
    #[must_use]
    pub fn statistics(&self) -> HeapStatistics {
        compute_statistics(self)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("segments", &self.segments)
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
