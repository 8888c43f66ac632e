//! Per-session cache of resolved types.
//!
//! The [`TypeCatalog`] maps type-descriptor addresses to [`ClrTypeRc`] values. A descriptor is
//! decoded at most once per session: the first resolution walks the descriptor, its field
//! table and its parent chain, every later resolution is a single map lookup that does not
//! touch the [`MemorySource`].
//!
//! # Thread Safety
//!
//! Storage is a `DashMap`, so a warmed catalog can be shared across threads. Two threads
//! racing to resolve the same descriptor both decode it, but only the first insert wins and
//! both receive the same `Arc`.
//!
//! # Failure Handling
//!
//! Decode failures are returned to the caller and never cached. Bulk operations treat them as
//! per-object errors, count them and move on.

use std::collections::HashSet;

use dashmap::DashMap;

use super::{ClrType, ClrTypeRc, MethodTableReader, RawTypeDescriptor, TypeDescriptorReader};
use crate::{address::Address, session::HeapConfig, source::MemorySource, Error, Result};

/// Cache of resolved types, keyed by descriptor address.
pub struct TypeCatalog {
    /// Decoder for the target runtime's descriptor layout
    reader: Box<dyn TypeDescriptorReader>,
    /// Resolved types
    types: DashMap<Address, ClrTypeRc>,
}

impl TypeCatalog {
    /// Create an empty catalog using the default [`MethodTableReader`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_reader(Box::new(MethodTableReader))
    }

    /// Create an empty catalog using a custom descriptor reader.
    #[must_use]
    pub fn with_reader(reader: Box<dyn TypeDescriptorReader>) -> Self {
        TypeCatalog {
            reader,
            types: DashMap::new(),
        }
    }

    /// Resolve the type described at `descriptor`.
    ///
    /// Parents are resolved (and cached) first, so their instance fields can be merged into the
    /// derived type.
    ///
    /// ## Arguments
    /// * 'source'     - Target memory
    /// * 'config'     - Layout and decode limits
    /// * 'descriptor' - Address of the type descriptor
    ///
    /// # Errors
    /// Returns [`crate::Error::CorruptMetadata`] if the descriptor or one of its parents cannot
    /// be decoded or the parent chain loops, and [`crate::Error::RecursionLimit`] if the parent
    /// chain is longer than [`HeapConfig::max_parent_depth`].
    pub fn resolve(
        &self,
        source: &dyn MemorySource,
        config: &HeapConfig,
        descriptor: Address,
    ) -> Result<ClrTypeRc> {
        if let Some(cached) = self.get(descriptor) {
            return Ok(cached);
        }

        // Decode upwards until a root or an already resolved ancestor.
        let mut pending: Vec<RawTypeDescriptor> = Vec::new();
        let mut seen = HashSet::new();
        let mut inherited: Option<ClrTypeRc> = None;
        let mut current = descriptor;
        while !current.is_null() {
            if let Some(cached) = self.get(current) {
                inherited = Some(cached);
                break;
            }
            if !seen.insert(current) {
                return Err(corrupt_metadata!(
                    "Parent chain of type descriptor {} loops at {}",
                    descriptor,
                    current
                ));
            }
            if pending.len() >= config.max_parent_depth {
                return Err(Error::RecursionLimit(config.max_parent_depth));
            }

            let raw = self.reader.read_descriptor(source, config, current)?;
            current = raw.parent;
            pending.push(raw);
        }

        // Build downwards, caching every ancestor on the way.
        let mut resolved = inherited;
        while let Some(raw) = pending.pop() {
            let address = raw.address;
            let parent_fields = resolved.as_ref().map_or(&[][..], |parent| parent.fields());
            let ty = ClrType::from_raw(raw, parent_fields)?;

            tracing::debug!(
                descriptor = %address,
                name = %ty.name,
                fields = ty.fields().len(),
                "resolved type"
            );

            let ty = self
                .types
                .entry(address)
                .or_insert_with(|| ClrTypeRc::new(ty))
                .clone();
            resolved = Some(ty);
        }

        resolved.ok_or_else(|| corrupt_metadata!("Null type descriptor"))
    }

    /// Cached type for `descriptor`, without decoding.
    #[must_use]
    pub fn get(&self, descriptor: Address) -> Option<ClrTypeRc> {
        self.types.get(&descriptor).map(|entry| entry.value().clone())
    }

    /// First cached type with the given name.
    ///
    /// Only types that have already been resolved are searched.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<ClrTypeRc> {
        self.types
            .iter()
            .find(|entry| entry.value().name == name)
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every cached type, in no particular order.
    #[must_use]
    pub fn types(&self) -> Vec<ClrTypeRc> {
        self.types.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of cached types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Drop every cached type.
    pub fn clear(&self) {
        self.types.clear();
    }
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCatalog")
            .field("types", &self.types.len())
            .finish_non_exhaustive()
    }
}
