//! # heapscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the heapscope library. Import this module to get quick access to everything needed
//! to attach to a heap image and inspect its objects.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all heapscope operations
pub use crate::Error;

/// The result type used throughout heapscope
pub use crate::Result;

/// Addresses in the target process
pub use crate::Address;

// ================================================================================================
// Sessions and Configuration
// ================================================================================================

/// Entry point binding a memory source, its segments and a configuration
pub use crate::Session;

/// Runtime geometry and safety limits
pub use crate::{HeapConfig, RuntimeLayout};

// ================================================================================================
// Memory Sources
// ================================================================================================

/// Byte sources addressed like the target process
pub use crate::{MappedImage, MemoryBuffer, MemorySource, MemorySourceExt};

// ================================================================================================
// Type System
// ================================================================================================

/// Decoded type descriptors and their element kinds
pub use crate::typesystem::{ClrType, ClrTypeRc, ElementKind, TypeCatalog};

// ================================================================================================
// Object Model and Traversal
// ================================================================================================

/// Object and value-type handles
pub use crate::heap::{ClrObject, ClrValueType, Primitive};

/// Segments and the heap walkers
pub use crate::heap::{
    GraphSize, GraphWalker, HeapEnumerator, HeapStatistics, Segment, SegmentKind, SegmentProvider,
    TypeStatistics,
};
