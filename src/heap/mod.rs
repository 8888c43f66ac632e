//! Object model and heap traversal.
//!
//! # Key Components
//!
//! - [`ClrObject`] - Handle to a heap object with field, string and array decoding
//! - [`ClrValueType`] - View over inline or boxed value-type data
//! - [`Primitive`] - Host types a primitive field can be decoded into
//! - [`HeapEnumerator`] - Forward-only walk over every object of every segment
//! - [`GraphWalker`] - Deduplicated traversal summing the size of a reachable subgraph
//! - [`HeapStatistics`] - Per-type counts and sizes of the whole heap
//! - [`Segment`] / [`SegmentProvider`] - Description of the heap's address ranges
//!
//! # Object Layout
//!
//! An object's address points at its type descriptor pointer. The object header sits one
//! pointer below, instance field data starts one pointer above. Arrays and strings keep a
//! `u32` element count at [`crate::RuntimeLayout::length_offset`], followed by their payload.
//! The low bits of the descriptor pointer are used by the collector and are masked off before
//! the descriptor is resolved.

mod access;
mod enumerator;
mod object;
mod primitive;
mod segment;
mod stats;
mod valuetype;
mod walker;

pub use enumerator::HeapEnumerator;
pub use object::ClrObject;
pub use primitive::Primitive;
pub use segment::{Segment, SegmentKind, SegmentProvider};
pub use stats::{HeapStatistics, TypeStatistics};
pub use valuetype::ClrValueType;
pub use walker::{GraphSize, GraphWalker};

pub(crate) use stats::compute as compute_statistics;
