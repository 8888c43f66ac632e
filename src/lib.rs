// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'source/mapped.rs' uses mmap to map an image file into memory

//! # heapscope
//!
//! [![Crates.io](https://img.shields.io/crates/v/heapscope.svg)](https://crates.io/crates/heapscope)
//! [![Documentation](https://docs.rs/heapscope/badge.svg)](https://docs.rs/heapscope)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/heapscope/blob/main/LICENSE-APACHE)
//!
//! A cross-platform library for inspecting the managed heap of a .NET process from a raw memory
//! image, such as a crash dump or a snapshot of a live process. Built in pure Rust, `heapscope`
//! decodes runtime type descriptors, exposes every heap object as a typed handle, walks the heap
//! segment by segment, and computes the retained size of object graphs without requiring the
//! .NET runtime or a debugger engine.
//!
//! ## Features
//!
//! - **Pluggable memory** - Any byte source addressed like the target process, from an in-memory
//!   buffer to a memory-mapped dump file
//! - **Typed object model** - Primitive, string, reference, value-type, enum and array access by
//!   field name with kind checking
//! - **Type catalog** - Descriptors are decoded once per session and shared between objects
//! - **Heap enumeration** - Forward-only walks that stop a segment at the first corrupt header
//!   instead of wandering into garbage
//! - **Graph sizing** - Deduplicated, cycle-safe traversal of arbitrarily deep object graphs
//! - **Parallel statistics** - Per-type counts and sizes computed across segments with `rayon`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heapscope::prelude::*;
//!
//! let image = MappedImage::open("heap.bin", Address::new(0x0000_0000_0200_0000))?;
//! let segments = vec![Segment::new(
//!     Address::new(0x0000_0000_0200_0008),
//!     Address::new(0x0000_0000_0300_0000),
//!     Address::new(0x0000_0000_02f0_0000),
//!     SegmentKind::Small,
//! )];
//! let session = Session::attach(image, segments, HeapConfig::x64())?;
//!
//! for object in session.enumerate_objects().flatten() {
//!     if object.type_name() == Some("System.String") {
//!         println!("{}: {}", object.address(), object.as_string()?);
//!     }
//! }
//!
//! let stats = session.statistics();
//! for entry in stats.types.iter().rev().take(10) {
//!     println!("{:>10} {:>12} {}", entry.count, entry.total_size, entry.name);
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`source`] - The [`MemorySource`] abstraction and its buffer and file-backed implementations
//! - [`typesystem`] - Type descriptor decoding and the per-session [`TypeCatalog`]
//! - [`heap`] - Object handles, enumeration, graph walking and statistics
//! - [`session`] - The [`Session`] tying a source, its segments and a [`HeapConfig`] together
//! - [`builder`] - Synthesis of heap images for tests and tooling
//!
//! Every fallible operation returns [`Result`]; corrupt or unreadable target memory never panics.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use heapscope::prelude::*;
///
/// let image = MappedImage::open("heap.bin", Address::new(0x0200_0000))?;
/// let segments = vec![Segment::new(
///     Address::new(0x0200_0008),
///     Address::new(0x0300_0000),
///     Address::new(0x0300_0000),
///     SegmentKind::Small,
/// )];
/// let session = Session::attach(image, segments, HeapConfig::x64())?;
/// println!("{} objects", session.enumerate_objects().count());
/// # Ok::<(), heapscope::Error>(())
/// ```
pub mod prelude;

/// Target addresses.
pub mod address;

/// Construction of synthetic heap images.
pub mod builder;

/// Object model, enumeration and graph traversal over a managed heap.
pub mod heap;

/// Inspection sessions and their configuration.
pub mod session;

/// Readable views of the target's address space.
///
/// # Key Components
///
/// - [`MemorySource`] - Random-access reads at target addresses
/// - [`MemoryBuffer`] - Sparse in-memory image made of regions
/// - [`MappedImage`] - A memory-mapped file loaded at a base address
/// - [`source::io`] / [`source::parser`] - Little-endian decoding helpers
pub mod source;

/// Runtime type descriptors and their per-session cache.
pub mod typesystem;

/// `heapscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Address, Result, Session};
///
/// fn greeting(session: &Session, address: Address) -> Result<String> {
///     session.get_string_value(address)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `heapscope` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Address, Error, Session};
///
/// fn describe(session: &Session, address: Address) {
///     match session.get_object(address) {
///         Ok(object) => println!("{object}"),
///         Err(Error::NotMapped(at)) => println!("{at} is not part of the image"),
///         Err(Error::CorruptMetadata { message, .. }) => println!("corrupt: {message}"),
///         Err(e) => println!("error: {e}"),
///     }
/// }
/// ```
pub use error::Error;

pub use address::Address;
pub use heap::{
    ClrObject, ClrValueType, GraphSize, GraphWalker, HeapEnumerator, HeapStatistics, Primitive,
    Segment, SegmentKind, SegmentProvider, TypeStatistics,
};
pub use session::{HeapConfig, RuntimeLayout, Session};
pub use source::{MappedImage, MemoryBuffer, MemorySource, MemorySourceExt};
pub use typesystem::{ClrType, ClrTypeRc, ElementKind, TypeCatalog, TypeDescriptorReader};
