//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    address::Address,
    builder::HeapImageBuilder,
    heap::SegmentKind,
    session::{HeapConfig, Session},
    source::{MemoryBuffer, MemorySource},
    typesystem::ElementKind,
    Result,
};

/// A [`MemorySource`] that counts every read it serves.
pub struct CountingSource<S> {
    inner: S,
    reads: AtomicUsize,
}

impl<S: MemorySource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        CountingSource {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl<S: MemorySource> MemorySource for CountingSource<S> {
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read(address, buf)
    }

    fn is_mapped(&self, address: Address, length: usize) -> bool {
        self.inner.is_mapped(address, length)
    }
}

/// A name blob as stored in target memory.
pub fn name_blob(name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut blob = (units.len() as u32).to_le_bytes().to_vec();
    for unit in units {
        blob.extend_from_slice(&unit.to_le_bytes());
    }
    blob
}

/// Fixed part of a 64-bit type descriptor.
pub fn descriptor_bytes(
    word: u32,
    base_size: u32,
    kind: ElementKind,
    component_kind: ElementKind,
    field_count: u16,
    field_data_size: u32,
    pointers: [u64; 4],
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(0x30);
    bytes.extend_from_slice(&word.to_le_bytes());
    bytes.extend_from_slice(&base_size.to_le_bytes());
    bytes.push(kind.tag());
    bytes.push(component_kind.tag());
    bytes.extend_from_slice(&field_count.to_le_bytes());
    bytes.extend_from_slice(&field_data_size.to_le_bytes());
    for pointer in pointers {
        bytes.extend_from_slice(&pointer.to_le_bytes());
    }
    bytes
}

/// Values stored in the carrier object of [`carrier_heap`].
pub const HELLO_WORLD: &str = "Hello World";
pub const ONE_LARGER_MAX_INT: i64 = i32::MAX as i64 + 1;
pub const SOME_ENUM: i32 = 2;
pub const BIRTHDAY_TICKS: u64 = 0x08D7_2A3C_1F3E_0000;
pub const SAMPLE_GUID: [u8; 16] = [
    0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x78, 0x56, 0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56,
    0x78,
];

/// A heap with one object exercising every field flavour.
pub struct CarrierHeap {
    pub session: Session,
    pub carrier: Address,
    pub hello: Address,
    pub sample: Address,
}

/// Build a small heap around a `PrimitiveTypeCarrier` instance.
///
/// The carrier holds a bool, a long, an enum, a string, a reference to a `SamplePointerType`,
/// a `System.DateTime`, a `System.Guid` and a null `_next` reference.
pub fn carrier_heap() -> CarrierHeap {
    let mut builder = HeapImageBuilder::x64();

    let date_time = builder
        .define_value_type("System.DateTime")
        .field("_dateData", ElementKind::U8)
        .build();
    let guid = builder
        .define_value_type("System.Guid")
        .field("_a", ElementKind::I4)
        .field("_b", ElementKind::I2)
        .field("_c", ElementKind::I2)
        .field("_d", ElementKind::U1)
        .field("_e", ElementKind::U1)
        .field("_f", ElementKind::U1)
        .field("_g", ElementKind::U1)
        .field("_h", ElementKind::U1)
        .field("_i", ElementKind::U1)
        .field("_j", ElementKind::U1)
        .field("_k", ElementKind::U1)
        .build();
    let enum_type = builder.define_enum("ClrObjectConnection.EnumType", ElementKind::I4);
    let sample_type = builder
        .define_class("SamplePointerType")
        .field("_id", ElementKind::I4)
        .build();
    let string_type = builder.string_type();
    let carrier_type = builder
        .define_class("PrimitiveTypeCarrier")
        .field("TrueBool", ElementKind::Boolean)
        .field("OneLargerMaxInt", ElementKind::I8)
        .typed_field("SomeEnum", ElementKind::I4, enum_type)
        .typed_field("HelloWorldString", ElementKind::String, string_type)
        .typed_field("SamplePointer", ElementKind::Class, sample_type)
        .value_field("Birthday", date_time)
        .value_field("SampleGuid", guid)
        .field("_next", ElementKind::Class)
        .field("_handle", ElementKind::I)
        .static_field("s_count", ElementKind::I4)
        .build();

    let segment = builder.segment(SegmentKind::Small);
    let carrier = builder.alloc(segment, carrier_type).unwrap();
    let hello = builder.alloc_string(segment, HELLO_WORLD).unwrap();
    let sample = builder.alloc(segment, sample_type).unwrap();

    builder.set_field(carrier, "TrueBool", 1u8).unwrap();
    builder
        .set_field(carrier, "OneLargerMaxInt", ONE_LARGER_MAX_INT)
        .unwrap();
    builder.set_field(carrier, "SomeEnum", SOME_ENUM).unwrap();
    builder.set_reference(carrier, "HelloWorldString", hello).unwrap();
    builder.set_reference(carrier, "SamplePointer", sample).unwrap();
    builder
        .set_field(carrier, "Birthday._dateData", BIRTHDAY_TICKS)
        .unwrap();
    let guid_address = builder.field_address(carrier, "SampleGuid").unwrap();
    builder.write_bytes(guid_address, &SAMPLE_GUID).unwrap();
    builder.set_field(carrier, "_handle", 0x7ff9_0000_1000u64).unwrap();
    builder.set_field(sample, "_id", 42i32).unwrap();

    let (memory, segments) = builder.finish();
    CarrierHeap {
        session: Session::attach(memory, segments, HeapConfig::x64()).unwrap(),
        carrier,
        hello,
        sample,
    }
}

/// An attached session over a builder's output.
pub fn attach(builder: HeapImageBuilder) -> Session {
    let config = HeapConfig::new().with_layout(builder.layout().clone());
    let (memory, segments): (MemoryBuffer, _) = builder.finish();
    Session::attach(memory, segments, config).unwrap()
}
