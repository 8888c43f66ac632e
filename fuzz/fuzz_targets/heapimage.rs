#![no_main]

use heapscope::{
    Address, GraphWalker, HeapConfig, MemoryBuffer, Segment, SegmentKind, Session,
};
use libfuzzer_sys::fuzz_target;

const BASE: u64 = 0x0000_0000_1000_0000;

// The input is mapped once as a heap segment and once as the metadata area its descriptor
// pointers land in, so arbitrary bytes exercise both header and descriptor decoding.
fuzz_target!(|data: &[u8]| {
    let mut memory = MemoryBuffer::new();
    memory.insert_region(Address::new(BASE), data.to_vec());
    memory.insert_region(Address::new(BASE * 2), data.to_vec());

    let end = Address::new(BASE + data.len() as u64);
    let segments = vec![Segment::new(Address::new(BASE + 8), end, end, SegmentKind::Small)];
    let config = HeapConfig::x64().with_max_string_length(4096);
    let Ok(session) = Session::attach(memory, segments, config) else {
        return;
    };

    for object in session.enumerate_objects().flatten().take(256) {
        let _ = object.enumerate_references();
        let _ = object.as_string();
        let _ = GraphWalker::new(&session).walk(&object);
    }
    let _ = session.statistics();
});
