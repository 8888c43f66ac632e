use std::collections::HashMap;

use rayon::prelude::*;

use super::{HeapEnumerator, Segment};
use crate::{address::Address, session::Session};

/// Object count and total size of one type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeStatistics {
    /// Descriptor address of the type
    pub descriptor: Address,
    /// Type name
    pub name: String,
    /// Number of instances
    pub count: u64,
    /// Sum of the instances' sizes
    pub total_size: u64,
}

/// Per-type summary of the whole heap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    /// One entry per type, ordered by ascending total size, then name
    pub types: Vec<TypeStatistics>,
    /// Number of objects enumerated
    pub total_objects: u64,
    /// Sum of all object sizes
    pub total_size: u64,
    /// Number of corrupt headers met
    pub errors: usize,
}

impl HeapStatistics {
    /// Statistics entry for the type called `name`.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&TypeStatistics> {
        self.types.iter().find(|stats| stats.name == name)
    }
}

#[derive(Default)]
struct Partial {
    types: HashMap<Address, TypeStatistics>,
    errors: usize,
}

impl Partial {
    fn merge(mut self, other: Partial) -> Partial {
        for (descriptor, stats) in other.types {
            let entry = self.types.entry(descriptor).or_insert_with(|| TypeStatistics {
                count: 0,
                total_size: 0,
                ..stats.clone()
            });
            entry.count += stats.count;
            entry.total_size += stats.total_size;
        }
        self.errors += other.errors;
        self
    }
}

fn scan_segment(session: &Session, segment: &Segment) -> Partial {
    let mut partial = Partial::default();
    let mut objects = HeapEnumerator::new(session, std::slice::from_ref(segment));

    for object in objects.by_ref().flatten() {
        let Some(ty) = object.ty() else {
            continue;
        };
        let Some(size) = object
            .component_count()
            .ok()
            .and_then(|count| ty.instance_size(count, segment.alignment(session.layout())))
        else {
            partial.errors += 1;
            continue;
        };

        let entry = partial
            .types
            .entry(ty.descriptor)
            .or_insert_with(|| TypeStatistics {
                descriptor: ty.descriptor,
                name: ty.name.clone(),
                count: 0,
                total_size: 0,
            });
        entry.count += 1;
        entry.total_size += size;
    }

    partial.errors += objects.error_count();
    partial
}

/// Compute per-type statistics, scanning segments in parallel.
pub(crate) fn compute(session: &Session) -> HeapStatistics {
    let partial = session
        .segments()
        .par_iter()
        .map(|segment| scan_segment(session, segment))
        .reduce(Partial::default, Partial::merge);

    let mut types: Vec<TypeStatistics> = partial.types.into_values().collect();
    types.sort_by(|a, b| {
        a.total_size
            .cmp(&b.total_size)
            .then_with(|| a.name.cmp(&b.name))
    });

    tracing::debug!(types = types.len(), errors = partial.errors, "heap statistics");

    HeapStatistics {
        total_objects: types.iter().map(|stats| stats.count).sum(),
        total_size: types.iter().map(|stats| stats.total_size).sum(),
        errors: partial.errors,
        types,
    }
}
