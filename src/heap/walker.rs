use std::collections::HashSet;

use super::ClrObject;
use crate::{address::Address, session::Session};

/// Result of a graph traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphSize {
    /// Sum of the shallow sizes of every reached object
    pub bytes: u64,
    /// Number of distinct objects reached
    pub objects: usize,
    /// Referents, objects, fields and elements that could not be decoded
    pub skipped: usize,
}

/// Deduplicated traversal of the object graph below a root.
///
/// The walk uses an explicit work stack, so arbitrarily deep graphs do not grow the call
/// stack. The visited set lives for a single [`GraphWalker::walk`] call: every object is
/// counted once per walk, including in the presence of cycles and shared subgraphs.
///
/// Objects whose references cannot be decoded still contribute their own size, and a field or
/// element that cannot be decoded does not stop the scan of its siblings. Referents that
/// cannot be resolved contribute nothing. Every such failure is counted in
/// [`GraphSize::skipped`].
pub struct GraphWalker<'s> {
    session: &'s Session,
}

impl<'s> GraphWalker<'s> {
    /// Create a walker reading from `session`.
    #[must_use]
    pub fn new(session: &'s Session) -> Self {
        GraphWalker { session }
    }

    /// Walk every object reachable from `root`. A null root yields an empty result.
    #[must_use]
    pub fn walk(&self, root: &ClrObject<'s>) -> GraphSize {
        let mut result = GraphSize::default();
        if root.is_null() {
            return result;
        }

        let mut visited: HashSet<Address> = HashSet::new();
        let mut stack: Vec<ClrObject<'s>> = vec![root.clone()];
        visited.insert(root.address());

        while let Some(object) = stack.pop() {
            match object.size() {
                Ok(size) => {
                    result.bytes += size;
                    result.objects += 1;
                }
                Err(error) => {
                    tracing::debug!(address = %object.address(), error = %error, "unsized object");
                    result.skipped += 1;
                    continue;
                }
            }

            let mut references = Vec::new();
            let mut failures = Vec::new();
            if let Err(error) = object.collect_references(&mut references, &mut failures) {
                failures.push(error);
            }
            for error in failures {
                tracing::debug!(
                    address = %object.address(),
                    error = %error,
                    "unreadable references"
                );
                result.skipped += 1;
            }

            for target in references {
                if !visited.insert(target) {
                    continue;
                }
                match self.session.get_object(target) {
                    Ok(referent) => stack.push(referent),
                    Err(error) => {
                        tracing::debug!(address = %target, error = %error, "skipping referent");
                        result.skipped += 1;
                    }
                }
            }
        }

        result
    }
}
