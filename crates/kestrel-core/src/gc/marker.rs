//! Per-object collector bookkeeping

/// Collector marker of one live object, valid for one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GcMarker {
    /// References held by other live objects
    pub(crate) internal: u32,
    /// Reachable from a root
    pub(crate) referenced: bool,
    /// Member of a reference cycle
    pub(crate) in_cycle: bool,
}

impl GcMarker {
    /// Check whether the object is held from outside the object graph
    #[inline]
    pub(crate) fn is_root(&self, refs: u32) -> bool {
        refs > self.internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_needs_external_reference() {
        let marker = GcMarker {
            internal: 2,
            ..GcMarker::default()
        };
        assert!(!marker.is_root(2));
        assert!(marker.is_root(3));
        assert!(!marker.is_root(0));
    }
}
