use super::types::{Version, VersionedItem};

/// Monotonic delivery filter.
///
/// Forwards an item to its sink only when the item's version is strictly greater than the last
/// forwarded one. Retransmissions from either transport, and the overlap between the last push
/// updates and the first polls after a demotion, are absorbed here.
pub struct VersionGate<F> {
    last_delivered: Option<Version>,
    sink: F,
}

impl<F> VersionGate<F> {
    pub fn new(sink: F) -> Self {
        Self {
            last_delivered: None,
            sink,
        }
    }

    pub fn last_delivered(&self) -> Option<Version> {
        self.last_delivered
    }

    /// Whether `version` would currently be admitted.
    #[inline]
    pub fn is_newer(&self, version: Version) -> bool {
        self.last_delivered.map_or(true, |last| version > last)
    }

    /// Admit `(version, value)` if it is newer than anything delivered so far.
    ///
    /// Returns `false` without touching any state when the version is stale or a duplicate.
    pub fn admit<T>(&mut self, version: Version, value: Option<T>) -> bool
    where
        F: FnMut(VersionedItem<T>),
    {
        if !self.is_newer(version) {
            return false;
        }
        self.last_delivered = Some(version);
        (self.sink)(VersionedItem { version, value });
        true
    }
}

impl<F> std::fmt::Debug for VersionGate<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionGate")
            .field("last_delivered", &self.last_delivered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Seen = Rc<RefCell<Vec<VersionedItem<&'static str>>>>;

    fn recording_gate() -> (VersionGate<impl FnMut(VersionedItem<&'static str>)>, Seen) {
        let seen: Seen = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |item| seen.borrow_mut().push(item)
        };
        (VersionGate::new(sink), seen)
    }

    #[test]
    fn first_item_is_always_admitted() {
        let (mut gate, seen) = recording_gate();
        assert!(gate.admit(0, Some("a")));
        assert_eq!(gate.last_delivered(), Some(0));
        assert_eq!(seen.borrow().as_slice(), &[VersionedItem::present(0, "a")]);
    }

    #[test]
    fn equal_and_older_versions_are_dropped_silently() {
        let (mut gate, seen) = recording_gate();
        assert!(gate.admit(7, Some("x")));
        assert!(!gate.admit(7, Some("y")));
        assert!(!gate.admit(6, Some("z")));
        assert_eq!(gate.last_delivered(), Some(7));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn admitted_versions_are_strictly_increasing() {
        let (mut gate, seen) = recording_gate();
        for version in [5, 3, 5, 9, 8, 12, 12, 1, 13] {
            gate.admit(version, None::<&'static str>);
        }
        let versions: Vec<_> = seen.borrow().iter().map(|i| i.version).collect();
        assert_eq!(versions, vec![5, 9, 12, 13]);
    }

    #[test]
    fn absent_values_still_advance_the_version() {
        let (mut gate, seen) = recording_gate();
        assert!(gate.admit(4, None));
        assert!(!gate.admit(4, Some("late")));
        assert_eq!(seen.borrow().as_slice(), &[VersionedItem::absent(4)]);
    }
}
