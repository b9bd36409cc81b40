//! Rollback of a single statement: undo one `(old, new)` replace across
//! whichever indexes a space's current replace behavior says must be kept
//! consistent.
//!
//! Built around an old/new tuple pair and replace-behavior dispatch rather
//! than a full MVCC conflict model.

use duskdb_core::{Index, ReplaceBehavior};
use tracing::instrument;

/// A cheaply-duplicated handle an `Index::Tuple` associated type can be.
/// Rollback needs to thread the same logical tuple through several
/// indexes and then update its reference count, without caring what the
/// handle actually wraps.
pub trait TupleHandle: Clone {
    /// Record that one more index now holds this tuple.
    fn retain(&self);
    /// Record that one index no longer holds this tuple.
    fn release(self);
}

/// Undo a single statement's effect on `indexes`, given the space's current
/// `behavior` and whether it is still mid-recovery.
///
/// - `AllKeys`: every index in `indexes` is reverted.
/// - `PrimaryOnly`: only `indexes[0]` (the primary key) is reverted.
/// - `NoneBuilt`: no index has been built yet; nothing to revert.
///
/// Indexes are reverted in reverse order, mirroring how they were applied
/// during the original statement. Rollback is disallowed while the space is
/// still mid-snapshot-recovery, and a failure to restore the prior tuple in
/// any index is treated as fatal: the database cannot otherwise guarantee
/// consistency.
///
/// # Panics
///
/// Panics if `recovering` is true, or if any index fails to report the
/// expected displaced tuple when `new` is replaced back with `old`.
#[instrument(skip(indexes, old, new))]
pub fn rollback_statement<T: TupleHandle>(
    indexes: &mut [&mut dyn Index<Tuple = T>],
    old: T,
    new: T,
    behavior: ReplaceBehavior,
    recovering: bool,
) {
    if recovering {
        panic!("rollback is disallowed while the space is still mid-snapshot-recovery");
    }

    let affected = match behavior {
        ReplaceBehavior::AllKeys => indexes.len(),
        ReplaceBehavior::PrimaryOnly => indexes.len().min(1),
        ReplaceBehavior::NoneBuilt => 0,
    };

    for index in indexes[..affected].iter_mut().rev() {
        let (_outcome, displaced) = index.replace(Some(new.clone()), old.clone(), true);
        if displaced.is_none() {
            panic!(
                "rollback failed to restore prior tuple in index; \
                 database consistency cannot be guaranteed"
            );
        }
    }

    old.retain();
    new.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use duskdb_core::{Generation, IndexDef, IndexType, ReplaceOutcome, SnapshotIterator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Handle {
        id: u32,
        refcount: Arc<AtomicUsize>,
    }

    impl TupleHandle for Handle {
        fn retain(&self) {
            self.refcount.fetch_add(1, Ordering::SeqCst);
        }
        fn release(self) {
            self.refcount.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// A test-double index whose `replace` just records what was asked of
    /// it and reports the key currently occupied as "displaced" (or `None`
    /// if told to fail, simulating corruption).
    struct FakeIndex {
        current: Option<u32>,
        fail: bool,
        calls: Vec<(Option<u32>, u32)>,
        def: IndexDef,
    }

    impl Index for FakeIndex {
        type Tuple = Handle;

        fn build(&mut self) {}
        fn end_build(&mut self) {}

        fn replace(
            &mut self,
            old: Option<Handle>,
            new: Handle,
            _allow_replace: bool,
        ) -> (ReplaceOutcome, Option<Handle>) {
            self.calls.push((old.as_ref().map(|h| h.id), new.id));
            if self.fail {
                return (ReplaceOutcome::Inserted, None);
            }
            let displaced = self.current.take().map(|id| Handle {
                id,
                refcount: Arc::new(AtomicUsize::new(1)),
            });
            self.current = Some(new.id);
            (ReplaceOutcome::Displaced, displaced)
        }

        fn size(&self) -> usize {
            self.current.is_some() as usize
        }

        fn create_snapshot_iterator(&self, _generation: Generation) -> Box<dyn SnapshotIterator> {
            unimplemented!("not exercised by rollback tests")
        }

        fn def(&self) -> &IndexDef {
            &self.def
        }
    }

    fn fake_def() -> IndexDef {
        IndexDef {
            index_type: IndexType::Tree,
            unique: false,
            func_id: None,
            parts: Vec::new(),
        }
    }

    fn handle(id: u32) -> Handle {
        Handle {
            id,
            refcount: Arc::new(AtomicUsize::new(1)),
        }
    }

    #[test]
    fn all_keys_reverts_every_index_in_reverse_order() {
        let mut primary = FakeIndex {
            current: Some(2),
            fail: false,
            calls: Vec::new(),
            def: fake_def(),
        };
        let mut secondary = FakeIndex {
            current: Some(2),
            fail: false,
            calls: Vec::new(),
            def: fake_def(),
        };
        let old = handle(1);
        let new = handle(2);

        let mut indexes: Vec<&mut dyn Index<Tuple = Handle>> = vec![&mut primary, &mut secondary];
        rollback_statement(&mut indexes, old.clone(), new.clone(), ReplaceBehavior::AllKeys, false);

        assert_eq!(secondary.calls, vec![(Some(2), 1)]);
        assert_eq!(primary.calls, vec![(Some(2), 1)]);
        assert_eq!(old.refcount.load(Ordering::SeqCst), 2);
        assert_eq!(new.refcount.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn primary_only_skips_secondary_indexes() {
        let mut primary = FakeIndex {
            current: Some(2),
            fail: false,
            calls: Vec::new(),
            def: fake_def(),
        };
        let mut secondary = FakeIndex {
            current: Some(2),
            fail: false,
            calls: Vec::new(),
            def: fake_def(),
        };
        let mut indexes: Vec<&mut dyn Index<Tuple = Handle>> = vec![&mut primary, &mut secondary];
        rollback_statement(
            &mut indexes,
            handle(1),
            handle(2),
            ReplaceBehavior::PrimaryOnly,
            false,
        );

        assert_eq!(primary.calls.len(), 1);
        assert!(secondary.calls.is_empty());
    }

    #[test]
    #[should_panic(expected = "mid-snapshot-recovery")]
    fn rollback_while_recovering_panics() {
        let mut primary = FakeIndex {
            current: Some(2),
            fail: false,
            calls: Vec::new(),
            def: fake_def(),
        };
        let mut indexes: Vec<&mut dyn Index<Tuple = Handle>> = vec![&mut primary];
        rollback_statement(&mut indexes, handle(1), handle(2), ReplaceBehavior::AllKeys, true);
    }

    #[test]
    #[should_panic(expected = "database consistency cannot be guaranteed")]
    fn failed_index_replace_panics() {
        let mut primary = FakeIndex {
            current: Some(2),
            fail: true,
            calls: Vec::new(),
            def: fake_def(),
        };
        let mut indexes: Vec<&mut dyn Index<Tuple = Handle>> = vec![&mut primary];
        rollback_statement(&mut indexes, handle(1), handle(2), ReplaceBehavior::AllKeys, false);
    }
}
