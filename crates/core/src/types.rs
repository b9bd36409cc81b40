//! Identifiers and small value types shared across the engine.

use std::fmt;

/// Identifier for a space (a named collection of indexes; index 0 is primary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space#{}", self.0)
    }
}

/// Identifier for an index within a space. Index 0 is always primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(pub u32);

impl IndexId {
    /// The primary index of any space.
    pub const PRIMARY: IndexId = IndexId(0);

    /// Whether this is the primary index.
    pub fn is_primary(&self) -> bool {
        self.0 == 0
    }
}

/// Monotonically increasing 32-bit snapshot-generation counter.
///
/// Incremented exactly once at the start of each checkpoint. A tuple's
/// generation stamp equals the engine's current generation at the instant
/// of allocation; a tuple whose generation is strictly less than the
/// *current* generation at free time is potentially visible to an
/// in-flight snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Generation(pub u32);

impl Generation {
    /// The initial generation of a freshly bootstrapped engine.
    pub const INITIAL: Generation = Generation(0);

    /// Returns the next generation in sequence.
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen:{}", self.0)
    }
}

/// A space's replace-behavior: which indexes a statement must keep
/// consistent, tracking which recovery phase a space is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceBehavior {
    /// No index is safe to mutate yet (mid snapshot-recovery build).
    NoneBuilt,
    /// Only the primary index is kept consistent (WAL replay into primary
    /// key only).
    PrimaryOnly,
    /// All indexes (primary and secondary) are kept consistent.
    AllKeys,
}

/// An index's storage flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Ordered tree index, supporting range scans.
    Tree,
    /// Unordered hash index, point lookups only.
    Hash,
}

/// String comparison rule applied to a part's field when ordering keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    /// Raw byte comparison.
    None,
    /// Unicode-aware, case-sensitive comparison.
    Unicode,
    /// Unicode-aware, case-insensitive comparison.
    UnicodeCaseInsensitive,
}

/// One key part of an index definition: which field it draws from, how it
/// orders values, and — for parts reaching into a document-typed field — the
/// JSON path selecting the value within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPart {
    /// Zero-based field number within the tuple this part reads.
    pub field_no: u32,
    /// Collation used to order this part's values.
    pub collation: Collation,
    /// JSON path into the field, or `None` if the field is the value itself.
    pub json_path: Option<String>,
}

/// An index's structural definition: everything about its shape that can
/// change independently of its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Storage flavor (tree or hash).
    pub index_type: IndexType,
    /// Whether the index rejects duplicate keys.
    pub unique: bool,
    /// Id of the function computing this index's key, for functional
    /// indexes, or `None` for a plain field-based index.
    pub func_id: Option<u32>,
    /// Key parts, in order.
    pub parts: Vec<IndexPart>,
}

/// Whether replacing `old` with `new` requires rebuilding an index from
/// scratch rather than reformatting it in place: true iff the index type
/// changed, uniqueness was added, the backing function id changed, the part
/// count changed, or any part differs by field number, collation, or JSON
/// path.
pub fn index_def_requires_rebuild(old: &IndexDef, new: &IndexDef) -> bool {
    if old.index_type != new.index_type {
        return true;
    }
    if !old.unique && new.unique {
        return true;
    }
    if old.func_id != new.func_id {
        return true;
    }
    if old.parts.len() != new.parts.len() {
        return true;
    }
    old.parts.iter().zip(new.parts.iter()).any(|(a, b)| {
        a.field_no != b.field_no || a.collation != b.collation || a.json_path != b.json_path
    })
}

/// A vector-clock signature identifying a checkpoint's position in the WAL.
///
/// Stored as a sparse map from replica id to the last LSN from that replica
/// observed at checkpoint time. Two vclocks compare equal iff every
/// component matches; this is used to detect that a checkpoint already
/// exists at this signature (the touch-only write optimization).
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Vclock(pub Vec<(u32, u64)>);

impl Vclock {
    /// Build a vclock from (replica_id, lsn) pairs.
    pub fn new(components: Vec<(u32, u64)>) -> Self {
        let mut v = components;
        v.sort_by_key(|(id, _)| *id);
        Vclock(v)
    }

    /// The LSN contributed by the given replica, or 0 if absent.
    pub fn component(&self, replica_id: u32) -> u64 {
        self.0
            .iter()
            .find(|(id, _)| *id == replica_id)
            .map(|(_, lsn)| *lsn)
            .unwrap_or(0)
    }

    /// A filename-safe rendering of this signature, e.g. `00000000000000000100`.
    pub fn signature_string(&self) -> String {
        // The primary replica's LSN (component 0) is used as the canonical
        // on-disk signature, covering the single-node case.
        format!("{:020}", self.component(0))
    }
}

impl fmt::Display for Vclock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (id, lsn)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", id, lsn)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_increments() {
        let g = Generation::INITIAL;
        assert_eq!(g.next(), Generation(1));
        assert_eq!(g.next().next(), Generation(2));
    }

    #[test]
    fn generation_ordering() {
        assert!(Generation(1) < Generation(2));
        assert!(Generation(0) == Generation::INITIAL);
    }

    #[test]
    fn vclock_equal_signatures_compare_equal() {
        let a = Vclock::new(vec![(0, 100), (1, 5)]);
        let b = Vclock::new(vec![(1, 5), (0, 100)]);
        assert_eq!(a, b);
    }

    #[test]
    fn vclock_component_defaults_to_zero() {
        let v = Vclock::new(vec![(1, 42)]);
        assert_eq!(v.component(0), 0);
        assert_eq!(v.component(1), 42);
    }

    #[test]
    fn vclock_signature_string_is_fixed_width() {
        let v = Vclock::new(vec![(0, 7)]);
        assert_eq!(v.signature_string(), "00000000000000000007");
    }

    #[test]
    fn index_primary_constant() {
        assert!(IndexId::PRIMARY.is_primary());
        assert!(!IndexId(1).is_primary());
    }

    fn tree_def(parts: Vec<IndexPart>) -> IndexDef {
        IndexDef {
            index_type: IndexType::Tree,
            unique: false,
            func_id: None,
            parts,
        }
    }

    fn part(field_no: u32) -> IndexPart {
        IndexPart {
            field_no,
            collation: Collation::None,
            json_path: None,
        }
    }

    #[test]
    fn identical_definitions_do_not_require_rebuild() {
        let def = tree_def(vec![part(0)]);
        assert!(!index_def_requires_rebuild(&def, &def.clone()));
    }

    #[test]
    fn differing_part_count_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let new = tree_def(vec![part(0), part(1)]);
        assert!(index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn differing_field_number_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let new = tree_def(vec![part(1)]);
        assert!(index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn differing_collation_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let mut new = tree_def(vec![part(0)]);
        new.parts[0].collation = Collation::Unicode;
        assert!(index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn differing_json_path_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let mut new = tree_def(vec![part(0)]);
        new.parts[0].json_path = Some("$.a".to_string());
        assert!(index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn index_type_change_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let mut new = tree_def(vec![part(0)]);
        new.index_type = IndexType::Hash;
        assert!(index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn adding_uniqueness_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let mut new = tree_def(vec![part(0)]);
        new.unique = true;
        assert!(index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn dropping_uniqueness_does_not_require_rebuild() {
        let mut old = tree_def(vec![part(0)]);
        old.unique = true;
        let new = tree_def(vec![part(0)]);
        assert!(!index_def_requires_rebuild(&old, &new));
    }

    #[test]
    fn backing_function_change_requires_rebuild() {
        let old = tree_def(vec![part(0)]);
        let mut new = tree_def(vec![part(0)]);
        new.func_id = Some(1);
        assert!(index_def_requires_rebuild(&old, &new));
    }
}
