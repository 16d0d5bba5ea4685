//! The symbol dictionary: a linked chain of `[prev, value, name]` records
//! appended to the globals region, most-recent first.
//!
//! Three flavors of entry share this one record shape:
//! - builtins and colon-defined functions: `value` is a `BUILTIN` or `CODE`
//!   tagged value.
//! - transient locals: `value` is a *local marker* — a `SENTINEL` value
//!   with `meta=1` carrying the BP-relative slot number as its payload.
//!   This reuses the otherwise-idle `SENTINEL` tag rather than widening the
//!   core tag set for a VM-internal bookkeeping detail.
//!
//! `HIDDEN` entries (shadowed locals, typically) are skipped by `lookup`
//! but still occupy dictionary space until `revert` rewinds past them.

use tacitus_core::{Arena, ArenaError, Tag, TaggedValue};

use crate::digest::Digest;

/// Marks a dictionary value cell as a transient local rather than an
/// executable or data value.
pub fn local_marker(slot: u32) -> TaggedValue {
    TaggedValue::make_tagged(Tag::Sentinel, true, slot)
}

pub fn is_local_marker(v: TaggedValue) -> bool {
    matches!(v.tag(), Some(Tag::Sentinel)) && v.meta()
}

pub fn local_slot(v: TaggedValue) -> Option<u32> {
    is_local_marker(v).then(|| v.payload())
}

#[derive(Debug, Clone, Copy)]
pub struct DictMark {
    pub head: TaggedValue,
    pub gp: u32,
}

#[derive(Debug)]
pub struct Dictionary {
    head: TaggedValue,
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary { head: TaggedValue::NIL }
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary::default()
    }

    pub fn mark(&self, gp: u32) -> DictMark {
        DictMark { head: self.head, gp }
    }

    pub fn revert(&mut self, mark: DictMark) -> u32 {
        self.head = mark.head;
        mark.gp
    }

    /// Append a three-cell entry at `*gp`, advancing it by three. Returns
    /// the cell index of the new entry's first (`prev`) cell.
    pub fn define(
        &mut self,
        arena: &mut Arena,
        gp: &mut u32,
        name_handle: u32,
        value: TaggedValue,
        hidden: bool,
    ) -> Result<u32, ArenaError> {
        let entry = *gp;
        let requested = entry + 3;
        if requested > arena.global_top() {
            return Err(ArenaError::RegionFull {
                region: "global",
                requested,
                capacity: arena.global_top(),
            });
        }
        arena.write(entry, self.head)?;
        arena.write(entry + 1, value)?;
        arena.write(entry + 2, TaggedValue::string(name_handle, hidden))?;
        *gp += 3;
        self.head = TaggedValue::data_ref(entry);
        Ok(entry)
    }

    /// Linear walk from the head, returning the value of the first
    /// non-hidden entry whose name matches `name_handle`; `None` on miss.
    pub fn lookup(
        &self,
        arena: &Arena,
        digest: &Digest,
        name_handle: u32,
    ) -> Result<Option<TaggedValue>, ArenaError> {
        Ok(self
            .lookup_entry(arena, digest, name_handle)?
            .map(|entry| arena.read(entry + 1))
            .transpose()?)
    }

    /// Like `lookup`, but returns the entry's first (`prev`) cell address
    /// rather than its value — callers that need `&name`-style addressing
    /// derive the value cell as `entry + 1`.
    pub fn lookup_entry(
        &self,
        arena: &Arena,
        digest: &Digest,
        name_handle: u32,
    ) -> Result<Option<u32>, ArenaError> {
        let _ = digest; // identity comparison is by handle, not text
        let mut cur = self.head;
        while cur.is_ref() {
            let entry = cur.payload();
            let name_cell = arena.read(entry + 2)?;
            if name_cell.payload() == name_handle && !name_cell.meta() {
                return Ok(Some(entry));
            }
            cur = arena.read(entry)?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacitus_core::ArenaConfig;

    fn setup() -> (Arena, Dictionary, u32) {
        let arena = Arena::new(ArenaConfig {
            global_capacity: 64,
            stack_capacity: 16,
            rstack_capacity: 16,
        });
        (arena, Dictionary::new(), 0)
    }

    #[test]
    fn define_then_lookup_finds_value() {
        let (mut arena, mut dict, mut gp) = setup();
        let digest = Digest::new();
        dict.define(&mut arena, &mut gp, 7, TaggedValue::code(100, false), false)
            .unwrap();
        let found = dict.lookup(&arena, &digest, 7).unwrap();
        assert_eq!(found, Some(TaggedValue::code(100, false)));
    }

    #[test]
    fn lookup_miss_returns_none() {
        let (arena, dict, _gp) = setup();
        let digest = Digest::new();
        assert_eq!(dict.lookup(&arena, &digest, 42).unwrap(), None);
    }

    #[test]
    fn define_past_global_capacity_reports_region_full() {
        let mut arena = Arena::new(ArenaConfig {
            global_capacity: 3,
            stack_capacity: 16,
            rstack_capacity: 16,
        });
        let mut dict = Dictionary::new();
        let mut gp = 0;
        // the one entry that exactly fills the 3-cell global region succeeds
        dict.define(&mut arena, &mut gp, 1, TaggedValue::code(10, false), false)
            .unwrap();
        let err = dict.define(&mut arena, &mut gp, 2, TaggedValue::code(20, false), false);
        assert!(matches!(
            err,
            Err(ArenaError::RegionFull { region: "global", requested: 6, capacity: 3 })
        ));
    }

    #[test]
    fn shadowing_returns_most_recent_definition() {
        let (mut arena, mut dict, mut gp) = setup();
        let digest = Digest::new();
        dict.define(&mut arena, &mut gp, 1, TaggedValue::code(10, false), false)
            .unwrap();
        dict.define(&mut arena, &mut gp, 1, TaggedValue::code(20, false), false)
            .unwrap();
        let found = dict.lookup(&arena, &digest, 1).unwrap();
        assert_eq!(found, Some(TaggedValue::code(20, false)));
    }

    #[test]
    fn hidden_entries_are_skipped() {
        let (mut arena, mut dict, mut gp) = setup();
        let digest = Digest::new();
        dict.define(&mut arena, &mut gp, 1, TaggedValue::code(10, false), true)
            .unwrap();
        assert_eq!(dict.lookup(&arena, &digest, 1).unwrap(), None);
    }

    #[test]
    fn mark_and_revert_removes_entries_added_since() {
        let (mut arena, mut dict, mut gp) = setup();
        let digest = Digest::new();
        dict.define(&mut arena, &mut gp, 1, TaggedValue::code(10, false), false)
            .unwrap();
        let mark = dict.mark(gp);
        dict.define(&mut arena, &mut gp, 2, TaggedValue::code(20, false), false)
            .unwrap();
        assert!(dict.lookup(&arena, &digest, 2).unwrap().is_some());
        gp = dict.revert(mark);
        assert_eq!(dict.lookup(&arena, &digest, 2).unwrap(), None);
        assert!(dict.lookup(&arena, &digest, 1).unwrap().is_some());
        assert_eq!(gp, mark.gp);
    }

    #[test]
    fn local_marker_round_trips_slot_number() {
        let v = local_marker(5);
        assert!(is_local_marker(v));
        assert_eq!(local_slot(v), Some(5));
        assert!(!is_local_marker(TaggedValue::code(1, false)));
    }
}
