//! Lists: reverse-layout compound values, maplist lookup, and path
//! traversal.
//!
//! A list is a single `LIST(n)` header cell with its `n` payload cells
//! immediately below it (lower addresses). Construction happens on the
//! data stack in `Vm::close_list`; everything here is lookup and mutation
//! once a header address is known.

use tacitus_core::{Arena, TaggedValue};

use crate::error::ErrorKind;
use crate::refs;

/// A key in a `get`/`set` path: either a positional index or an interned
/// symbol handle compared by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKey {
    Index(u32),
    Symbol(u32),
}

pub fn header_slot_count(v: TaggedValue) -> Option<u32> {
    v.is_list().then(|| v.payload())
}

fn payload_span<'a>(arena: &'a Arena, header_cell: u32) -> Result<(&'a [TaggedValue], u32), ErrorKind> {
    let header = arena.read(header_cell)?;
    let n = header_slot_count(header)
        .ok_or_else(|| ErrorKind::TypeMismatch { expected: "list", found: "non-list" })?;
    Ok((arena.read_span(header_cell, n)?, n))
}

/// `find`: returns the address of the targeted element (index lookup), the
/// address of the matching pair's value (key lookup), the address of the
/// `default` pair's value on key miss, or `None` if nothing applies.
pub fn find(
    arena: &Arena,
    header_cell: u32,
    key: PathKey,
    default_handle: u32,
) -> Result<Option<TaggedValue>, ErrorKind> {
    let (span, n) = payload_span(arena, header_cell)?;
    let base = header_cell - n;

    match key {
        PathKey::Index(i) => {
            if i < n {
                Ok(Some(refs::create_ref(base + i)))
            } else {
                Ok(None)
            }
        }
        PathKey::Symbol(handle) => {
            let mut default_addr = None;
            let mut i = 0;
            while i + 1 < n {
                let key_cell = span[i as usize];
                if key_cell.is_string() {
                    if key_cell.payload() == handle {
                        return Ok(Some(refs::create_ref(base + i + 1)));
                    }
                    if key_cell.payload() == default_handle {
                        default_addr = Some(refs::create_ref(base + i + 1));
                    }
                }
                i += 2;
            }
            Ok(default_addr)
        }
    }
}

/// `get`: resolve the address `find` returns. `None` becomes `NIL`.
pub fn get(
    arena: &Arena,
    header_cell: u32,
    key: PathKey,
    default_handle: u32,
) -> Result<TaggedValue, ErrorKind> {
    match find(arena, header_cell, key, default_handle)? {
        Some(addr) => refs::resolve(arena, addr),
        None => Ok(TaggedValue::NIL),
    }
}

/// `set`: write `value` through the address `find` returns, enforcing
/// compound-write compatibility. Fails if the path has no target.
pub fn set(
    arena: &mut Arena,
    header_cell: u32,
    key: PathKey,
    default_handle: u32,
    value: TaggedValue,
    compound_payload: Option<&[TaggedValue]>,
) -> Result<(), ErrorKind> {
    let addr = find(arena, header_cell, key, default_handle)?
        .ok_or_else(|| ErrorKind::RefError("set: path has no target".to_string()))?;
    let target_cell = addr.payload();
    match compound_payload {
        Some(payload) => refs::store_compound(arena, target_cell, payload),
        None => refs::store_scalar(arena, target_cell, refs::resolve(arena, value)?),
    }
}

/// Walk a multi-key path by repeated `find`, descending into nested lists
/// (inline headers or single-hop refs to one) at every step but the last.
pub fn find_path(
    arena: &Arena,
    header_cell: u32,
    path: &[PathKey],
    default_handle: u32,
) -> Result<Option<TaggedValue>, ErrorKind> {
    let Some((last, rest)) = path.split_last() else {
        return Ok(Some(refs::create_ref(header_cell)));
    };

    let mut current = header_cell;
    for step in rest {
        let addr = match find(arena, current, *step, default_handle)? {
            Some(a) => a,
            None => return Ok(None),
        };
        let raw = arena.read(addr.payload())?;
        current = if raw.is_list() {
            addr.payload()
        } else if raw.is_ref() {
            raw.payload()
        } else {
            return Err(ErrorKind::TypeMismatch {
                expected: "list",
                found: "scalar",
            });
        };
    }
    find(arena, current, *last, default_handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacitus_core::ArenaConfig;

    fn build_list(arena: &mut Arena, values: &[TaggedValue]) -> u32 {
        for (i, v) in values.iter().enumerate() {
            arena.write(i as u32, *v).unwrap();
        }
        let header_cell = values.len() as u32;
        arena.write(header_cell, TaggedValue::list_header(values.len() as u32))
            .unwrap();
        header_cell
    }

    fn arena() -> Arena {
        Arena::new(ArenaConfig {
            global_capacity: 64,
            stack_capacity: 64,
            rstack_capacity: 16,
        })
    }

    #[test]
    fn index_find_returns_element_address() {
        let mut a = arena();
        let h = build_list(
            &mut a,
            &[
                TaggedValue::from_number(1.0),
                TaggedValue::from_number(2.0),
                TaggedValue::from_number(3.0),
            ],
        );
        let got = get(&a, h, PathKey::Index(0), 999).unwrap();
        assert_eq!(got.as_number(), Some(1.0));
    }

    #[test]
    fn index_out_of_range_is_nil() {
        let mut a = arena();
        let h = build_list(&mut a, &[TaggedValue::from_number(1.0)]);
        let got = get(&a, h, PathKey::Index(5), 999).unwrap();
        assert!(got.is_nil());
    }

    #[test]
    fn maplist_key_lookup_hits_default_on_miss() {
        let mut a = arena();
        let key_a = TaggedValue::string(1, false);
        let key_b = TaggedValue::string(2, false);
        let key_default = TaggedValue::string(3, false);
        let h = build_list(
            &mut a,
            &[
                key_a,
                TaggedValue::from_number(1.0),
                key_b,
                TaggedValue::from_number(2.0),
                key_default,
                TaggedValue::from_number(99.0),
            ],
        );
        let got = get(&a, h, PathKey::Symbol(42), 3).unwrap();
        assert_eq!(got.as_number(), Some(99.0));
    }

    #[test]
    fn maplist_key_lookup_hits_matching_key() {
        let mut a = arena();
        let key_a = TaggedValue::string(1, false);
        let h = build_list(&mut a, &[key_a, TaggedValue::from_number(10.0)]);
        let got = get(&a, h, PathKey::Symbol(1), 999).unwrap();
        assert_eq!(got.as_number(), Some(10.0));
    }

    #[test]
    fn set_overwrites_scalar_element() {
        let mut a = arena();
        let h = build_list(
            &mut a,
            &[TaggedValue::from_number(1.0), TaggedValue::from_number(2.0)],
        );
        set(&mut a, h, PathKey::Index(1), 999, TaggedValue::from_number(42.0), None).unwrap();
        assert_eq!(get(&a, h, PathKey::Index(1), 999).unwrap().as_number(), Some(42.0));
    }

    #[test]
    fn set_on_missing_path_fails() {
        let mut a = arena();
        let h = build_list(&mut a, &[TaggedValue::from_number(1.0)]);
        let err = set(&mut a, h, PathKey::Index(9), 999, TaggedValue::from_number(1.0), None);
        assert!(matches!(err, Err(ErrorKind::RefError(_))));
    }
}
