//! The reference / dereference protocol: `DATA_REF` creation, single-hop
//! resolve, and write compatibility for compound values.

use tacitus_core::{Arena, TaggedValue};

use crate::error::ErrorKind;
use crate::list;

pub fn create_ref(cell: u32) -> TaggedValue {
    TaggedValue::data_ref(cell)
}

/// Read through `v` once if it is a ref; if that read is itself a ref,
/// follow exactly one more hop. A ref still standing after that second hop
/// is a cycle the protocol refuses to chase further.
pub fn resolve(arena: &Arena, v: TaggedValue) -> Result<TaggedValue, ErrorKind> {
    if !v.is_ref() {
        return Ok(v);
    }
    let first = arena.read(v.payload())?;
    if !first.is_ref() {
        return Ok(first);
    }
    let second = arena.read(first.payload())?;
    if second.is_ref() {
        return Err(ErrorKind::RefError(
            "ref chain exceeds the single-hop alias limit".to_string(),
        ));
    }
    Ok(second)
}

/// Write a non-compound value into a single cell. Unconditional: no
/// compatibility check applies to scalar writes.
pub fn store_scalar(arena: &mut Arena, target_cell: u32, value: TaggedValue) -> Result<(), ErrorKind> {
    arena.write(target_cell, value)?;
    Ok(())
}

/// Write a compound (list) value into the slot addressed by
/// `target_header_cell`. The existing occupant of that cell must already be
/// a `LIST` header with the same slot count; otherwise this is an
/// incompatible write and is rejected rather than silently dropped.
pub fn store_compound(
    arena: &mut Arena,
    target_header_cell: u32,
    new_payload: &[TaggedValue],
) -> Result<(), ErrorKind> {
    let existing = arena.read(target_header_cell)?;
    let existing_n = list::header_slot_count(existing).ok_or_else(|| {
        ErrorKind::Incompatible(format!(
            "cell {target_header_cell} does not hold a list header"
        ))
    })?;
    if existing_n as usize != new_payload.len() {
        return Err(ErrorKind::Incompatible(format!(
            "slot count mismatch: existing {existing_n}, new {}",
            new_payload.len()
        )));
    }
    for (i, cell_value) in new_payload.iter().enumerate() {
        let addr = target_header_cell - new_payload.len() as u32 + i as u32;
        arena.write(addr, *cell_value)?;
    }
    Ok(())
}
