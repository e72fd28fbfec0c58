use crate::core::error::Result;
use crate::index::key::StubIndexKey;
use crate::index::key_map::KeyMap;
use crate::stub::payload::IndexPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdate<K> {
    pub key: K,
    pub op: KeyOp,
}

/// Keys only in `old` are removed, keys only in `new` are added. Keys in
/// both produce nothing, whatever their values.
pub fn diff_key_maps<K: Clone, V>(old: &KeyMap<K, V>, new: &KeyMap<K, V>) -> Vec<KeyUpdate<K>> {
    let mut updates = Vec::new();
    for key in old.keys() {
        if !new.contains_key(key) {
            updates.push(KeyUpdate { key: key.clone(), op: KeyOp::Remove });
        }
    }
    for key in new.keys() {
        if !old.contains_key(key) {
            updates.push(KeyUpdate { key: key.clone(), op: KeyOp::Add });
        }
    }
    updates
}

/// Diff the blocks `key` owns in two payloads; a missing payload counts as
/// empty. Identical blocks are not decoded at all.
pub fn diff_payloads<K: Clone>(
    key: &StubIndexKey<K>,
    old: Option<&IndexPayload>,
    new: Option<&IndexPayload>,
) -> Result<Vec<KeyUpdate<K>>> {
    let old_block = old.and_then(|p| p.block(key.name()));
    let new_block = new.and_then(|p| p.block(key.name()));
    if old_block == new_block {
        return Ok(Vec::new());
    }

    let empty = IndexPayload::empty();
    let old_keys = old.unwrap_or(&empty).decode(key, None)?;
    let new_keys = new.unwrap_or(&empty).decode(key, None)?;
    Ok(diff_key_maps(&old_keys, &new_keys))
}
