//! Stack item wire form, exposed to scripts as `Runtime.Serialize` and
//! `Runtime.Deserialize`.
//!
//! Layout: one [`ItemType`](crate::vm::stack_item::ItemType) byte, then
//! - ByteArray: var-int length + bytes
//! - Boolean: one byte
//! - Integer: var-int length + canonical signed little-endian bytes
//! - Null: nothing
//! - Array / Struct: var-int count + serialized elements
//! - Map: var-int count + serialized key/value pairs
//!
//! Interop handles are not serializable; cyclic compounds fault (detected by
//! allocation identity, so sharing without a cycle is fine and flattens).

use crate::types::encoding::{read_bytes, read_var_int, write_var_int};
use crate::vm::VmLimits;
use crate::vm::errors::VmError;
use crate::vm::stack_item::{ItemType, MapKey, StackItem, bytes_to_int, int_to_bytes};
use std::collections::HashSet;
use std::rc::Rc;

/// Serializes `item`, bounded by the engine's item size cap.
pub fn serialize_item(item: &StackItem, limits: &VmLimits) -> Result<Vec<u8>, VmError> {
    let mut out = Vec::new();
    let mut visiting = HashSet::new();
    write_item(item, &mut out, &mut visiting, limits)?;
    if out.len() > limits.max_item_size {
        return Err(VmError::ItemTooLarge {
            size: out.len(),
            max: limits.max_item_size,
        });
    }
    Ok(out)
}

fn write_item(
    item: &StackItem,
    out: &mut Vec<u8>,
    visiting: &mut HashSet<usize>,
    limits: &VmLimits,
) -> Result<(), VmError> {
    out.push(item.item_type() as u8);
    match item {
        StackItem::Null => {}
        StackItem::Boolean(b) => out.push(*b as u8),
        StackItem::Integer(i) => {
            let bytes = int_to_bytes(i);
            write_var_int(out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
        StackItem::ByteArray(bytes) => {
            write_var_int(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        StackItem::Array(items) | StackItem::Struct(items) => {
            let ptr = Rc::as_ptr(items) as *const u8 as usize;
            if !visiting.insert(ptr) {
                return Err(VmError::CyclicItem);
            }
            let items = items.borrow();
            write_var_int(out, items.len() as u64);
            for element in items.iter() {
                write_item(element, out, visiting, limits)?;
            }
            visiting.remove(&ptr);
        }
        StackItem::Map(entries) => {
            let ptr = Rc::as_ptr(entries) as *const u8 as usize;
            if !visiting.insert(ptr) {
                return Err(VmError::CyclicItem);
            }
            let entries = entries.borrow();
            write_var_int(out, entries.len() as u64);
            for (key, value) in entries.iter() {
                write_item(&key.to_item(), out, visiting, limits)?;
                write_item(value, out, visiting, limits)?;
            }
            visiting.remove(&ptr);
        }
        StackItem::Interop(handle) => return Err(VmError::NotSerializable(handle.kind)),
    }

    // Fail early instead of building a huge buffer first.
    if out.len() > limits.max_item_size {
        return Err(VmError::ItemTooLarge {
            size: out.len(),
            max: limits.max_item_size,
        });
    }
    Ok(())
}

/// Deserializes an item produced by [`serialize_item`].
///
/// Reconstructed compounds are fresh allocations: shared references in the
/// original flatten into independent copies.
pub fn deserialize_item(data: &[u8], limits: &VmLimits) -> Result<StackItem, VmError> {
    let mut input = data;
    let item = read_item(&mut input, limits, 0)?;
    if !input.is_empty() {
        return Err(VmError::DeserializeFailed);
    }
    Ok(item)
}

fn read_item(input: &mut &[u8], limits: &VmLimits, depth: usize) -> Result<StackItem, VmError> {
    // Nesting deeper than the element cap cannot have been produced by
    // serialize_item.
    if depth > limits.max_array_size {
        return Err(VmError::DeserializeFailed);
    }

    let tag = read_bytes(input, 1)
        .map_err(|_| VmError::DeserializeFailed)?[0];
    match ItemType::try_from(tag)? {
        ItemType::Null => Ok(StackItem::Null),
        ItemType::Boolean => {
            let byte = read_bytes(input, 1).map_err(|_| VmError::DeserializeFailed)?[0];
            match byte {
                0 => Ok(StackItem::Boolean(false)),
                1 => Ok(StackItem::Boolean(true)),
                _ => Err(VmError::DeserializeFailed),
            }
        }
        ItemType::Integer => {
            let bytes = read_sized(input, limits)?;
            if bytes.len() * 8 > limits.max_bigint_bits as usize + 8 {
                return Err(VmError::DeserializeFailed);
            }
            Ok(StackItem::Integer(bytes_to_int(&bytes)))
        }
        ItemType::ByteArray => Ok(StackItem::ByteArray(read_sized(input, limits)?)),
        ItemType::Array | ItemType::Struct => {
            let count = read_count(input, limits)?;
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                items.push(read_item(input, limits, depth + 1)?);
            }
            Ok(if tag == ItemType::Array as u8 {
                StackItem::array(items)
            } else {
                StackItem::structure(items)
            })
        }
        ItemType::Map => {
            let count = read_count(input, limits)?;
            let map = StackItem::map();
            if let StackItem::Map(entries) = &map {
                let mut entries = entries.borrow_mut();
                for _ in 0..count {
                    let key = MapKey::from_item(read_item(input, limits, depth + 1)?)
                        .map_err(|_| VmError::DeserializeFailed)?;
                    let value = read_item(input, limits, depth + 1)?;
                    entries.insert(key, value);
                }
            }
            Ok(map)
        }
        ItemType::Interop => Err(VmError::DeserializeFailed),
    }
}

fn read_sized(input: &mut &[u8], limits: &VmLimits) -> Result<Vec<u8>, VmError> {
    let len = read_var_int(input).map_err(|_| VmError::DeserializeFailed)? as usize;
    if len > limits.max_item_size {
        return Err(VmError::ItemTooLarge {
            size: len,
            max: limits.max_item_size,
        });
    }
    Ok(read_bytes(input, len)
        .map_err(|_| VmError::DeserializeFailed)?
        .to_vec())
}

fn read_count(input: &mut &[u8], limits: &VmLimits) -> Result<usize, VmError> {
    let count = read_var_int(input).map_err(|_| VmError::DeserializeFailed)? as usize;
    if count > limits.max_array_size {
        return Err(VmError::ArraySizeExceeded {
            len: count,
            max: limits.max_array_size,
        });
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use std::cell::RefCell;

    fn roundtrip(item: &StackItem) -> StackItem {
        let limits = VmLimits::default();
        let bytes = serialize_item(item, &limits).expect("serialize");
        deserialize_item(&bytes, &limits).expect("deserialize")
    }

    fn assert_deep_equal(a: &StackItem, b: &StackItem) {
        match (a, b) {
            (StackItem::Array(x), StackItem::Array(y))
            | (StackItem::Struct(x), StackItem::Struct(y)) => {
                let x = x.borrow();
                let y = y.borrow();
                assert_eq!(x.len(), y.len());
                for (a, b) in x.iter().zip(y.iter()) {
                    assert_deep_equal(a, b);
                }
            }
            (StackItem::Map(x), StackItem::Map(y)) => {
                let x = x.borrow();
                let y = y.borrow();
                assert_eq!(x.len(), y.len());
                for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                    assert_eq!(ka, kb);
                    assert_deep_equal(va, vb);
                }
            }
            (a, b) => assert!(a.equals(b), "{a:?} != {b:?}"),
        }
    }

    #[test]
    fn primitives_roundtrip() {
        for item in [
            StackItem::Null,
            StackItem::Boolean(true),
            StackItem::Boolean(false),
            StackItem::from(0i64),
            StackItem::from(-123456789i64),
            StackItem::Integer(BigInt::from(1u128 << 100)),
            StackItem::ByteArray(vec![]),
            StackItem::ByteArray(vec![1, 2, 3]),
        ] {
            assert_deep_equal(&roundtrip(&item), &item);
        }
    }

    #[test]
    fn nested_compounds_roundtrip() {
        let map = StackItem::map();
        if let StackItem::Map(entries) = &map {
            entries.borrow_mut().insert(
                MapKey::ByteArray(b"key".to_vec()),
                StackItem::array(vec![StackItem::from(1i64), StackItem::Null]),
            );
            entries
                .borrow_mut()
                .insert(MapKey::Integer(BigInt::from(7)), StackItem::Boolean(true));
        }
        let outer = StackItem::structure(vec![map, StackItem::from(42i64)]);
        assert_deep_equal(&roundtrip(&outer), &outer);
    }

    #[test]
    fn interop_is_not_serializable() {
        use crate::vm::stack_item::InteropHandle;
        let item = StackItem::Interop(InteropHandle::new("thing", ()));
        let err = serialize_item(&item, &VmLimits::default());
        assert!(matches!(err, Err(VmError::NotSerializable("thing"))));
    }

    #[test]
    fn cyclic_item_faults() {
        let arr = Rc::new(RefCell::new(Vec::new()));
        arr.borrow_mut().push(StackItem::Array(arr.clone()));
        let cyclic = StackItem::Array(arr);

        let err = serialize_item(&cyclic, &VmLimits::default());
        assert!(matches!(err, Err(VmError::CyclicItem)));
    }

    #[test]
    fn shared_subtree_flattens_without_fault() {
        let shared = StackItem::array(vec![StackItem::from(9i64)]);
        let outer = StackItem::array(vec![shared.clone(), shared]);
        // Same allocation twice is not a cycle
        let back = roundtrip(&outer);
        let StackItem::Array(items) = &back else {
            panic!();
        };
        assert_eq!(items.borrow().len(), 2);
    }

    #[test]
    fn oversized_item_is_rejected() {
        let mut limits = VmLimits::default();
        limits.max_item_size = 16;
        let item = StackItem::ByteArray(vec![0; 32]);
        assert!(matches!(
            serialize_item(&item, &limits),
            Err(VmError::ItemTooLarge { .. })
        ));
    }

    #[test]
    fn deserialize_rejects_trailing_bytes() {
        let limits = VmLimits::default();
        let mut bytes = serialize_item(&StackItem::Boolean(true), &limits).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            deserialize_item(&bytes, &limits),
            Err(VmError::DeserializeFailed)
        ));
    }

    #[test]
    fn deserialize_rejects_unknown_tag() {
        let limits = VmLimits::default();
        assert!(deserialize_item(&[0x7f], &limits).is_err());
    }

    #[test]
    fn deserialize_rejects_hostile_count() {
        let limits = VmLimits::default();
        // Array claiming u32::MAX elements
        let mut bytes = vec![ItemType::Array as u8];
        write_var_int(&mut bytes, u32::MAX as u64);
        assert!(matches!(
            deserialize_item(&bytes, &limits),
            Err(VmError::ArraySizeExceeded { .. })
        ));
    }
}
