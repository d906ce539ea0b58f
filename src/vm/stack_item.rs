//! The tagged stack value union and its conversion rules.
//!
//! Compound items (arrays, structs, maps) have reference semantics: DUP
//! copies the handle, not the contents, and mutation through one handle is
//! visible through all. Structs additionally have value semantics at insert
//! sites - APPEND and SETITEM deep-clone a struct operand (see
//! [`StackItem::deep_clone`]).

use crate::vm::errors::VmError;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

/// Shared mutable interior of a compound item.
pub type Shared<T> = Rc<RefCell<T>>;

/// Type byte identifying a stack item kind, used by ISTYPE, NEWARRAYT and
/// the serialization format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ItemType {
    ByteArray = 0x00,
    Boolean = 0x01,
    Integer = 0x02,
    Null = 0x04,
    Interop = 0x40,
    Array = 0x80,
    Struct = 0x81,
    Map = 0x82,
}

impl TryFrom<u8> for ItemType {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ItemType::ByteArray),
            0x01 => Ok(ItemType::Boolean),
            0x02 => Ok(ItemType::Integer),
            0x04 => Ok(ItemType::Null),
            0x40 => Ok(ItemType::Interop),
            0x80 => Ok(ItemType::Array),
            0x81 => Ok(ItemType::Struct),
            0x82 => Ok(ItemType::Map),
            _ => Err(VmError::InvalidTypeByte(value)),
        }
    }
}

/// Opaque host object exposed to scripts through interop functions.
///
/// Identity is the handle itself; two handles are equal only if they wrap
/// the same allocation.
#[derive(Clone)]
pub struct InteropHandle {
    /// Host-side kind tag, for diagnostics and type errors.
    pub kind: &'static str,
    pub value: Rc<dyn Any>,
}

impl InteropHandle {
    pub fn new<T: Any>(kind: &'static str, value: T) -> Self {
        Self {
            kind,
            value: Rc::new(value),
        }
    }

    /// Downcasts to the wrapped host type.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for InteropHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InteropHandle({})", self.kind)
    }
}

/// Keys of map items. Restricted to primitive kinds so ordering and
/// equality stay deterministic.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Boolean(bool),
    Integer(BigInt),
    ByteArray(Vec<u8>),
}

impl MapKey {
    /// Converts a stack item into a map key; compound items are rejected.
    pub fn from_item(item: StackItem) -> Result<MapKey, VmError> {
        match item {
            StackItem::Boolean(b) => Ok(MapKey::Boolean(b)),
            StackItem::Integer(i) => Ok(MapKey::Integer(i)),
            StackItem::ByteArray(b) => Ok(MapKey::ByteArray(b)),
            other => Err(VmError::InvalidMapKey(other.type_name())),
        }
    }

    pub fn to_item(&self) -> StackItem {
        match self {
            MapKey::Boolean(b) => StackItem::Boolean(*b),
            MapKey::Integer(i) => StackItem::Integer(i.clone()),
            MapKey::ByteArray(b) => StackItem::ByteArray(b.clone()),
        }
    }
}

/// A value on the evaluation or alt stack.
#[derive(Clone, Debug)]
pub enum StackItem {
    Null,
    Boolean(bool),
    Integer(BigInt),
    ByteArray(Vec<u8>),
    Array(Shared<Vec<StackItem>>),
    Struct(Shared<Vec<StackItem>>),
    Map(Shared<BTreeMap<MapKey, StackItem>>),
    Interop(InteropHandle),
}

impl StackItem {
    /// New array with the given elements.
    pub fn array(items: Vec<StackItem>) -> StackItem {
        StackItem::Array(Rc::new(RefCell::new(items)))
    }

    /// New struct with the given elements.
    pub fn structure(items: Vec<StackItem>) -> StackItem {
        StackItem::Struct(Rc::new(RefCell::new(items)))
    }

    /// New empty map.
    pub fn map() -> StackItem {
        StackItem::Map(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            StackItem::Null => ItemType::Null,
            StackItem::Boolean(_) => ItemType::Boolean,
            StackItem::Integer(_) => ItemType::Integer,
            StackItem::ByteArray(_) => ItemType::ByteArray,
            StackItem::Array(_) => ItemType::Array,
            StackItem::Struct(_) => ItemType::Struct,
            StackItem::Map(_) => ItemType::Map,
            StackItem::Interop(_) => ItemType::Interop,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StackItem::Null => "Null",
            StackItem::Boolean(_) => "Boolean",
            StackItem::Integer(_) => "Integer",
            StackItem::ByteArray(_) => "ByteArray",
            StackItem::Array(_) => "Array",
            StackItem::Struct(_) => "Struct",
            StackItem::Map(_) => "Map",
            StackItem::Interop(_) => "Interop",
        }
    }

    /// The default value of a type, used by NEWARRAYT.
    pub fn default_of(item_type: ItemType) -> StackItem {
        match item_type {
            ItemType::Boolean => StackItem::Boolean(false),
            ItemType::Integer => StackItem::Integer(BigInt::zero()),
            ItemType::ByteArray => StackItem::ByteArray(Vec::new()),
            _ => StackItem::Null,
        }
    }

    /// Numeric interpretation of a primitive item.
    pub fn to_int(&self, op: &'static str) -> Result<BigInt, VmError> {
        match self {
            StackItem::Integer(i) => Ok(i.clone()),
            StackItem::Boolean(b) => Ok(BigInt::from(*b as u8)),
            StackItem::ByteArray(bytes) => Ok(bytes_to_int(bytes)),
            other => Err(VmError::TypeMismatch {
                op,
                expected: "Integer",
                actual: other.type_name(),
            }),
        }
    }

    /// Byte interpretation of a primitive item.
    pub fn to_byte_array(&self, op: &'static str) -> Result<Vec<u8>, VmError> {
        match self {
            StackItem::ByteArray(bytes) => Ok(bytes.clone()),
            StackItem::Integer(i) => Ok(int_to_bytes(i)),
            StackItem::Boolean(b) => Ok(vec![*b as u8]),
            other => Err(VmError::TypeMismatch {
                op,
                expected: "ByteArray",
                actual: other.type_name(),
            }),
        }
    }

    /// Truth interpretation. Never fails: compound items are truthy, null is
    /// falsy, byte strings are truthy iff any byte is nonzero.
    pub fn to_bool(&self) -> bool {
        match self {
            StackItem::Null => false,
            StackItem::Boolean(b) => *b,
            StackItem::Integer(i) => !i.is_zero(),
            StackItem::ByteArray(bytes) => bytes.iter().any(|&b| b != 0),
            StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_) => true,
            StackItem::Interop(_) => true,
        }
    }

    /// EQUAL semantics: primitives compare by their byte form, compounds and
    /// interop handles by reference identity, null equals only null.
    pub fn equals(&self, other: &StackItem) -> bool {
        match (self, other) {
            (StackItem::Null, StackItem::Null) => true,
            (StackItem::Array(a), StackItem::Array(b))
            | (StackItem::Struct(a), StackItem::Struct(b)) => Rc::ptr_eq(a, b),
            (StackItem::Map(a), StackItem::Map(b)) => Rc::ptr_eq(a, b),
            (StackItem::Interop(a), StackItem::Interop(b)) => Rc::ptr_eq(&a.value, &b.value),
            (a, b) => match (a.to_byte_array("EQUAL"), b.to_byte_array("EQUAL")) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Deep clone with struct value semantics.
    ///
    /// Struct members that are themselves structs are cloned recursively;
    /// arrays and maps inside a struct keep their shared identity. `budget`
    /// bounds the number of cloned elements so a hostile struct tree cannot
    /// blow up memory before the stack size check runs.
    pub fn deep_clone(&self, budget: &mut usize) -> Result<StackItem, VmError> {
        match self {
            StackItem::Struct(items) => {
                let items = items.borrow();
                let mut cloned = Vec::with_capacity(items.len());
                for item in items.iter() {
                    if *budget == 0 {
                        return Err(VmError::StackSizeExceeded {
                            count: usize::MAX,
                            max: 0,
                        });
                    }
                    *budget -= 1;
                    cloned.push(match item {
                        StackItem::Struct(_) => item.deep_clone(budget)?,
                        other => other.clone(),
                    });
                }
                Ok(StackItem::structure(cloned))
            }
            other => Ok(other.clone()),
        }
    }
}

impl From<bool> for StackItem {
    fn from(value: bool) -> Self {
        StackItem::Boolean(value)
    }
}

impl From<i64> for StackItem {
    fn from(value: i64) -> Self {
        StackItem::Integer(BigInt::from(value))
    }
}

impl From<BigInt> for StackItem {
    fn from(value: BigInt) -> Self {
        StackItem::Integer(value)
    }
}

impl From<Vec<u8>> for StackItem {
    fn from(value: Vec<u8>) -> Self {
        StackItem::ByteArray(value)
    }
}

impl From<&[u8]> for StackItem {
    fn from(value: &[u8]) -> Self {
        StackItem::ByteArray(value.to_vec())
    }
}

/// Canonical little-endian two's-complement form of an integer.
///
/// Zero is the empty byte string.
pub fn int_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_le()
}

/// Parses the canonical little-endian two's-complement form.
pub fn bytes_to_int(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        return BigInt::zero();
    }
    BigInt::from_signed_bytes_le(bytes)
}

/// Counts the items reachable from `item`, including the item itself.
///
/// Shared and cyclic compounds are counted once, keyed by allocation
/// identity. This is the unit of the engine's live stack size accounting.
pub fn reachable_count(item: &StackItem, seen: &mut HashSet<usize>) -> usize {
    match item {
        StackItem::Array(items) | StackItem::Struct(items) => {
            if !seen.insert(Rc::as_ptr(items) as *const u8 as usize) {
                return 1;
            }
            1 + items
                .borrow()
                .iter()
                .map(|i| reachable_count(i, seen))
                .sum::<usize>()
        }
        StackItem::Map(entries) => {
            if !seen.insert(Rc::as_ptr(entries) as *const u8 as usize) {
                return 1;
            }
            1 + entries
                .borrow()
                .values()
                .map(|v| 1 + reachable_count(v, seen))
                .sum::<usize>()
        }
        _ => 1,
    }
}

/// Converts a possibly large integer index into `usize`, rejecting negatives.
pub fn index_to_usize(index: &BigInt) -> Result<usize, VmError> {
    if index.is_negative() {
        return Err(VmError::IndexOutOfRange(
            index.to_i64().unwrap_or(i64::MIN),
        ));
    }
    index
        .to_usize()
        .ok_or(VmError::IndexOutOfRange(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_bytes_canonical_zero() {
        assert!(int_to_bytes(&BigInt::zero()).is_empty());
        assert_eq!(bytes_to_int(&[]), BigInt::zero());
    }

    #[test]
    fn int_bytes_roundtrip() {
        for value in [1i64, -1, 127, -128, 255, 256, i64::MAX, i64::MIN] {
            let int = BigInt::from(value);
            assert_eq!(bytes_to_int(&int_to_bytes(&int)), int);
        }
    }

    #[test]
    fn truthiness() {
        assert!(!StackItem::Null.to_bool());
        assert!(!StackItem::from(0i64).to_bool());
        assert!(StackItem::from(-1i64).to_bool());
        assert!(!StackItem::ByteArray(vec![0, 0]).to_bool());
        assert!(StackItem::ByteArray(vec![0, 1]).to_bool());
        assert!(StackItem::array(vec![]).to_bool());
    }

    #[test]
    fn equals_across_primitive_kinds() {
        // 1 as integer, boolean and byte string are all the same bytes
        let int = StackItem::from(1i64);
        let boolean = StackItem::from(true);
        let bytes = StackItem::ByteArray(vec![1]);
        assert!(int.equals(&boolean));
        assert!(int.equals(&bytes));
        assert!(!int.equals(&StackItem::from(2i64)));
    }

    #[test]
    fn equals_compounds_by_reference() {
        let a = StackItem::array(vec![StackItem::from(1i64)]);
        let b = StackItem::array(vec![StackItem::from(1i64)]);
        assert!(!a.equals(&b));
        assert!(a.equals(&a.clone()));
    }

    #[test]
    fn null_equals_only_null() {
        assert!(StackItem::Null.equals(&StackItem::Null));
        assert!(!StackItem::Null.equals(&StackItem::ByteArray(vec![])));
    }

    #[test]
    fn map_key_rejects_compounds() {
        let err = MapKey::from_item(StackItem::array(vec![]));
        assert!(matches!(err, Err(VmError::InvalidMapKey("Array"))));
    }

    #[test]
    fn deep_clone_copies_nested_structs_only() {
        let inner_struct = StackItem::structure(vec![StackItem::from(1i64)]);
        let inner_array = StackItem::array(vec![StackItem::from(2i64)]);
        let outer = StackItem::structure(vec![inner_struct.clone(), inner_array.clone()]);

        let mut budget = 64;
        let cloned = outer.deep_clone(&mut budget).unwrap();

        let StackItem::Struct(items) = &cloned else {
            panic!("clone is not a struct");
        };
        let items = items.borrow();
        // nested struct copied, nested array shared
        assert!(!items[0].equals(&inner_struct));
        assert!(items[1].equals(&inner_array));
    }

    #[test]
    fn deep_clone_respects_budget() {
        let wide = StackItem::structure((0..10).map(StackItem::from).collect());
        let mut budget = 5;
        assert!(wide.deep_clone(&mut budget).is_err());
    }

    #[test]
    fn reachable_count_shared_counted_once() {
        let shared = StackItem::array(vec![StackItem::from(1i64), StackItem::from(2i64)]);
        let outer = StackItem::array(vec![shared.clone(), shared.clone()]);

        let mut seen = HashSet::new();
        // outer(1) + shared(1 + 2 elements) + second reference(1)
        assert_eq!(reachable_count(&outer, &mut seen), 5);
    }

    #[test]
    fn reachable_count_cycle_terminates() {
        let arr = Rc::new(RefCell::new(Vec::new()));
        arr.borrow_mut().push(StackItem::Array(arr.clone()));
        let cyclic = StackItem::Array(arr);

        let mut seen = HashSet::new();
        assert_eq!(reachable_count(&cyclic, &mut seen), 2);
    }

    #[test]
    fn reachable_count_map_counts_keys_and_values() {
        let map = StackItem::map();
        if let StackItem::Map(entries) = &map {
            entries.borrow_mut().insert(
                MapKey::ByteArray(b"k".to_vec()),
                StackItem::from(1i64),
            );
        }
        let mut seen = HashSet::new();
        // map(1) + key(1) + value(1)
        assert_eq!(reachable_count(&map, &mut seen), 3);
    }

    #[test]
    fn interop_handle_downcast() {
        let handle = InteropHandle::new("counter", 42u32);
        assert_eq!(handle.downcast::<u32>(), Some(&42));
        assert_eq!(handle.downcast::<u64>(), None);
    }
}
