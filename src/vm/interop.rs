//! Syscall dispatch plumbing.
//!
//! Each interop function is addressed by the 32-bit hash of its name. The
//! host registers one or more *getters* resolving an id to a handler plus a
//! per-call price; resolution walks the getters in registration order and an
//! unresolved id faults the engine.

use crate::vm::engine::Vm;
use crate::vm::errors::VmError;
use sha2::{Digest, Sha256};
use std::rc::Rc;

/// A host function callable from scripts via SYSCALL.
pub type InteropHandler = Rc<dyn Fn(&mut Vm) -> Result<(), VmError>>;

/// Resolver from syscall id to handler.
pub type InteropGetter = Rc<dyn Fn(u32) -> Option<InteropFuncPrice>>;

/// A resolved interop function and its gas price.
#[derive(Clone)]
pub struct InteropFuncPrice {
    pub handler: InteropHandler,
    pub price: u64,
}

impl InteropFuncPrice {
    pub fn new(price: u64, handler: impl Fn(&mut Vm) -> Result<(), VmError> + 'static) -> Self {
        Self {
            handler: Rc::new(handler),
            price,
        }
    }
}

/// The 32-bit syscall id of an interop name: the first four bytes of the
/// name's SHA-256 digest, read little-endian.
pub fn syscall_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes(digest[..4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_id_is_deterministic() {
        assert_eq!(syscall_id("Runtime.Notify"), syscall_id("Runtime.Notify"));
    }

    #[test]
    fn syscall_id_distinguishes_names() {
        assert_ne!(syscall_id("Storage.Get"), syscall_id("Storage.Put"));
    }

    #[test]
    fn syscall_id_matches_manual_digest() {
        let digest = Sha256::digest(b"Runtime.Serialize");
        let expected = u32::from_le_bytes(digest[..4].try_into().unwrap());
        assert_eq!(syscall_id("Runtime.Serialize"), expected);
    }
}
