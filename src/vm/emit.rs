//! Script construction helpers.
//!
//! Used by witness builders, the consensus address derivation and tests.
//! Every helper appends the shortest encoding of its value.

use crate::crypto::key_pair::PublicKey;
use crate::types::hash::{Hash160, hash160};
use crate::vm::interop::syscall_id;
use crate::vm::opcode::OpCode;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

/// Appends a bare opcode.
pub fn op(buf: &mut Vec<u8>, opcode: OpCode) {
    buf.push(opcode as u8);
}

/// Appends the shortest push of an integer constant.
pub fn push_big_int(buf: &mut Vec<u8>, value: &BigInt) {
    if value.is_zero() {
        op(buf, OpCode::Push0);
        return;
    }
    if let Some(small) = value.to_i64() {
        if small == -1 {
            op(buf, OpCode::PushM1);
            return;
        }
        if (1..=16).contains(&small) {
            buf.push(0x50 + small as u8);
            return;
        }
    }

    let bytes = value.to_signed_bytes_le();
    let (opcode, width) = match bytes.len() {
        0..=1 => (OpCode::PushInt8, 1),
        2 => (OpCode::PushInt16, 2),
        3..=4 => (OpCode::PushInt32, 4),
        5..=8 => (OpCode::PushInt64, 8),
        9..=16 => (OpCode::PushInt128, 16),
        _ => (OpCode::PushInt256, 32),
    };
    op(buf, opcode);
    // sign-extend to the fixed operand width
    let fill = if value.is_negative() { 0xff } else { 0x00 };
    let mut operand = vec![fill; width];
    operand[..bytes.len().min(width)].copy_from_slice(&bytes[..bytes.len().min(width)]);
    buf.extend_from_slice(&operand);
}

/// Appends the shortest push of an `i64` constant.
pub fn push_int(buf: &mut Vec<u8>, value: i64) {
    push_big_int(buf, &BigInt::from(value));
}

/// Appends a data push with the narrowest length prefix.
pub fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
    if data.len() <= u8::MAX as usize {
        op(buf, OpCode::PushData1);
        buf.push(data.len() as u8);
    } else if data.len() <= u16::MAX as usize {
        op(buf, OpCode::PushData2);
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    } else {
        op(buf, OpCode::PushData4);
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    buf.extend_from_slice(data);
}

/// Appends a SYSCALL of the named interop function.
pub fn syscall(buf: &mut Vec<u8>, name: &str) {
    op(buf, OpCode::Syscall);
    buf.extend_from_slice(&syscall_id(name).to_le_bytes());
}

/// Appends a static APPCALL of the given contract.
pub fn app_call(buf: &mut Vec<u8>, script_hash: &Hash160) {
    op(buf, OpCode::AppCall);
    buf.extend_from_slice(script_hash.as_slice());
}

/// Appends a short-form jump with the given opcode and offset.
pub fn jmp(buf: &mut Vec<u8>, opcode: OpCode, offset: i16) {
    op(buf, opcode);
    buf.extend_from_slice(&offset.to_le_bytes());
}

/// The single-signature verification script: `PUSHDATA1 <key> CHECKSIG`.
pub fn signature_contract(key: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    push_data(&mut script, &key.compressed());
    op(&mut script, OpCode::CheckSig);
    script
}

/// The m-of-n multi-signature verification script.
///
/// Keys are sorted by their compressed encoding so every participant derives
/// the same script (and the same script hash). Returns `None` for an invalid
/// `m`/key-count combination.
pub fn multisig_contract(m: usize, keys: &[PublicKey]) -> Option<Vec<u8>> {
    let n = keys.len();
    if m == 0 || m > n || n > 1024 {
        return None;
    }

    let mut sorted: Vec<&PublicKey> = keys.iter().collect();
    sorted.sort();

    let mut script = Vec::new();
    push_int(&mut script, m as i64);
    for key in sorted {
        push_data(&mut script, &key.compressed());
    }
    push_int(&mut script, n as i64);
    op(&mut script, OpCode::CheckMultiSig);
    Some(script)
}

/// Script hash of the single-signature contract for a key.
pub fn signature_contract_hash(key: &PublicKey) -> Hash160 {
    hash160(&signature_contract(key))
}

/// Script hash of the m-of-n multi-signature contract.
pub fn multisig_contract_hash(m: usize, keys: &[PublicKey]) -> Option<Hash160> {
    multisig_contract(m, keys).map(|script| hash160(&script))
}
