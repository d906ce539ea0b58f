//! Host functions exposed to contract scripts, and default opcode pricing.
//!
//! The blockchain layer builds one [`InteropContext`] per executed script,
//! rooted at the transaction and block being applied, and registers the
//! handlers below into the VM. Handlers reach world state exclusively
//! through the context's layered DAO, so a faulted execution discards its
//! writes wholesale.
//!
//! All prices are raw utility-token units (10^-8).

use crate::core::dao::Dao;
use crate::core::state::{ContractState, Trigger};
use crate::core::transaction::{ContractParamType, ContractProperties};
use crate::crypto::key_pair::PublicKey;
use crate::types::hash::Hash160;
use crate::types::hash::Hash256;
use crate::vm::emit;
use crate::vm::engine::{ScriptGetter, Vm};
use crate::vm::errors::VmError;
use crate::vm::interop::{InteropFuncPrice, InteropGetter, syscall_id};
use crate::vm::opcode::OpCode;
use crate::vm::stack_item::{InteropHandle, StackItem};
use num_traits::ToPrimitive;
use std::cell::RefCell;
use std::rc::Rc;

/// 0.001 tokens: the base cost of a priced opcode.
const PRICE_BASE_OP: u64 = 100_000;
/// 0.01 tokens: hash opcodes.
const PRICE_HASH_OP: u64 = 1_000_000;
/// 0.01 tokens: loading another contract.
const PRICE_APP_CALL: u64 = 1_000_000;
/// 0.1 tokens: one signature check.
const PRICE_CHECKSIG: u64 = 10_000_000;
/// 1 token: a multi-signature check.
const PRICE_CHECKMULTISIG: u64 = 100_000_000;
/// 0.1 tokens: a storage read.
const PRICE_STORAGE_GET: u64 = 10_000_000;
/// 1 token: a storage write or delete.
const PRICE_STORAGE_PUT: u64 = 100_000_000;
/// 0.2 tokens: a witness check.
const PRICE_CHECK_WITNESS: u64 = 20_000_000;
/// 1 token: destroying a contract.
const PRICE_CONTRACT_DESTROY: u64 = 100_000_000;
/// 500 tokens: migrating a contract and its storage.
const PRICE_CONTRACT_MIGRATE: u64 = 50_000_000_000;

/// Per-op pricing for application scripts.
///
/// Pure pushes and flow control are free; crypto and state access carry the
/// protocol prices above. Syscall prices are attached to their handlers, not
/// computed here.
pub fn default_price(op: OpCode, _operand: &[u8]) -> u64 {
    match op {
        OpCode::Nop
        | OpCode::Ret
        | OpCode::Jmp
        | OpCode::JmpL
        | OpCode::JmpIf
        | OpCode::JmpIfL
        | OpCode::JmpIfNot
        | OpCode::JmpIfNotL
        | OpCode::Call
        | OpCode::Syscall => 0,
        OpCode::Sha1 | OpCode::Sha256 | OpCode::Hash160 | OpCode::Hash256 => PRICE_HASH_OP,
        OpCode::CheckSig | OpCode::Verify => PRICE_CHECKSIG,
        OpCode::CheckMultiSig => PRICE_CHECKMULTISIG,
        OpCode::AppCall => PRICE_APP_CALL,
        op if op.embedded_int().is_some() => 0,
        OpCode::PushInt8
        | OpCode::PushInt16
        | OpCode::PushInt32
        | OpCode::PushInt64
        | OpCode::PushInt128
        | OpCode::PushInt256
        | OpCode::PushNull
        | OpCode::PushData1
        | OpCode::PushData2
        | OpCode::PushData4 => 0,
        _ => PRICE_BASE_OP,
    }
}

/// Handle pushed by `Storage.GetContext`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageContext {
    pub script_hash: Hash160,
}

/// A notification raised during execution, kept as a live stack item until
/// the blockchain scans and serializes it.
#[derive(Clone, Debug)]
pub struct Notification {
    pub script_hash: Hash160,
    pub item: StackItem,
}

/// Execution context shared by every interop handler of one script run.
pub struct InteropContext {
    pub trigger: Trigger,
    pub dao: Rc<RefCell<Dao>>,
    /// Height of the block being applied.
    pub height: u32,
    /// Timestamp of the block being applied.
    pub timestamp: u64,
    /// Hash of the transaction driving this execution.
    pub tx_hash: Option<Hash256>,
    /// Script hashes the transaction's witnesses answer for
    /// (`Runtime.CheckWitness`).
    pub verification_hashes: Vec<Hash160>,
    pub notifications: RefCell<Vec<Notification>>,
    pub logs: RefCell<Vec<String>>,
}

impl InteropContext {
    /// An APPCALL resolver over this context's DAO.
    pub fn script_getter(self: &Rc<Self>) -> ScriptGetter {
        let dao = self.dao.clone();
        Rc::new(move |hash: &Hash160| {
            dao.borrow()
                .get_contract(hash)
                .ok()
                .flatten()
                .map(|contract| (contract.script.clone(), contract.has_dynamic_invoke()))
        })
    }

    /// The syscall resolver exposing this context to the engine.
    pub fn interop_getter(self: &Rc<Self>) -> InteropGetter {
        let ctx = self.clone();
        Rc::new(move |id: u32| resolve(&ctx, id))
    }
}

fn resolve(ctx: &Rc<InteropContext>, id: u32) -> Option<InteropFuncPrice> {
    macro_rules! handler {
        ($name:literal, $price:expr, $fn:ident) => {
            if id == syscall_id($name) {
                let ctx = ctx.clone();
                return Some(InteropFuncPrice::new($price, move |vm: &mut Vm| $fn(&ctx, vm)));
            }
        };
    }

    handler!("Storage.GetContext", 1, storage_get_context);
    handler!("Storage.Get", PRICE_STORAGE_GET, storage_get);
    handler!("Storage.Put", PRICE_STORAGE_PUT, storage_put);
    handler!("Storage.Delete", PRICE_STORAGE_PUT, storage_delete);
    handler!("Runtime.GetTime", 1, runtime_get_time);
    handler!("Runtime.Notify", 1, runtime_notify);
    handler!("Runtime.Log", 1, runtime_log);
    handler!("Runtime.CheckWitness", PRICE_CHECK_WITNESS, runtime_check_witness);
    handler!("Blockchain.GetHeight", 1, blockchain_get_height);
    handler!("Blockchain.GetContract", PRICE_STORAGE_GET, blockchain_get_contract);
    handler!("Contract.GetScript", 1, contract_get_script);
    handler!("Contract.Destroy", PRICE_CONTRACT_DESTROY, contract_destroy);
    handler!("Contract.Migrate", PRICE_CONTRACT_MIGRATE, contract_migrate);
    handler!(
        "ExecutionEngine.GetExecutingScriptHash",
        1,
        get_executing_script_hash
    );
    None
}

fn executing_hash(vm: &Vm) -> Result<Hash160, VmError> {
    vm.current_script_hash()
        .ok_or_else(|| VmError::Interop("no executing context".into()))
}

fn dao_err(err: impl std::fmt::Display) -> VmError {
    VmError::Interop(err.to_string())
}

// ===================== storage =====================

fn storage_get_context(_ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let script_hash = executing_hash(vm)?;
    vm.push_item(StackItem::Interop(InteropHandle::new(
        "StorageContext",
        StorageContext { script_hash },
    )));
    Ok(())
}

fn pop_storage_context(vm: &mut Vm) -> Result<StorageContext, VmError> {
    match vm.pop_item()? {
        StackItem::Interop(handle) => handle
            .downcast::<StorageContext>()
            .copied()
            .ok_or_else(|| VmError::Interop("expected a storage context".into())),
        other => Err(VmError::TypeMismatch {
            op: "Storage",
            expected: "StorageContext",
            actual: other.type_name(),
        }),
    }
}

fn storage_get(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let context = pop_storage_context(vm)?;
    let key = vm.pop_bytes("Storage.Get")?;
    let value = ctx
        .dao
        .borrow()
        .get_storage_item(&context.script_hash, &key)
        .map_err(dao_err)?
        .unwrap_or_default();
    vm.push_item(StackItem::ByteArray(value));
    Ok(())
}

/// Writes require Application trigger and a deployed contract that declared
/// storage.
fn check_storage_writable(ctx: &Rc<InteropContext>, context: &StorageContext) -> Result<(), VmError> {
    if ctx.trigger != Trigger::Application {
        return Err(VmError::Interop("storage writes need Application trigger".into()));
    }
    let has_storage = ctx
        .dao
        .borrow()
        .get_contract(&context.script_hash)
        .map_err(dao_err)?
        .is_some_and(|contract| contract.has_storage());
    if !has_storage {
        return Err(VmError::Interop(format!(
            "contract {} has no storage",
            context.script_hash
        )));
    }
    Ok(())
}

fn storage_put(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let context = pop_storage_context(vm)?;
    let key = vm.pop_bytes("Storage.Put")?;
    let value = vm.pop_bytes("Storage.Put")?;
    if key.len() > 1024 {
        return Err(VmError::Interop("storage key longer than 1024 bytes".into()));
    }
    check_storage_writable(ctx, &context)?;
    ctx.dao
        .borrow_mut()
        .put_storage_item(&context.script_hash, &key, value);
    Ok(())
}

fn storage_delete(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let context = pop_storage_context(vm)?;
    let key = vm.pop_bytes("Storage.Delete")?;
    check_storage_writable(ctx, &context)?;
    ctx.dao
        .borrow_mut()
        .delete_storage_item(&context.script_hash, &key);
    Ok(())
}

// ===================== runtime =====================

fn runtime_get_time(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    vm.push_item(StackItem::from(ctx.timestamp as i64));
    Ok(())
}

fn runtime_notify(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let item = vm.pop_item()?;
    let script_hash = executing_hash(vm)?;
    ctx.notifications.borrow_mut().push(Notification {
        script_hash,
        item,
    });
    Ok(())
}

fn runtime_log(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let bytes = vm.pop_bytes("Runtime.Log")?;
    let message = String::from_utf8_lossy(&bytes).into_owned();
    crate::info!("contract log: {message}");
    ctx.logs.borrow_mut().push(message);
    Ok(())
}

fn runtime_check_witness(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let operand = vm.pop_bytes("Runtime.CheckWitness")?;
    let hash = match operand.len() {
        20 => Hash160::from_slice(&operand),
        33 => PublicKey::from_sec1_bytes(&operand).map(|key| emit::signature_contract_hash(&key)),
        _ => None,
    };
    let witnessed = match hash {
        Some(hash) => ctx.verification_hashes.contains(&hash),
        None => false,
    };
    vm.push_item(StackItem::Boolean(witnessed));
    Ok(())
}

// ===================== blockchain =====================

fn blockchain_get_height(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    vm.push_item(StackItem::from(ctx.height as i64));
    Ok(())
}

fn blockchain_get_contract(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let bytes = vm.pop_bytes("Blockchain.GetContract")?;
    let Some(hash) = Hash160::from_slice(&bytes) else {
        return Err(VmError::Interop("expected a 20-byte script hash".into()));
    };
    match ctx.dao.borrow().get_contract(&hash).map_err(dao_err)? {
        Some(contract) => {
            vm.push_item(StackItem::Interop(InteropHandle::new("Contract", contract)));
        }
        None => vm.push_item(StackItem::Null),
    }
    Ok(())
}

fn contract_get_script(_ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    match vm.pop_item()? {
        StackItem::Interop(handle) => {
            let contract = handle
                .downcast::<ContractState>()
                .ok_or_else(|| VmError::Interop("expected a contract".into()))?;
            vm.push_item(StackItem::ByteArray(contract.script.clone()));
            Ok(())
        }
        other => Err(VmError::TypeMismatch {
            op: "Contract.GetScript",
            expected: "Contract",
            actual: other.type_name(),
        }),
    }
}

fn contract_destroy(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    if ctx.trigger != Trigger::Application {
        return Err(VmError::Interop("destroy needs Application trigger".into()));
    }
    let script_hash = executing_hash(vm)?;
    let mut dao = ctx.dao.borrow_mut();
    if dao.get_contract(&script_hash).map_err(dao_err)?.is_some() {
        dao.delete_contract(&script_hash);
        dao.delete_contract_storage(&script_hash).map_err(dao_err)?;
    }
    Ok(())
}

/// Replaces the executing contract with a new script, carrying storage over.
///
/// Pops the same nine arguments a Publish payload carries; pushes the new
/// contract handle.
fn contract_migrate(ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    if ctx.trigger != Trigger::Application {
        return Err(VmError::Interop("migrate needs Application trigger".into()));
    }

    let script = vm.pop_bytes("Contract.Migrate")?;
    let param_bytes = vm.pop_bytes("Contract.Migrate")?;
    let return_byte = vm.pop_int("Contract.Migrate")?;
    let properties = vm.pop_int("Contract.Migrate")?;
    let name = pop_string(vm)?;
    let code_version = pop_string(vm)?;
    let author = pop_string(vm)?;
    let email = pop_string(vm)?;
    let description = pop_string(vm)?;

    let param_list = param_bytes
        .iter()
        .map(|byte| param_type_from(*byte))
        .collect::<Result<Vec<_>, _>>()?;
    let return_type = param_type_from(
        return_byte
            .to_u8()
            .ok_or_else(|| VmError::Interop("bad return type".into()))?,
    )?;
    let properties = ContractProperties(
        properties
            .to_u8()
            .ok_or_else(|| VmError::Interop("bad contract properties".into()))?,
    );

    let contract = ContractState {
        script,
        param_list,
        return_type,
        properties,
        name,
        code_version,
        author,
        email,
        description,
    };

    let old_hash = executing_hash(vm)?;
    let new_hash = contract.script_hash();
    {
        let mut dao = ctx.dao.borrow_mut();
        dao.put_contract(&contract);
        if contract.has_storage() {
            for (key, value) in dao.contract_storage(&old_hash).map_err(dao_err)? {
                dao.put_storage_item(&new_hash, &key, value);
            }
        }
        dao.delete_contract(&old_hash);
        dao.delete_contract_storage(&old_hash).map_err(dao_err)?;
    }

    vm.push_item(StackItem::Interop(InteropHandle::new("Contract", contract)));
    Ok(())
}

fn get_executing_script_hash(_ctx: &Rc<InteropContext>, vm: &mut Vm) -> Result<(), VmError> {
    let hash = executing_hash(vm)?;
    vm.push_item(StackItem::ByteArray(hash.to_vec()));
    Ok(())
}

fn pop_string(vm: &mut Vm) -> Result<String, VmError> {
    let bytes = vm.pop_bytes("Contract.Migrate")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn param_type_from(byte: u8) -> Result<ContractParamType, VmError> {
    use ContractParamType::*;
    Ok(match byte {
        0x00 => Signature,
        0x01 => Boolean,
        0x02 => Integer,
        0x03 => Hash160,
        0x04 => Hash256,
        0x05 => ByteArray,
        0x06 => PublicKey,
        0x07 => String,
        0x10 => Array,
        0xf0 => InteropInterface,
        0xff => Void,
        other => {
            return Err(VmError::Interop(format!(
                "unknown parameter type {other:#04x}"
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Trigger;
    use crate::storage::memory_store::MemoryStore;
    use crate::vm::engine::VmState;
    use std::sync::Arc;

    fn context(trigger: Trigger) -> Rc<InteropContext> {
        Rc::new(InteropContext {
            trigger,
            dao: Rc::new(RefCell::new(Dao::new(Arc::new(MemoryStore::new())))),
            height: 42,
            timestamp: 1_700_000_000,
            tx_hash: None,
            verification_hashes: vec![Hash160([7; 20])],
            notifications: RefCell::new(Vec::new()),
            logs: RefCell::new(Vec::new()),
        })
    }

    fn vm_for(ctx: &Rc<InteropContext>) -> Vm {
        let mut vm = Vm::new();
        vm.register_interop_getter(ctx.interop_getter());
        vm.set_script_getter(ctx.script_getter());
        vm
    }

    fn deploy_storage_contract(ctx: &Rc<InteropContext>, script: Vec<u8>) -> Hash160 {
        let contract = ContractState {
            script,
            param_list: vec![],
            return_type: ContractParamType::Void,
            properties: ContractProperties(ContractProperties::HAS_STORAGE),
            name: "test".into(),
            code_version: "".into(),
            author: "".into(),
            email: "".into(),
            description: "".into(),
        };
        let hash = contract.script_hash();
        ctx.dao.borrow_mut().put_contract(&contract);
        hash
    }

    #[test]
    fn get_time_and_height() {
        let ctx = context(Trigger::Application);
        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::syscall(&mut script, "Runtime.GetTime");
        emit::syscall(&mut script, "Blockchain.GetHeight");
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt);
        assert_eq!(vm.estack()[0].to_int("t").unwrap(), 1_700_000_000.into());
        assert_eq!(vm.estack()[1].to_int("t").unwrap(), 42.into());
    }

    #[test]
    fn notify_collects_items() {
        let ctx = context(Trigger::Application);
        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::push_data(&mut script, b"event");
        emit::syscall(&mut script, "Runtime.Notify");
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt);

        let notifications = ctx.notifications.borrow();
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].item.to_byte_array("t").unwrap(),
            b"event"
        );
    }

    #[test]
    fn check_witness_matches_verification_set() {
        let ctx = context(Trigger::Application);
        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::push_data(&mut script, &[7; 20]);
        emit::syscall(&mut script, "Runtime.CheckWitness");
        emit::push_data(&mut script, &[8; 20]);
        emit::syscall(&mut script, "Runtime.CheckWitness");
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt);
        assert!(vm.estack()[0].to_bool());
        assert!(!vm.estack()[1].to_bool());
    }

    #[test]
    fn storage_put_requires_contract_with_storage() {
        let ctx = context(Trigger::Application);
        let mut vm = vm_for(&ctx);
        // executing script is not a deployed contract
        let mut script = Vec::new();
        emit::push_data(&mut script, b"value");
        emit::push_data(&mut script, b"key");
        emit::syscall(&mut script, "Storage.GetContext");
        emit::syscall(&mut script, "Storage.Put");
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Fault);
    }

    #[test]
    fn storage_roundtrip_inside_contract() {
        let ctx = context(Trigger::Application);

        // the contract body: value key ctx Put, then key ctx Get
        let mut body = Vec::new();
        emit::push_data(&mut body, b"value");
        emit::push_data(&mut body, b"key");
        emit::syscall(&mut body, "Storage.GetContext");
        emit::syscall(&mut body, "Storage.Put");
        emit::push_data(&mut body, b"key");
        emit::syscall(&mut body, "Storage.GetContext");
        emit::syscall(&mut body, "Storage.Get");
        emit::op(&mut body, OpCode::Ret);

        let contract_hash = deploy_storage_contract(&ctx, body);

        // call into the contract so the executing hash is the contract's
        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::app_call(&mut script, &contract_hash);
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt, "{:?}", vm.fault_reason());
        assert_eq!(
            vm.estack().last().unwrap().to_byte_array("t").unwrap(),
            b"value"
        );
        assert_eq!(
            ctx.dao
                .borrow()
                .get_storage_item(&contract_hash, b"key")
                .unwrap(),
            Some(b"value".to_vec())
        );
    }

    #[test]
    fn storage_get_missing_key_pushes_empty() {
        let ctx = context(Trigger::Application);
        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::push_data(&mut script, b"missing");
        emit::syscall(&mut script, "Storage.GetContext");
        emit::syscall(&mut script, "Storage.Get");
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt);
        assert!(top_is_empty_bytes(&vm));
    }

    fn top_is_empty_bytes(vm: &Vm) -> bool {
        vm.estack()
            .last()
            .unwrap()
            .to_byte_array("t")
            .unwrap()
            .is_empty()
    }

    #[test]
    fn get_contract_pushes_handle_or_null() {
        let ctx = context(Trigger::Application);
        let contract_hash = deploy_storage_contract(&ctx, vec![OpCode::Push1 as u8]);

        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::push_data(&mut script, contract_hash.as_slice());
        emit::syscall(&mut script, "Blockchain.GetContract");
        emit::syscall(&mut script, "Contract.GetScript");
        emit::push_data(&mut script, &[0xee; 20]);
        emit::syscall(&mut script, "Blockchain.GetContract");
        emit::op(&mut script, OpCode::IsNull);
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt, "{:?}", vm.fault_reason());
        assert!(vm.estack()[1].to_bool());
        assert_eq!(
            vm.estack()[0].to_byte_array("t").unwrap(),
            vec![OpCode::Push1 as u8]
        );
    }

    #[test]
    fn destroy_removes_contract_and_storage() {
        let ctx = context(Trigger::Application);

        let mut body = Vec::new();
        emit::syscall(&mut body, "Contract.Destroy");
        emit::op(&mut body, OpCode::Push1);
        let contract_hash = deploy_storage_contract(&ctx, body);
        ctx.dao
            .borrow_mut()
            .put_storage_item(&contract_hash, b"k", b"v".to_vec());

        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::app_call(&mut script, &contract_hash);
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Halt, "{:?}", vm.fault_reason());

        assert!(ctx.dao.borrow().get_contract(&contract_hash).unwrap().is_none());
        assert_eq!(
            ctx.dao
                .borrow()
                .get_storage_item(&contract_hash, b"k")
                .unwrap(),
            None
        );
    }

    #[test]
    fn verification_trigger_cannot_write_storage() {
        let ctx = context(Trigger::Verification);
        let body_hash = deploy_storage_contract(&ctx, {
            let mut body = Vec::new();
            emit::push_data(&mut body, b"v");
            emit::push_data(&mut body, b"k");
            emit::syscall(&mut body, "Storage.GetContext");
            emit::syscall(&mut body, "Storage.Put");
            body
        });

        let mut vm = vm_for(&ctx);
        let mut script = Vec::new();
        emit::app_call(&mut script, &body_hash);
        vm.load(script).unwrap();
        assert_eq!(vm.run(), VmState::Fault);
    }

    #[test]
    fn default_price_shape() {
        assert_eq!(default_price(OpCode::Push7, &[]), 0);
        assert_eq!(default_price(OpCode::Jmp, &[]), 0);
        assert_eq!(default_price(OpCode::CheckSig, &[]), PRICE_CHECKSIG);
        assert_eq!(default_price(OpCode::Sha256, &[]), PRICE_HASH_OP);
        assert_eq!(default_price(OpCode::Add, &[]), PRICE_BASE_OP);
    }
}
