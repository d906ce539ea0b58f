//! Contract state: published script plus interface metadata.

use crate::core::transaction::{ContractParamType, ContractProperties};
use crate::types::hash::{Hash160, hash160};
use ledger_derive::BinaryCodec;

/// A published contract, keyed by the hash of its immutable script.
///
/// Metadata is only replaced through `Contract.Migrate`, which creates a
/// fresh record under the new script's hash.
#[derive(Clone, Debug, PartialEq, BinaryCodec)]
pub struct ContractState {
    pub script: Vec<u8>,
    pub param_list: Vec<ContractParamType>,
    pub return_type: ContractParamType,
    pub properties: ContractProperties,
    pub name: String,
    pub code_version: String,
    pub author: String,
    pub email: String,
    pub description: String,
}

impl ContractState {
    pub fn script_hash(&self) -> Hash160 {
        hash160(&self.script)
    }

    pub fn has_storage(&self) -> bool {
        self.properties.has_storage()
    }

    pub fn has_dynamic_invoke(&self) -> bool {
        self.properties.has_dynamic_invoke()
    }

    pub fn is_payable(&self) -> bool {
        self.properties.is_payable()
    }
}
