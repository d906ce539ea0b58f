//! Persisted world-state records.
//!
//! Every record round-trips through the wire codec; the DAO stores them
//! under the single-byte key tags in
//! [`KeyPrefix`](crate::storage::store::KeyPrefix).

pub mod account;
pub mod app_exec;
pub mod asset;
pub mod coin;
pub mod contract;
pub mod nep5;
pub mod validator;

pub use account::{AccountState, UnclaimedBalance, UnspentBalance};
pub use app_exec::{AppExecResult, NotifyEvent, Trigger};
pub use asset::AssetState;
pub use coin::{CoinRecord, UnspentCoinState, coin_state};
pub use contract::ContractState;
pub use nep5::{Nep5State, Nep5Transfer};
pub use validator::ValidatorState;
