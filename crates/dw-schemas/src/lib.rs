//! Shared domain types for the DocWarden agent.
//!
//! Pure data: serde derives and small helper methods only. Anything that
//! performs IO or holds state lives in the component crates.

mod backend;
mod command;
mod doc;
mod policy;
mod status;

pub use backend::{
    Balances, ChannelSessionInfo, GasCheck, MidQuote, OpenOrder, OrderAck, PayoutReceipt,
    TransferReceipt, WalletKeys, WalletMaterial,
};
pub use command::{ParsedCommand, Side, SplitRecipient, CHAIN_ALLOWLIST, DEFAULT_PAIR};
pub use doc::{DocCellPatch, DocHandle, DocRow};
pub use policy::Policy;
pub use status::{CommandStatus, Decision};
