//! Wire contracts for the power market simulation.
//!
//! This crate holds the types and text codecs shared by the simulation core and
//! anything talking to it (households, the market, control clients) without
//! depending on the threaded runtime in `market_core`.

mod control_text;
mod household;
mod settlement_text;

pub use control_text::{parse_control_line, ControlCommand, ControlParseError};
pub use household::{Behavior, HouseholdId, REPLY_OFFSET};
pub use settlement_text::{
    decode_bill, decode_request, encode_bill, encode_request, SettlementDecodeError,
    SettlementRequest,
};
