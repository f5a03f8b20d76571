//! Command Handlers module
//!
//! Orchestration of the money-moving control flow. Each handler wires the
//! rate limiter, limit enforcement, risk engine, ledger, and notifier into
//! one operation; the ledger stage is the only one that changes state.

mod commands;
mod receive_handler;
mod transfer_handler;


pub use commands::{ReceiveCommand, ReceiveResult, TransferCommand, TransferResult};
pub use receive_handler::ReceiveHandler;
pub use transfer_handler::TransferHandler;
