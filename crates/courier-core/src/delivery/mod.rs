//! At-least-once message delivery with acks, retries, and read receipts.
//!
//! - `coordinator` -- `DeliveryCoordinator` driving each message through its lifecycle
//! - `ledger` -- `DeliveryLedger`, the in-memory record map with per-entry task handles
//! - `receipts` -- `ReceiptBook`, at most one read receipt per reader per message
//! - `side_effects` -- `SideEffects`, bounded best-effort background work

pub mod coordinator;
pub mod ledger;
pub mod receipts;
pub mod side_effects;

pub use coordinator::DeliveryCoordinator;
pub use ledger::DeliveryLedger;
pub use receipts::ReceiptBook;
pub use side_effects::SideEffects;
