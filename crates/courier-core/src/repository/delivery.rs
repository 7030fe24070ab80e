//! Durable store for delivered chat messages and read receipts.

use courier_types::chat::ChatMessage;
use courier_types::delivery::ReadReceipt;
use courier_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for the delivery pipeline's durable side.
///
/// The in-memory delivery ledger is authoritative for transport status; this
/// store only keeps the message body and receipts.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Persist a chat message. Inserting the same message ID twice is a
    /// no-op, so a retried attempt never duplicates the row.
    fn insert_message(
        &self,
        message: &ChatMessage,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist a read receipt. A second receipt from the same reader for the
    /// same message is ignored.
    fn insert_read_receipt(
        &self,
        receipt: &ReadReceipt,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch a stored message by ID.
    fn get_message(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ChatMessage>, RepositoryError>> + Send;

    /// All receipts for a message, oldest first.
    fn list_read_receipts(
        &self,
        message_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ReadReceipt>, RepositoryError>> + Send;
}
