//! Per-message read receipts, at most one per reader.

use courier_types::delivery::ReadReceipt;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct ReceiptBook {
    receipts: DashMap<Uuid, Vec<ReadReceipt>>,
}

impl ReceiptBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `receipt`. Returns `false` if this reader already has a receipt
    /// for the message (the earlier one is kept).
    pub fn record(&self, receipt: ReadReceipt) -> bool {
        let mut list = self.receipts.entry(receipt.message_id).or_default();
        if list.iter().any(|r| r.reader_id == receipt.reader_id) {
            return false;
        }
        list.push(receipt);
        true
    }

    pub fn get(&self, message_id: &Uuid) -> Vec<ReadReceipt> {
        self.receipts
            .get(message_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Whether every ID in `recipients` has a receipt for the message.
    pub fn covers(&self, message_id: &Uuid, recipients: &[String]) -> bool {
        let Some(list) = self.receipts.get(message_id) else {
            return recipients.is_empty();
        };
        recipients
            .iter()
            .all(|recipient| list.iter().any(|r| &r.reader_id == recipient))
    }

    /// Drop every receipt for the message. Returns how many were dropped.
    pub fn remove(&self, message_id: &Uuid) -> usize {
        self.receipts
            .remove(message_id)
            .map(|(_, list)| list.len())
            .unwrap_or(0)
    }
}
