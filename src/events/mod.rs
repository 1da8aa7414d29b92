use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the core services after a committed transaction.
///
/// Statuses travel as strings so consumers do not need the entity enums to
/// deserialize the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Production order events
    ProductionOrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    ProductionOrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ProductionOrderCancelled(Uuid),
    ProductionOrderDeleted(Uuid),

    // Quality inspection events
    InspectionCreated {
        inspection_id: Uuid,
        inspection_number: String,
    },
    InspectionItemRecorded {
        inspection_id: Uuid,
        item_id: Uuid,
        passed: bool,
    },
    InspectionFinalized {
        inspection_id: Uuid,
        status: String,
    },
    InspectionStatusOverridden {
        inspection_id: Uuid,
        status: String,
    },
    InspectionResubmitted(Uuid),

    // Material requirement events
    MaterialShortageDetected {
        material_id: Uuid,
        required: Decimal,
        on_hand: Decimal,
        shortage: Decimal,
    },
    RequirementsCalculated {
        product_id: Uuid,
        line_count: usize,
        can_proceed: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging failures instead of propagating them.
    ///
    /// Used after a committed transaction: losing an event must not roll
    /// back or fail the business operation it describes.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Drains the event channel and logs each event. The orchestration layer
/// replaces this with its own consumer when it wants to persist or forward
/// the stream.
pub struct EventProcessor {
    receiver: mpsc::Receiver<Event>,
}

impl EventProcessor {
    pub fn new(receiver: mpsc::Receiver<Event>) -> Self {
        Self { receiver }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.receiver.recv().await {
            info!(?event, "domain event");
        }
    }
}

/// Builds a bounded event channel with its logging processor.
pub fn event_channel(buffer: usize) -> (EventSender, EventProcessor) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), EventProcessor::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_processor_channel() {
        let (sender, mut processor) = event_channel(4);
        sender
            .send(Event::ProductionOrderCancelled(Uuid::new_v4()))
            .await
            .expect("channel open");
        let received = processor.receiver.recv().await;
        assert!(matches!(
            received,
            Some(Event::ProductionOrderCancelled(_))
        ));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, processor) = event_channel(1);
        drop(processor);
        // Must not panic or error out
        sender
            .send_or_log(Event::InspectionResubmitted(Uuid::new_v4()))
            .await;
    }
}
