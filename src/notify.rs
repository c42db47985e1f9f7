use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{EventId, MatchId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BracketEvent {
    #[serde(rename_all = "camelCase")]
    BracketUpdated { event_id: EventId },
    #[serde(rename_all = "camelCase")]
    MatchUpdated { event_id: EventId, match_id: MatchId },
}

/// Fire-and-forget change notifications. Implementations must not fail the
/// caller.
pub trait BracketNotifier: Send + Sync {
    fn notify(&self, event: BracketEvent);
}

pub struct BroadcastNotifier {
    sender: broadcast::Sender<BracketEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        BroadcastNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BracketEvent> {
        self.sender.subscribe()
    }
}

impl BracketNotifier for BroadcastNotifier {
    fn notify(&self, event: BracketEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(?event, "no notification subscribers");
        }
    }
}
