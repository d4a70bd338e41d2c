use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// What the dispatcher did with one queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    /// Sender succeeded; message acknowledged.
    Delivered,
    /// Retriable failure; message left for redelivery after its visibility timeout.
    Retry,
    /// Permanent failure, malformed body or no registered sender; message acknowledged.
    Dropped,
}

impl DeliveryOutcome {
    pub fn acknowledges(&self) -> bool {
        !matches!(self, DeliveryOutcome::Retry)
    }
}

impl Display for DeliveryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Retry => write!(f, "retry"),
            DeliveryOutcome::Dropped => write!(f, "dropped"),
        }
    }
}
