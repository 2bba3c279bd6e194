use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Ledger status of an event.
///
/// `Sent` and `FailedDlq` are terminal: once either is recorded, every later
/// redelivery of the same event is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    FailedRetrying,
    FailedDlq,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "QUEUED",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::FailedRetrying => "FAILED_RETRYING",
            DeliveryStatus::FailedDlq => "FAILED_DLQ",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::FailedDlq)
    }
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "QUEUED" => Ok(DeliveryStatus::Queued),
            "SENT" => Ok(DeliveryStatus::Sent),
            "FAILED_RETRYING" => Ok(DeliveryStatus::FailedRetrying),
            "FAILED_DLQ" => Ok(DeliveryStatus::FailedDlq),
            other => Err(anyhow::anyhow!("Unknown delivery status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sent_and_dlq_are_terminal() {
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::FailedDlq.is_terminal());
        assert!(!DeliveryStatus::Queued.is_terminal());
        assert!(!DeliveryStatus::FailedRetrying.is_terminal());
    }

    #[test]
    fn column_values_parse_back() {
        for status in [
            DeliveryStatus::Queued,
            DeliveryStatus::Sent,
            DeliveryStatus::FailedRetrying,
            DeliveryStatus::FailedDlq,
        ] {
            assert_eq!(status.to_string().parse::<DeliveryStatus>().unwrap(), status);
        }
        assert!("sent".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn serializes_like_the_column() {
        let json = serde_json::to_string(&DeliveryStatus::FailedRetrying).unwrap();
        assert_eq!(json, "\"FAILED_RETRYING\"");
    }
}
