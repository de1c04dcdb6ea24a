use std::path::PathBuf;

use tgbridge_tgtg::TgtgError;
use thiserror::Error;

/// Errors from the on-disk token and known-shops files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("cron expression '{expression}' has no upcoming fire time")]
    NoUpcomingFire { expression: String },
}

/// Errors from the pub/sub transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("not connected to the MQTT broker, dropped message for {topic}")]
    Disconnected { topic: String },

    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a poll cycle did not complete.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("marketplace request failed: {0}")]
    Fetch(#[from] TgtgError),

    #[error("publish to {topic} failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },
}
