use serde::{Deserialize, Serialize};
use std::fmt;

/// Artifact type of a manifest push
pub const MANIFEST_TYPE: &str = "manifest";

/// Envelope of the inbound notification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Occurrence {
    pub body: PushNotification,
}

/// Registry push notification
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PushNotification {
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    #[serde(default)]
    pub error: Option<PushError>,
}

/// Error reported by the registry for a failed push
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PushError {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EventType(String),
    PushFailed(String),
    NotAManifest(String),
    MissingTag,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EventType(t) => write!(f, "event type {:?} is not a push", t),
            SkipReason::PushFailed(code) => write!(f, "push failed ({})", code),
            SkipReason::NotAManifest(t) => write!(f, "artifact type {:?} is not a manifest", t),
            SkipReason::MissingTag => write!(f, "push has no tag"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Actionable {
        repository: String,
        tag: String,
        /// Manifest digest reported by the registry, if any
        digest: Option<String>,
    },
    Skip(SkipReason),
}

/// Decode and classify a notification
///
/// The event type is checked before the body is looked at, so a foreign
/// event with any body is a skip rather than a decode error.
pub fn classify(
    event_type: Option<&str>,
    body: &[u8],
    expected_type: &str,
) -> Result<Classification, serde_json::Error> {
    let event_type = event_type.unwrap_or_default();
    if event_type != expected_type {
        return Ok(Classification::Skip(SkipReason::EventType(
            event_type.to_string(),
        )));
    }

    let occurrence: Occurrence = serde_json::from_slice(body)?;
    Ok(classify_notification(occurrence.body))
}

fn classify_notification(notification: PushNotification) -> Classification {
    if let Some(error) = notification.error {
        let code = error
            .code
            .or(error.message)
            .unwrap_or_else(|| "unknown".to_string());
        return Classification::Skip(SkipReason::PushFailed(code));
    }
    if notification.tag.is_empty() {
        return Classification::Skip(SkipReason::MissingTag);
    }
    if notification.artifact_type != MANIFEST_TYPE {
        return Classification::Skip(SkipReason::NotAManifest(notification.artifact_type));
    }
    Classification::Actionable {
        repository: notification.repository,
        tag: notification.tag,
        digest: notification.digest.filter(|digest| !digest.is_empty()),
    }
}
