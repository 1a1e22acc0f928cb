//! Schedule requests: the unit of work routed between hosts.
//!
//! A request names an action, the instance it targets and an engine-tagged
//! payload. The payload is decoded per action into [`ActionPayload`], so a
//! handler only ever sees the fields that are meaningful for its action.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::instance::InstanceType;

// =============================================================================
// Actions
// =============================================================================

/// Lifecycle action requested of the owning host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduleAction {
    CreateController,
    CreateReplica,
    StartInstance,
    StopInstance,
    DeleteInstance,
    /// Any tag this build does not know. Kept so the executor can reject it.
    Unknown(String),
}

impl ScheduleAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateController => "create-controller",
            Self::CreateReplica => "create-replica",
            Self::StartInstance => "start-instance",
            Self::StopInstance => "stop-instance",
            Self::DeleteInstance => "delete-instance",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for ScheduleAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "create-controller" => Self::CreateController,
            "create-replica" => Self::CreateReplica,
            "start-instance" => Self::StartInstance,
            "stop-instance" => Self::StopInstance,
            "delete-instance" => Self::DeleteInstance,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<ScheduleAction> for String {
    fn from(action: ScheduleAction) -> Self {
        match action {
            ScheduleAction::Unknown(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload for [`ScheduleAction::CreateController`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateControllerPayload {
    pub instance_name: String,
    pub volume_name: String,
    pub longhorn_image: String,
    /// Replica endpoints, already in `tcp://<address>:9502` form.
    #[serde(default)]
    pub replica_addresses: Vec<String>,
}

/// Payload for [`ScheduleAction::CreateReplica`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReplicaPayload {
    pub instance_name: String,
    pub volume_name: String,
    /// Declared volume size in bytes.
    pub volume_size: u64,
    pub longhorn_image: String,
}

/// A decoded request payload, one variant per action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    CreateController(CreateControllerPayload),
    CreateReplica(CreateReplicaPayload),
    StartInstance,
    StopInstance,
    DeleteInstance,
}

// =============================================================================
// Request
// =============================================================================

/// The instance a request targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    /// Empty when the scheduler should pick the host.
    #[serde(default)]
    pub host_id: String,
}

/// Engine-tagged payload envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleData {
    /// Kind of engine that must execute the request.
    pub orchestrator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ScheduleData {
    /// Envelope without a payload, used by start/stop/delete.
    pub fn empty(orchestrator: impl Into<String>) -> Self {
        Self {
            orchestrator: orchestrator.into(),
            data: None,
        }
    }

    /// Envelope carrying a serialized payload.
    pub fn with_payload<T: Serialize>(
        orchestrator: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            orchestrator: orchestrator.into(),
            data: Some(serde_json::to_value(payload)?),
        })
    }
}

/// A requested lifecycle action, its target and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub action: ScheduleAction,
    pub instance: ScheduleInstance,
    pub data: ScheduleData,
}

impl ScheduleRequest {
    /// Decode the payload according to the action tag.
    ///
    /// Lifecycle actions on an existing instance carry no payload; anything
    /// attached to them is ignored.
    pub fn payload(&self) -> Result<ActionPayload, PayloadError> {
        match &self.action {
            ScheduleAction::CreateController => {
                self.decode().map(ActionPayload::CreateController)
            }
            ScheduleAction::CreateReplica => self.decode().map(ActionPayload::CreateReplica),
            ScheduleAction::StartInstance => Ok(ActionPayload::StartInstance),
            ScheduleAction::StopInstance => Ok(ActionPayload::StopInstance),
            ScheduleAction::DeleteInstance => Ok(ActionPayload::DeleteInstance),
            ScheduleAction::Unknown(tag) => Err(PayloadError::UnknownAction(tag.clone())),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, PayloadError> {
        let value = self.data.data.clone().ok_or_else(|| PayloadError::Missing {
            action: self.action.to_string(),
        })?;
        serde_json::from_value(value).map_err(|source| PayloadError::Malformed {
            action: self.action.to_string(),
            source,
        })
    }
}
