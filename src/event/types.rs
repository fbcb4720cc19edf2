//! Lifecycle event decoding
//!
//! Events arrive in the custom-resource shape: PascalCase keys, every
//! property a string, action groups as a JSON-encoded array and the literal
//! `Undefined` standing in for absent values. Decoding turns them into an
//! [`AgentDesiredState`] with proper optional fields and validates it before
//! anything touches the remote API.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::core::{ActionGroupSpec, AgentDesiredState, AgentformError, Result, S3Location};

/// Sentinel the provisioning layer uses for "not set"
pub const UNDEFINED: &str = "Undefined";

/// Physical id prefix reported when a Create failed before any agent existed
pub const UNPROVISIONED_PREFIX: &str = "agentform-unprovisioned-";

/// Session TTL used when the property is missing
pub const DEFAULT_IDLE_SESSION_TTL_SECS: u32 = 600;

/// Kind of lifecycle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl std::str::FromStr for RequestType {
    type Err = AgentformError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            other => Err(AgentformError::invalid_event(format!(
                "unsupported RequestType '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        };
        write!(f, "{}", s)
    }
}

/// One decoded lifecycle event
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub request_type: RequestType,
    /// Unique per request; generated when the caller did not send one
    pub request_id: String,
    /// Absent on Create
    pub physical_resource_id: Option<String>,
    /// Desired state; always present for Create and Update
    pub properties: Option<AgentDesiredState>,
    /// Previous desired state, Update only
    pub old_properties: Option<AgentDesiredState>,
    /// Pre-signed URL the response document is PUT to, when present
    pub response_url: Option<String>,
    pub stack_id: Option<String>,
    pub logical_resource_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    request_type: String,
    request_id: Option<String>,
    physical_resource_id: Option<String>,
    resource_properties: Option<Value>,
    old_resource_properties: Option<Value>,
    #[serde(rename = "ResponseURL")]
    response_url: Option<String>,
    stack_id: Option<String>,
    logical_resource_id: Option<String>,
}

impl LifecycleEvent {
    /// Decode and validate an event
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw = RawEvent::deserialize(value)
            .map_err(|e| AgentformError::invalid_event(format!("malformed event: {}", e)))?;
        let request_type: RequestType = raw.request_type.parse()?;

        let properties = match request_type {
            RequestType::Create | RequestType::Update => {
                let props = raw.resource_properties.as_ref().ok_or_else(|| {
                    AgentformError::invalid_event("missing ResourceProperties")
                })?;
                Some(ResourceProperties::from_value(props)?.into_desired()?)
            }
            // Nothing in the properties is needed to delete
            RequestType::Delete => None,
        };

        let old_properties = match request_type {
            RequestType::Update => raw
                .old_resource_properties
                .as_ref()
                .and_then(|p| ResourceProperties::from_value(p).ok())
                .and_then(|p| p.into_desired().ok()),
            _ => None,
        };

        Ok(Self {
            request_type,
            request_id: raw
                .request_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            physical_resource_id: raw.physical_resource_id.filter(|id| !id.is_empty()),
            properties,
            old_properties,
            response_url: raw.response_url,
            stack_id: raw.stack_id,
            logical_resource_id: raw.logical_resource_id,
        })
    }

    /// Decode an event from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(&parse_event_json(json)?)
    }

    /// The desired state, or `InvalidEvent` for a Delete
    pub fn desired(&self) -> Result<&AgentDesiredState> {
        self.properties.as_ref().ok_or_else(|| {
            AgentformError::invalid_event(format!("{} event has no desired state", self.request_type))
        })
    }

    /// Idempotency token for creating `agent_name` in this request
    pub fn client_token(&self, agent_name: &str) -> String {
        let seed = format!("{}/{}", self.request_id, agent_name);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
    }

    /// Physical id to report when nothing better is known
    pub fn fallback_physical_id(&self) -> String {
        self.physical_resource_id
            .clone()
            .unwrap_or_else(|| placeholder_physical_id(&self.request_id))
    }
}

/// Physical id for a resource that was never provisioned
pub fn placeholder_physical_id(request_id: &str) -> String {
    format!("{}{}", UNPROVISIONED_PREFIX, request_id)
}

/// Whether `physical_id` came from [`placeholder_physical_id`]
pub fn is_placeholder(physical_id: &str) -> bool {
    physical_id.starts_with(UNPROVISIONED_PREFIX)
}

/// Best-effort physical id for an event that could not be decoded
/// Parse raw event text, keeping the parser's message in the error
pub fn parse_event_json(input: &str) -> Result<Value> {
    serde_json::from_str(input)
        .map_err(|e| AgentformError::invalid_event(format!("event is not valid JSON: {}", e)))
}

pub fn raw_physical_id(value: &Value) -> String {
    let field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };
    match field("PhysicalResourceId") {
        Some(id) => id.to_string(),
        None => placeholder_physical_id(field("RequestId").unwrap_or("unknown")),
    }
}

/// Pre-signed response URL of a raw event, if any
pub fn response_url(value: &Value) -> Option<&str> {
    value
        .get("ResponseURL")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
}

/// `None` for missing, empty or `Undefined` values
fn defined(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let v = v.trim();
        !v.is_empty() && !v.eq_ignore_ascii_case(UNDEFINED)
    })
}

/// `ResourceProperties` exactly as the provisioning layer sends them
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceProperties {
    pub agent_name: Option<String>,
    pub instruction: Option<String>,
    pub foundation_model: Option<String>,
    pub agent_resource_role_arn: Option<String>,
    pub description: Option<String>,
    /// Integer, usually encoded as a string
    #[serde(rename = "IdleSessionTTLInSeconds")]
    pub idle_session_ttl: Option<Value>,
    /// JSON-encoded array, or the array itself
    pub action_groups: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActionGroup {
    action_group_name: Option<String>,
    action_group_executor: Option<String>,
    s3_bucket_name: Option<String>,
    s3_object_key: Option<String>,
    description: Option<String>,
}

impl RawActionGroup {
    fn into_spec(self) -> Result<ActionGroupSpec> {
        let name = defined(self.action_group_name)
            .ok_or_else(|| AgentformError::invalid_event("action group without actionGroupName"))?;

        let api_schema = match (defined(self.s3_bucket_name), defined(self.s3_object_key)) {
            (Some(bucket), Some(key)) => Some(S3Location::new(bucket, key)),
            (None, None) => None,
            _ => {
                return Err(AgentformError::invalid_event(format!(
                    "action group '{}' needs both s3BucketName and s3ObjectKey",
                    name
                )))
            }
        };

        Ok(ActionGroupSpec {
            name,
            executor: defined(self.action_group_executor),
            api_schema,
            description: defined(self.description),
        })
    }
}

impl ResourceProperties {
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| {
            AgentformError::invalid_event(format!("malformed ResourceProperties: {}", e))
        })
    }

    /// Convert into a validated desired state
    pub fn into_desired(self) -> Result<AgentDesiredState> {
        let required = |value: Option<String>, key: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AgentformError::invalid_event(format!("{} is required", key)))
        };

        let desired = AgentDesiredState {
            name: required(self.agent_name, "AgentName")?,
            instruction: self.instruction.unwrap_or_default(),
            foundation_model: required(self.foundation_model, "FoundationModel")?,
            role_arn: required(self.agent_resource_role_arn, "AgentResourceRoleArn")?,
            description: defined(self.description),
            idle_session_ttl_secs: parse_ttl(self.idle_session_ttl.as_ref())?,
            action_groups: parse_action_groups(self.action_groups)?,
        };
        Ok(desired)
    }
}

fn parse_ttl(value: Option<&Value>) -> Result<u32> {
    let invalid = |v: &Value| {
        AgentformError::invalid_event(format!(
            "IdleSessionTTLInSeconds must be a positive integer, got {}",
            v
        ))
    };

    let secs = match value {
        None | Some(Value::Null) => return Ok(DEFAULT_IDLE_SESSION_TTL_SECS),
        Some(v @ Value::Number(n)) => n.as_i64().ok_or_else(|| invalid(v))?,
        Some(v @ Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid(v))?,
        Some(v) => return Err(invalid(v)),
    };

    match u32::try_from(secs) {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(AgentformError::invalid_event(format!(
            "IdleSessionTTLInSeconds must be a positive integer, got {}",
            secs
        ))),
    }
}

fn parse_action_groups(value: Option<Value>) -> Result<Vec<ActionGroupSpec>> {
    let raw: Vec<RawActionGroup> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => serde_json::from_str(&s),
        Some(v) => serde_json::from_value(v),
    }
    .map_err(|e| AgentformError::invalid_event(format!("malformed ActionGroups: {}", e)))?;

    let specs = raw
        .into_iter()
        .map(RawActionGroup::into_spec)
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    if let Some(dup) = specs.iter().find(|s| !seen.insert(s.name.as_str())) {
        return Err(AgentformError::invalid_event(format!(
            "duplicate action group name '{}'",
            dup.name
        )));
    }
    Ok(specs)
}
