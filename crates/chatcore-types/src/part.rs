//! The `Part` tagged union (spec §3) and the streaming-state lattices that
//! govern how a part's `state` field may evolve.
//!
//! `tool-<name>` and `data-<kind>` parts carry their discriminant suffix in
//! the wire `type` field itself, which a derived `#[serde(tag = "type")]`
//! enum cannot express. `Part` therefore implements `Serialize`/`Deserialize`
//! by hand via a `serde_json::Value` intermediate; every other per-kind field
//! still goes through ordinary struct (de)serialization.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Streaming state of a `text` or `reasoning` part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextState {
    Streaming,
    Done,
}

/// Streaming state of a `tool-<name>` part.
///
/// Ordered as a lattice (spec §8 invariant 2):
/// `input-streaming < input-available < {approval-requested < approval-responded}? < terminal`.
/// `rank()` gives each state a position in that lattice so transitions can be
/// checked generically instead of hand-matching every pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    ApprovalRequested,
    ApprovalResponded,
    OutputAvailable,
    OutputError,
    OutputDenied,
}

impl ToolState {
    /// Position in the monotonic lattice. Higher ranks must never be
    /// downgraded to lower ones; `approval-requested`/`approval-responded`
    /// and the three terminal states are each their own plateau. Public so
    /// the merge algorithm (spec §4.4.5) can compare two states' lifecycle
    /// progress without re-deriving this ordering.
    pub fn lifecycle_rank(self) -> u8 {
        match self {
            ToolState::InputStreaming => 0,
            ToolState::InputAvailable => 1,
            ToolState::ApprovalRequested => 2,
            ToolState::ApprovalResponded => 3,
            ToolState::OutputAvailable | ToolState::OutputError | ToolState::OutputDenied => 4,
        }
    }

    /// Whether no further frame may change this part's state.
    pub fn is_terminal(self) -> bool {
        self.lifecycle_rank() == 4
    }

    /// Whether transitioning from `self` to `next` respects the lattice.
    /// A part whose state is already terminal can never transition again,
    /// even to the "same" terminal state, matching spec invariant 2.
    pub fn can_transition_to(self, next: ToolState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.lifecycle_rank() >= self.lifecycle_rank()
    }
}

/// `approval.id` persists through subsequent transitions once attached
/// (spec §3 invariants). It is only present when a `tool-approval-request`
/// chunk actually assigned one; an approval responding to a tool part that
/// never went through `approval-requested` (spec §4.4.4 step 4) carries no
/// id at all, rather than a fabricated empty one. `approved` is filled in
/// once the client responds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

/// One entry of a message's `parts` array (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text {
        text: String,
        state: TextState,
    },
    Reasoning {
        text: String,
        state: TextState,
        provider_metadata: Option<Value>,
    },
    File {
        media_type: String,
        url: String,
    },
    SourceUrl {
        source_id: String,
        url: Option<String>,
        title: Option<String>,
        filename: Option<String>,
        media_type: Option<String>,
    },
    SourceDocument {
        source_id: String,
        url: Option<String>,
        title: Option<String>,
        filename: Option<String>,
        media_type: Option<String>,
    },
    Tool {
        tool_name: String,
        tool_call_id: String,
        input: Option<Value>,
        output: Option<Value>,
        error_text: Option<String>,
        state: ToolState,
        approval: Option<Approval>,
        preliminary: Option<bool>,
        provider_metadata: Option<Value>,
    },
    Data {
        kind: String,
        id: Option<String>,
        data: Value,
        transient: bool,
    },
    StepStart,
}

impl Part {
    /// `toolCallId` of this part, if it is a tool part. Used by the chunk
    /// builder and the merge algorithm to locate parts by merge key.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Part::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub fn tool_state(&self) -> Option<ToolState> {
        match self {
            Part::Tool { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// `(type, id)` key used to reconcile `data-<kind>` parts in place
    /// (spec §4.1: "Data parts with `(type, id)` both present are
    /// reconciled in place; others append.").
    pub fn data_key(&self) -> Option<(&str, &str)> {
        match self {
            Part::Data {
                kind,
                id: Some(id),
                ..
            } => Some((kind.as_str(), id.as_str())),
            _ => None,
        }
    }

    /// Mutable access to this part's provider-metadata object, for the
    /// sanitization pass (spec §4.4.7). Only `reasoning` and `tool-<name>`
    /// parts carry provider metadata.
    pub fn provider_metadata_mut(&mut self) -> Option<&mut Option<Value>> {
        match self {
            Part::Reasoning {
                provider_metadata, ..
            }
            | Part::Tool {
                provider_metadata, ..
            } => Some(provider_metadata),
            _ => None,
        }
    }

    fn type_tag(&self) -> String {
        match self {
            Part::Text { .. } => "text".to_string(),
            Part::Reasoning { .. } => "reasoning".to_string(),
            Part::File { .. } => "file".to_string(),
            Part::SourceUrl { .. } => "source-url".to_string(),
            Part::SourceDocument { .. } => "source-document".to_string(),
            Part::Tool { tool_name, .. } => format!("tool-{tool_name}"),
            Part::Data { kind, .. } => format!("data-{kind}"),
            Part::StepStart => "step-start".to_string(),
        }
    }

    fn to_value(&self) -> Value {
        let mut obj = match self {
            Part::Text { text, state } => json!({ "text": text, "state": state }),
            Part::Reasoning {
                text,
                state,
                provider_metadata,
            } => {
                let mut m = json!({ "text": text, "state": state });
                if let Some(pm) = provider_metadata {
                    m.as_object_mut()
                        .unwrap()
                        .insert("providerMetadata".to_string(), pm.clone());
                }
                m
            }
            Part::File { media_type, url } => json!({ "mediaType": media_type, "url": url }),
            Part::SourceUrl {
                source_id,
                url,
                title,
                filename,
                media_type,
            }
            | Part::SourceDocument {
                source_id,
                url,
                title,
                filename,
                media_type,
            } => {
                let mut m = Map::new();
                m.insert("sourceId".to_string(), json!(source_id));
                insert_opt(&mut m, "url", url);
                insert_opt(&mut m, "title", title);
                insert_opt(&mut m, "filename", filename);
                insert_opt(&mut m, "mediaType", media_type);
                Value::Object(m)
            }
            Part::Tool {
                tool_call_id,
                input,
                output,
                error_text,
                state,
                approval,
                preliminary,
                provider_metadata,
                ..
            } => {
                let mut m = Map::new();
                m.insert("toolCallId".to_string(), json!(tool_call_id));
                m.insert("state".to_string(), json!(state));
                if let Some(v) = input {
                    m.insert("input".to_string(), v.clone());
                }
                if let Some(v) = output {
                    m.insert("output".to_string(), v.clone());
                }
                insert_opt(&mut m, "errorText", error_text);
                if let Some(a) = approval {
                    m.insert("approval".to_string(), serde_json::to_value(a).unwrap());
                }
                if let Some(p) = preliminary {
                    m.insert("preliminary".to_string(), json!(p));
                }
                if let Some(pm) = provider_metadata {
                    m.insert("providerMetadata".to_string(), pm.clone());
                }
                Value::Object(m)
            }
            Part::Data { id, data, transient, .. } => {
                let mut m = Map::new();
                insert_opt(&mut m, "id", id);
                m.insert("data".to_string(), data.clone());
                m.insert("transient".to_string(), json!(transient));
                Value::Object(m)
            }
            Part::StepStart => Value::Object(Map::new()),
        };
        obj.as_object_mut()
            .unwrap()
            .insert("type".to_string(), json!(self.type_tag()));
        obj
    }

    fn from_value(value: Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "part must be a JSON object".to_string())?;
        let type_tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "part missing \"type\"".to_string())?;

        let get_str = |key: &str| -> Option<String> {
            obj.get(key).and_then(Value::as_str).map(str::to_string)
        };

        match type_tag {
            "text" => Ok(Part::Text {
                text: get_str("text").unwrap_or_default(),
                state: parse_field(obj, "state")?,
            }),
            "reasoning" => Ok(Part::Reasoning {
                text: get_str("text").unwrap_or_default(),
                state: parse_field(obj, "state")?,
                provider_metadata: obj.get("providerMetadata").cloned(),
            }),
            "file" => Ok(Part::File {
                media_type: get_str("mediaType").unwrap_or_default(),
                url: get_str("url").unwrap_or_default(),
            }),
            "source-url" | "source-document" => {
                let source_id = get_str("sourceId").unwrap_or_default();
                let url = get_str("url");
                let title = get_str("title");
                let filename = get_str("filename");
                let media_type = get_str("mediaType");
                if type_tag == "source-url" {
                    Ok(Part::SourceUrl {
                        source_id,
                        url,
                        title,
                        filename,
                        media_type,
                    })
                } else {
                    Ok(Part::SourceDocument {
                        source_id,
                        url,
                        title,
                        filename,
                        media_type,
                    })
                }
            }
            "step-start" | "start-step" => Ok(Part::StepStart),
            other if other.starts_with("tool-") => {
                let tool_name = other.trim_start_matches("tool-").to_string();
                let approval = match obj.get("approval") {
                    Some(v) => {
                        Some(serde_json::from_value(v.clone()).map_err(|e| e.to_string())?)
                    }
                    None => None,
                };
                Ok(Part::Tool {
                    tool_name,
                    tool_call_id: get_str("toolCallId").unwrap_or_default(),
                    input: obj.get("input").cloned(),
                    output: obj.get("output").cloned(),
                    error_text: get_str("errorText"),
                    state: parse_field(obj, "state")?,
                    approval,
                    preliminary: obj.get("preliminary").and_then(Value::as_bool),
                    provider_metadata: obj.get("providerMetadata").cloned(),
                })
            }
            other if other.starts_with("data-") => {
                let kind = other.trim_start_matches("data-").to_string();
                Ok(Part::Data {
                    kind,
                    id: get_str("id"),
                    data: obj.get("data").cloned().unwrap_or(Value::Null),
                    transient: obj.get("transient").and_then(Value::as_bool).unwrap_or(false),
                })
            }
            other => Err(format!("unrecognized part type: {other}")),
        }
    }
}

fn insert_opt(m: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        m.insert(key.to_string(), json!(v));
    }
}

fn parse_field<T: serde::de::DeserializeOwned>(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<T, String> {
    let v = obj.get(key).ok_or_else(|| format!("missing \"{key}\""))?;
    serde_json::from_value(v.clone()).map_err(|e| e.to_string())
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Part::from_value(value).map_err(D::Error::custom)
    }
}
