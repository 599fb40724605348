//! `StreamChunk`, the wire/log representation of one piece of a model
//! response (spec §4.1). Most kinds carry a fixed `type` discriminant and
//! round-trip through an ordinary derived tagged enum; `data-<kind>` carries
//! its discriminant suffix in the tag itself, so `StreamChunk` implements
//! `Serialize`/`Deserialize` by hand via a `serde_json::Value` intermediate,
//! mirroring `chatcore_types::Part`.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// One chunk of a model response stream, as produced by the model driver,
/// applied by the [chunk builder](crate::builder::apply), stored in the
/// Resumable Stream Log, and broadcast to connections.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextStart,
    TextDelta { delta: String },
    TextEnd,
    ReasoningStart,
    ReasoningDelta { delta: String },
    ReasoningEnd,
    File {
        media_type: String,
        url: String,
        provider_metadata: Option<Value>,
    },
    SourceUrl {
        source_id: String,
        url: Option<String>,
        title: Option<String>,
        filename: Option<String>,
        media_type: Option<String>,
        provider_metadata: Option<Value>,
    },
    SourceDocument {
        source_id: String,
        url: Option<String>,
        title: Option<String>,
        filename: Option<String>,
        media_type: Option<String>,
        provider_metadata: Option<Value>,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolInputError {
        tool_call_id: String,
        tool_name: String,
        input: Option<Value>,
        error_text: String,
    },
    ToolApprovalRequest {
        tool_call_id: String,
        approval_id: String,
    },
    ToolOutputDenied {
        tool_call_id: String,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
        preliminary: Option<bool>,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    /// `step-start` and its `start-step` alias.
    StepStart,
    Data {
        kind: String,
        id: Option<String>,
        data: Value,
        transient: bool,
    },
    /// Metadata-only chunks: not applied to `parts`, but carry message-level
    /// state the caller may want to record (spec §4.1: "caller may capture
    /// metadata-only chunks... to update message-level metadata").
    Start { message_id: Option<String> },
    Finish,
    MessageMetadata { metadata: Value },
    /// A chunk whose `type` this build doesn't recognize. Preserved so a
    /// forward-compatible model driver doesn't lose data on replay; never
    /// handled by the chunk builder.
    Unrecognized { kind: String, body: Value },
}

impl StreamChunk {
    fn type_tag(&self) -> String {
        match self {
            StreamChunk::TextStart => "text-start".to_string(),
            StreamChunk::TextDelta { .. } => "text-delta".to_string(),
            StreamChunk::TextEnd => "text-end".to_string(),
            StreamChunk::ReasoningStart => "reasoning-start".to_string(),
            StreamChunk::ReasoningDelta { .. } => "reasoning-delta".to_string(),
            StreamChunk::ReasoningEnd => "reasoning-end".to_string(),
            StreamChunk::File { .. } => "file".to_string(),
            StreamChunk::SourceUrl { .. } => "source-url".to_string(),
            StreamChunk::SourceDocument { .. } => "source-document".to_string(),
            StreamChunk::ToolInputStart { .. } => "tool-input-start".to_string(),
            StreamChunk::ToolInputDelta { .. } => "tool-input-delta".to_string(),
            StreamChunk::ToolInputAvailable { .. } => "tool-input-available".to_string(),
            StreamChunk::ToolInputError { .. } => "tool-input-error".to_string(),
            StreamChunk::ToolApprovalRequest { .. } => "tool-approval-request".to_string(),
            StreamChunk::ToolOutputDenied { .. } => "tool-output-denied".to_string(),
            StreamChunk::ToolOutputAvailable { .. } => "tool-output-available".to_string(),
            StreamChunk::ToolOutputError { .. } => "tool-output-error".to_string(),
            StreamChunk::StepStart => "step-start".to_string(),
            StreamChunk::Data { kind, .. } => format!("data-{kind}"),
            StreamChunk::Start { .. } => "start".to_string(),
            StreamChunk::Finish => "finish".to_string(),
            StreamChunk::MessageMetadata { .. } => "message-metadata".to_string(),
            StreamChunk::Unrecognized { kind, .. } => kind.clone(),
        }
    }

    fn to_value(&self) -> Value {
        let mut obj = match self {
            StreamChunk::TextStart
            | StreamChunk::TextEnd
            | StreamChunk::ReasoningStart
            | StreamChunk::ReasoningEnd
            | StreamChunk::StepStart
            | StreamChunk::Finish => Value::Object(Map::new()),
            StreamChunk::TextDelta { delta } | StreamChunk::ReasoningDelta { delta } => {
                json!({ "delta": delta })
            }
            StreamChunk::File {
                media_type,
                url,
                provider_metadata,
            } => {
                let mut m = Map::new();
                m.insert("mediaType".to_string(), json!(media_type));
                m.insert("url".to_string(), json!(url));
                insert_opt_value(&mut m, "providerMetadata", provider_metadata);
                Value::Object(m)
            }
            StreamChunk::SourceUrl {
                source_id,
                url,
                title,
                filename,
                media_type,
                provider_metadata,
            }
            | StreamChunk::SourceDocument {
                source_id,
                url,
                title,
                filename,
                media_type,
                provider_metadata,
            } => {
                let mut m = Map::new();
                m.insert("sourceId".to_string(), json!(source_id));
                insert_opt(&mut m, "url", url);
                insert_opt(&mut m, "title", title);
                insert_opt(&mut m, "filename", filename);
                insert_opt(&mut m, "mediaType", media_type);
                insert_opt_value(&mut m, "providerMetadata", provider_metadata);
                Value::Object(m)
            }
            StreamChunk::ToolInputStart {
                tool_call_id,
                tool_name,
            } => json!({ "toolCallId": tool_call_id, "toolName": tool_name }),
            StreamChunk::ToolInputDelta {
                tool_call_id,
                input_delta,
            } => json!({ "toolCallId": tool_call_id, "inputDelta": input_delta }),
            StreamChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                json!({ "toolCallId": tool_call_id, "toolName": tool_name, "input": input })
            }
            StreamChunk::ToolInputError {
                tool_call_id,
                tool_name,
                input,
                error_text,
            } => {
                let mut m = Map::new();
                m.insert("toolCallId".to_string(), json!(tool_call_id));
                m.insert("toolName".to_string(), json!(tool_name));
                if let Some(v) = input {
                    m.insert("input".to_string(), v.clone());
                }
                m.insert("errorText".to_string(), json!(error_text));
                Value::Object(m)
            }
            StreamChunk::ToolApprovalRequest {
                tool_call_id,
                approval_id,
            } => json!({ "toolCallId": tool_call_id, "approvalId": approval_id }),
            StreamChunk::ToolOutputDenied { tool_call_id } => {
                json!({ "toolCallId": tool_call_id })
            }
            StreamChunk::ToolOutputAvailable {
                tool_call_id,
                output,
                preliminary,
            } => {
                let mut m = Map::new();
                m.insert("toolCallId".to_string(), json!(tool_call_id));
                m.insert("output".to_string(), output.clone());
                if let Some(p) = preliminary {
                    m.insert("preliminary".to_string(), json!(p));
                }
                Value::Object(m)
            }
            StreamChunk::ToolOutputError {
                tool_call_id,
                error_text,
            } => json!({ "toolCallId": tool_call_id, "errorText": error_text }),
            StreamChunk::Data {
                id,
                data,
                transient,
                ..
            } => {
                let mut m = Map::new();
                insert_opt(&mut m, "id", id);
                m.insert("data".to_string(), data.clone());
                m.insert("transient".to_string(), json!(transient));
                Value::Object(m)
            }
            StreamChunk::Start { message_id } => {
                let mut m = Map::new();
                insert_opt(&mut m, "messageId", message_id);
                Value::Object(m)
            }
            StreamChunk::MessageMetadata { metadata } => {
                json!({ "metadata": metadata })
            }
            StreamChunk::Unrecognized { body, .. } => body.clone(),
        };
        if let Value::Object(m) = &mut obj {
            m.insert("type".to_string(), json!(self.type_tag()));
        }
        obj
    }

    fn from_value(value: Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "chunk must be a JSON object".to_string())?;
        let type_tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "chunk missing \"type\"".to_string())?
            .to_string();

        let get_str = |key: &str| -> Option<String> {
            obj.get(key).and_then(Value::as_str).map(str::to_string)
        };
        let require_str = |key: &str| -> Result<String, String> {
            get_str(key).ok_or_else(|| format!("missing \"{key}\""))
        };

        match type_tag.as_str() {
            "text-start" => Ok(StreamChunk::TextStart),
            "text-delta" => Ok(StreamChunk::TextDelta {
                delta: get_str("delta").unwrap_or_default(),
            }),
            "text-end" => Ok(StreamChunk::TextEnd),
            "reasoning-start" => Ok(StreamChunk::ReasoningStart),
            "reasoning-delta" => Ok(StreamChunk::ReasoningDelta {
                delta: get_str("delta").unwrap_or_default(),
            }),
            "reasoning-end" => Ok(StreamChunk::ReasoningEnd),
            "file" => Ok(StreamChunk::File {
                media_type: get_str("mediaType").unwrap_or_default(),
                url: get_str("url").unwrap_or_default(),
                provider_metadata: obj.get("providerMetadata").cloned(),
            }),
            "source-url" | "source-document" => {
                let source_id = get_str("sourceId").unwrap_or_default();
                let url = get_str("url");
                let title = get_str("title");
                let filename = get_str("filename");
                let media_type = get_str("mediaType");
                let provider_metadata = obj.get("providerMetadata").cloned();
                if type_tag == "source-url" {
                    Ok(StreamChunk::SourceUrl {
                        source_id,
                        url,
                        title,
                        filename,
                        media_type,
                        provider_metadata,
                    })
                } else {
                    Ok(StreamChunk::SourceDocument {
                        source_id,
                        url,
                        title,
                        filename,
                        media_type,
                        provider_metadata,
                    })
                }
            }
            "tool-input-start" => Ok(StreamChunk::ToolInputStart {
                tool_call_id: require_str("toolCallId")?,
                tool_name: get_str("toolName").unwrap_or_default(),
            }),
            "tool-input-delta" => Ok(StreamChunk::ToolInputDelta {
                tool_call_id: require_str("toolCallId")?,
                input_delta: get_str("inputDelta").unwrap_or_default(),
            }),
            "tool-input-available" => Ok(StreamChunk::ToolInputAvailable {
                tool_call_id: require_str("toolCallId")?,
                tool_name: get_str("toolName").unwrap_or_default(),
                input: obj.get("input").cloned().unwrap_or(Value::Null),
            }),
            "tool-input-error" => Ok(StreamChunk::ToolInputError {
                tool_call_id: require_str("toolCallId")?,
                tool_name: get_str("toolName").unwrap_or_default(),
                input: obj.get("input").cloned(),
                error_text: get_str("errorText").unwrap_or_default(),
            }),
            "tool-approval-request" => Ok(StreamChunk::ToolApprovalRequest {
                tool_call_id: require_str("toolCallId")?,
                approval_id: get_str("approvalId").unwrap_or_default(),
            }),
            "tool-output-denied" => Ok(StreamChunk::ToolOutputDenied {
                tool_call_id: require_str("toolCallId")?,
            }),
            "tool-output-available" => Ok(StreamChunk::ToolOutputAvailable {
                tool_call_id: require_str("toolCallId")?,
                output: obj.get("output").cloned().unwrap_or(Value::Null),
                preliminary: obj.get("preliminary").and_then(Value::as_bool),
            }),
            "tool-output-error" => Ok(StreamChunk::ToolOutputError {
                tool_call_id: require_str("toolCallId")?,
                error_text: get_str("errorText").unwrap_or_default(),
            }),
            "step-start" | "start-step" => Ok(StreamChunk::StepStart),
            "start" => Ok(StreamChunk::Start {
                message_id: get_str("messageId"),
            }),
            "finish" => Ok(StreamChunk::Finish),
            "message-metadata" => Ok(StreamChunk::MessageMetadata {
                metadata: obj.get("metadata").cloned().unwrap_or(Value::Null),
            }),
            other if other.starts_with("data-") => {
                let kind = other.trim_start_matches("data-").to_string();
                Ok(StreamChunk::Data {
                    kind,
                    id: get_str("id"),
                    data: obj.get("data").cloned().unwrap_or(Value::Null),
                    transient: obj
                        .get("transient")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
            }
            other => Ok(StreamChunk::Unrecognized {
                kind: other.to_string(),
                body: value.clone(),
            }),
        }
    }
}

fn insert_opt(m: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        m.insert(key.to_string(), json!(v));
    }
}

fn insert_opt_value(m: &mut Map<String, Value>, key: &str, value: &Option<Value>) {
    if let Some(v) = value {
        m.insert(key.to_string(), v.clone());
    }
}

impl Serialize for StreamChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StreamChunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        StreamChunk::from_value(value).map_err(D::Error::custom)
    }
}
