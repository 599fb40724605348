//! The chunk builder (spec §4.1): a pure, deterministic mapping from a
//! `StreamChunk` onto an in-progress message's `parts`. Mutates in place for
//! throughput on the hot streaming path.

use chatcore_types::{Approval, Part, TextState, ToolState};

use crate::chunk::StreamChunk;

/// Apply one chunk to `parts`, mutating in place. Returns whether the chunk
/// was a recognized, part-mutating kind; metadata-only and unrecognized
/// chunks return `false` so the caller can handle them separately (spec
/// §4.1: "caller may capture metadata-only chunks... without mutating
/// parts"). Lookups search from the end of `parts`; the builder never
/// searches or mutates across messages.
pub fn apply(parts: &mut Vec<Part>, chunk: &StreamChunk) -> bool {
    match chunk {
        StreamChunk::TextStart => {
            parts.push(Part::Text {
                text: String::new(),
                state: TextState::Streaming,
            });
            true
        }
        StreamChunk::TextDelta { delta } => {
            match find_text_mut(parts) {
                Some(Part::Text { text, .. }) => text.push_str(delta),
                _ => parts.push(Part::Text {
                    text: delta.clone(),
                    state: TextState::Streaming,
                }),
            }
            true
        }
        StreamChunk::TextEnd => {
            if let Some(Part::Text { state, .. }) = find_text_mut(parts) {
                *state = TextState::Done;
            }
            true
        }
        StreamChunk::ReasoningStart => {
            parts.push(Part::Reasoning {
                text: String::new(),
                state: TextState::Streaming,
                provider_metadata: None,
            });
            true
        }
        StreamChunk::ReasoningDelta { delta } => {
            match find_reasoning_mut(parts) {
                Some(Part::Reasoning { text, .. }) => text.push_str(delta),
                _ => parts.push(Part::Reasoning {
                    text: delta.clone(),
                    state: TextState::Streaming,
                    provider_metadata: None,
                }),
            }
            true
        }
        StreamChunk::ReasoningEnd => {
            if let Some(Part::Reasoning { state, .. }) = find_reasoning_mut(parts) {
                *state = TextState::Done;
            }
            true
        }
        StreamChunk::File {
            media_type, url, ..
        } => {
            parts.push(Part::File {
                media_type: media_type.clone(),
                url: url.clone(),
            });
            true
        }
        StreamChunk::SourceUrl {
            source_id,
            url,
            title,
            filename,
            media_type,
            ..
        } => {
            parts.push(Part::SourceUrl {
                source_id: source_id.clone(),
                url: url.clone(),
                title: title.clone(),
                filename: filename.clone(),
                media_type: media_type.clone(),
            });
            true
        }
        StreamChunk::SourceDocument {
            source_id,
            url,
            title,
            filename,
            media_type,
            ..
        } => {
            parts.push(Part::SourceDocument {
                source_id: source_id.clone(),
                url: url.clone(),
                title: title.clone(),
                filename: filename.clone(),
                media_type: media_type.clone(),
            });
            true
        }
        StreamChunk::ToolInputStart {
            tool_call_id,
            tool_name,
        } => {
            parts.push(Part::Tool {
                tool_name: tool_name.clone(),
                tool_call_id: tool_call_id.clone(),
                input: None,
                output: None,
                error_text: None,
                state: ToolState::InputStreaming,
                approval: None,
                preliminary: None,
                provider_metadata: None,
            });
            true
        }
        StreamChunk::ToolInputDelta {
            tool_call_id,
            input_delta,
        } => {
            if let Some(Part::Tool { input, .. }) = find_tool_mut(parts, tool_call_id) {
                let mut accumulated = match input.take() {
                    Some(serde_json::Value::String(s)) => s,
                    _ => String::new(),
                };
                accumulated.push_str(input_delta);
                *input = Some(serde_json::Value::String(accumulated));
            }
            true
        }
        StreamChunk::ToolInputAvailable {
            tool_call_id,
            tool_name,
            input,
        } => {
            match find_tool_mut(parts, tool_call_id) {
                Some(Part::Tool {
                    input: slot,
                    state,
                    ..
                }) => {
                    *slot = Some(input.clone());
                    *state = ToolState::InputAvailable;
                }
                _ => parts.push(Part::Tool {
                    tool_name: tool_name.clone(),
                    tool_call_id: tool_call_id.clone(),
                    input: Some(input.clone()),
                    output: None,
                    error_text: None,
                    state: ToolState::InputAvailable,
                    approval: None,
                    preliminary: None,
                    provider_metadata: None,
                }),
            }
            true
        }
        StreamChunk::ToolInputError {
            tool_call_id,
            tool_name,
            input,
            error_text,
        } => {
            match find_tool_mut(parts, tool_call_id) {
                Some(Part::Tool {
                    input: slot,
                    state,
                    error_text: err_slot,
                    ..
                }) => {
                    if input.is_some() {
                        *slot = input.clone();
                    }
                    *state = ToolState::OutputError;
                    *err_slot = Some(error_text.clone());
                }
                _ => parts.push(Part::Tool {
                    tool_name: tool_name.clone(),
                    tool_call_id: tool_call_id.clone(),
                    input: input.clone(),
                    output: None,
                    error_text: Some(error_text.clone()),
                    state: ToolState::OutputError,
                    approval: None,
                    preliminary: None,
                    provider_metadata: None,
                }),
            }
            true
        }
        StreamChunk::ToolApprovalRequest {
            tool_call_id,
            approval_id,
        } => {
            if let Some(Part::Tool { state, approval, .. }) = find_tool_mut(parts, tool_call_id) {
                *state = ToolState::ApprovalRequested;
                *approval = Some(Approval {
                    id: Some(approval_id.clone()),
                    approved: None,
                });
            }
            true
        }
        StreamChunk::ToolOutputDenied { tool_call_id } => {
            if let Some(Part::Tool { state, .. }) = find_tool_mut(parts, tool_call_id) {
                *state = ToolState::OutputDenied;
            }
            true
        }
        StreamChunk::ToolOutputAvailable {
            tool_call_id,
            output,
            preliminary,
        } => {
            if let Some(Part::Tool {
                state,
                output: slot,
                preliminary: prelim_slot,
                ..
            }) = find_tool_mut(parts, tool_call_id)
            {
                *state = ToolState::OutputAvailable;
                *slot = Some(output.clone());
                *prelim_slot = *preliminary;
            }
            true
        }
        StreamChunk::ToolOutputError {
            tool_call_id,
            error_text,
        } => {
            if let Some(Part::Tool {
                state,
                error_text: slot,
                ..
            }) = find_tool_mut(parts, tool_call_id)
            {
                *state = ToolState::OutputError;
                *slot = Some(error_text.clone());
            }
            true
        }
        StreamChunk::StepStart => {
            parts.push(Part::StepStart);
            true
        }
        StreamChunk::Data {
            kind,
            id,
            data,
            transient,
        } => {
            if *transient {
                return true;
            }
            if let Some(target_id) = id {
                if let Some(existing) = find_data_mut(parts, kind, target_id) {
                    if let Part::Data { data: slot, .. } = existing {
                        *slot = data.clone();
                    }
                    return true;
                }
            }
            parts.push(Part::Data {
                kind: kind.clone(),
                id: id.clone(),
                data: data.clone(),
                transient: *transient,
            });
            true
        }
        StreamChunk::Start { .. }
        | StreamChunk::Finish
        | StreamChunk::MessageMetadata { .. }
        | StreamChunk::Unrecognized { .. } => false,
    }
}

fn find_text_mut(parts: &mut [Part]) -> Option<&mut Part> {
    parts
        .iter_mut()
        .rev()
        .find(|p| matches!(p, Part::Text { .. }))
}

fn find_reasoning_mut(parts: &mut [Part]) -> Option<&mut Part> {
    parts
        .iter_mut()
        .rev()
        .find(|p| matches!(p, Part::Reasoning { .. }))
}

fn find_tool_mut<'a>(parts: &'a mut [Part], tool_call_id: &str) -> Option<&'a mut Part> {
    parts
        .iter_mut()
        .rev()
        .find(|p| p.tool_call_id() == Some(tool_call_id))
}

fn find_data_mut<'a>(parts: &'a mut [Part], kind: &str, id: &str) -> Option<&'a mut Part> {
    parts
        .iter_mut()
        .rev()
        .find(|p| p.data_key() == Some((kind, id)))
}
