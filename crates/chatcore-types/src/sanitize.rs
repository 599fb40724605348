//! Pre-persistence sanitization (spec §4.4.7).
//!
//! Ephemeral, ecosystem-specific identifiers live inside `providerMetadata`
//! namespaces (e.g. `{"openai": {"itemId": "..."}, "anthropic": {...}}`).
//! Sanitization strips the named ephemeral keys from every namespace, drops
//! namespaces that become empty, and drops the whole `providerMetadata`
//! object if nothing survives. Reasoning parts with empty text are dropped
//! unless they carry an opaque redacted-content payload worth keeping.

use serde_json::Value;

use crate::message::Message;
use crate::part::Part;

/// Key names treated as ephemeral identifiers within a provider-metadata
/// namespace. Adjust per deployment if a model provider introduces a new
/// ephemeral field; this list is intentionally small and explicit rather
/// than a heuristic.
pub const DEFAULT_EPHEMERAL_KEYS: &[&str] = &["itemId", "responseId", "requestId"];

/// Provider-metadata field known to carry an opaque, otherwise-unreadable
/// payload (e.g. an encrypted reasoning blob) that must survive even when
/// the visible `text` is empty.
const REDACTED_CONTENT_KEY: &str = "redactedContent";

/// Sanitize one message in place, ready for persistence.
pub fn sanitize_message(message: &mut Message) {
    sanitize_message_with_keys(message, DEFAULT_EPHEMERAL_KEYS);
}

pub fn sanitize_message_with_keys(message: &mut Message, ephemeral_keys: &[&str]) {
    for part in &mut message.parts {
        if let Some(slot) = part.provider_metadata_mut() {
            sanitize_provider_metadata(slot, ephemeral_keys);
        }
    }

    message.parts.retain(|part| match part {
        Part::Reasoning {
            text,
            provider_metadata,
            ..
        } => !text.is_empty() || has_redacted_content(provider_metadata),
        _ => true,
    });
}

fn has_redacted_content(metadata: &Option<Value>) -> bool {
    let Some(Value::Object(namespaces)) = metadata else {
        return false;
    };
    namespaces
        .values()
        .filter_map(Value::as_object)
        .any(|ns| ns.contains_key(REDACTED_CONTENT_KEY))
}

fn sanitize_provider_metadata(slot: &mut Option<Value>, ephemeral_keys: &[&str]) {
    let Some(Value::Object(namespaces)) = slot else {
        return;
    };

    namespaces.retain(|_namespace, value| {
        let Value::Object(fields) = value else {
            return true;
        };
        for key in ephemeral_keys {
            fields.remove(*key);
        }
        !fields.is_empty()
    });

    if namespaces.is_empty() {
        *slot = None;
    }
}
