//! Reconciliation of a client-submitted message batch with stored history
//! (spec §4.4.5). Used both by `chat-messages` and by the `messages` array
//! carried on every `chat-request`, unifying what would otherwise be two
//! historically divergent call sites (§9 Open Question) into one algorithm.
//!
//! The algorithm walks both lists with one cursor each. At every step it
//! prefers the stored message whenever one plausibly corresponds to the
//! incoming one, keeping the stored id and (for tool parts) the stored
//! lifecycle state if it is further along than the client's view. Messages
//! the client could not have seen yet (new stored assistant output, e.g. from
//! a continuation) are carried forward verbatim once the incoming list is
//! exhausted.

use chatcore_types::{Message, Part, Role, ToolState};

/// Reconcile `incoming` (client-asserted) against `stored` (server's
/// canonical history), returning the new canonical history.
pub fn reconcile(stored: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut result = Vec::with_capacity(stored.len().max(incoming.len()));
    let mut stored_cursor = 0usize;

    for inc in incoming {
        if let Some(tool_call_id) = first_tool_call_id(inc) {
            if let Some(found) = find_stored_by_tool_call_id(stored, stored_cursor, tool_call_id) {
                result.push(merge_tool_message(&stored[found], inc));
                stored_cursor = found + 1;
                continue;
            }
        }

        if let Some(found) = find_matching_stored(stored, stored_cursor, inc) {
            result.push(stored[found].clone());
            stored_cursor = found + 1;
            continue;
        }

        // The client introduced a message the server hasn't stored (a brand
        // new user message on this request, typically).
        result.push(inc.clone());
    }

    // Anything left in stored is server-side history the client's batch
    // never mentioned (e.g. it was generated by a continuation after the
    // client's last snapshot) - append verbatim.
    result.extend(stored[stored_cursor..].iter().cloned());
    result
}

fn first_tool_call_id(message: &Message) -> Option<&str> {
    message.parts.iter().find_map(|p| p.tool_call_id())
}

/// Tool parts are merge keys across message-id boundaries (spec §4.4.5): a
/// stored message carrying a part with this `toolCallId` is the same logical
/// message as an incoming one carrying it, regardless of either message's id.
fn find_stored_by_tool_call_id(stored: &[Message], from: usize, tool_call_id: &str) -> Option<usize> {
    stored[from..]
        .iter()
        .position(|m| m.find_tool_part(tool_call_id).is_some())
        .map(|i| i + from)
}

/// Locate the stored message matching `inc` by role and content, skipping
/// over stored assistant messages that carry tool parts (the skip rule: a
/// later text-only continuation must still reconcile against the assistant
/// message that follows the tool turn, spec §4.4.5 last bullet).
fn find_matching_stored(stored: &[Message], from: usize, inc: &Message) -> Option<usize> {
    let mut idx = from;
    while idx < stored.len() {
        let candidate = &stored[idx];
        if candidate.role == inc.role && same_text_content(candidate, inc) {
            return Some(idx);
        }
        if candidate.role == Role::Assistant && has_tool_parts(candidate) {
            idx += 1;
            continue;
        }
        return None;
    }
    None
}

fn has_tool_parts(message: &Message) -> bool {
    message.parts.iter().any(|p| p.tool_call_id().is_some())
}

/// Plain-text equality used to decide whether two user messages, or two
/// identical assistant text messages, are "the same" message under two
/// different client/server-generated ids.
fn same_text_content(a: &Message, b: &Message) -> bool {
    extract_text(a) == extract_text(b)
}

fn extract_text(message: &Message) -> String {
    message
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Merge one tool-bearing assistant message: walk part-for-part by
/// `toolCallId`, keeping whichever side's tool state is further along the
/// lifecycle lattice. Non-tool parts and parts only present on one side are
/// taken from the stored message, since the server's view is canonical for
/// anything it has already applied chunks to.
fn merge_tool_message(stored: &Message, incoming: &Message) -> Message {
    let mut merged = stored.clone();

    for part in &mut merged.parts {
        let Some(tool_call_id) = part.tool_call_id().map(str::to_string) else {
            continue;
        };
        let Some(incoming_part) = incoming.find_tool_part(&tool_call_id) else {
            continue;
        };

        let stored_rank = part.tool_state().map(ToolState::lifecycle_rank);
        let incoming_rank = incoming_part.tool_state().map(ToolState::lifecycle_rank);

        // The client's stale view must never overwrite the server's more
        // advanced tool state (spec §4.4.5: "always prefer the stored
        // version's tool state when the stored state is further along").
        if let (Some(stored_rank), Some(incoming_rank)) = (stored_rank, incoming_rank) {
            if incoming_rank > stored_rank {
                *part = incoming_part.clone();
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcore_types::{Approval, MessageId, TextState};

    fn user(text: &str) -> Message {
        let mut m = Message::new(MessageId::new(), Role::User);
        m.parts.push(Part::Text {
            text: text.to_string(),
            state: TextState::Done,
        });
        m
    }

    fn assistant_tool(tool_call_id: &str, state: ToolState, approval: Option<Approval>) -> Message {
        let mut m = Message::new(MessageId::new(), Role::Assistant);
        m.parts.push(Part::Tool {
            tool_name: "search".into(),
            tool_call_id: tool_call_id.to_string(),
            input: Some(serde_json::json!({})),
            output: None,
            error_text: None,
            state,
            approval,
            preliminary: None,
            provider_metadata: None,
        });
        m
    }

    #[test]
    fn keeps_stored_id_for_matching_user_message() {
        let stored = vec![user("hi")];
        let incoming = vec![Message {
            id: chatcore_types::MessageId::new(),
            ..user("hi")
        }];

        let merged = reconcile(&stored, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, stored[0].id);
    }

    #[test]
    fn never_downgrades_stored_tool_state_to_a_stale_client_view() {
        let stored = vec![assistant_tool("c1", ToolState::OutputAvailable, None)];
        let incoming = vec![assistant_tool("c1", ToolState::InputAvailable, None)];

        let merged = reconcile(&stored, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].find_tool_part("c1").unwrap().tool_state(), Some(ToolState::OutputAvailable));
    }

    #[test]
    fn adopts_more_advanced_incoming_tool_state() {
        let stored = vec![assistant_tool("c1", ToolState::InputAvailable, None)];
        let incoming = vec![assistant_tool(
            "c1",
            ToolState::ApprovalResponded,
            Some(Approval {
                id: Some("a1".into()),
                approved: Some(true),
            }),
        )];

        let merged = reconcile(&stored, &incoming);
        assert_eq!(
            merged[0].find_tool_part("c1").unwrap().tool_state(),
            Some(ToolState::ApprovalResponded)
        );
    }

    #[test]
    fn tool_messages_merge_across_different_ids() {
        let mut stored_msg = assistant_tool("c1", ToolState::InputAvailable, None);
        let stored_id = stored_msg.id;
        stored_msg.id = stored_id;
        let stored = vec![stored_msg];

        let mut incoming_msg = assistant_tool("c1", ToolState::InputAvailable, None);
        incoming_msg.id = MessageId::new(); // client-generated, different id
        let incoming = vec![incoming_msg];

        let merged = reconcile(&stored, &incoming);
        assert_eq!(merged[0].id, stored_id);
    }

    #[test]
    fn appends_server_only_messages_the_client_never_sent() {
        let stored = vec![user("hi"), assistant_tool("c1", ToolState::OutputAvailable, None)];
        let incoming = vec![user("hi")];

        let merged = reconcile(&stored, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].id, stored[1].id);
    }

    #[test]
    fn skips_stored_tool_message_to_match_later_text_continuation() {
        let mut text_msg = Message::new(MessageId::new(), Role::Assistant);
        text_msg.parts.push(Part::Text {
            text: "done".into(),
            state: TextState::Done,
        });

        let stored = vec![
            assistant_tool("c1", ToolState::OutputAvailable, None),
            text_msg.clone(),
        ];
        let incoming = vec![text_msg];

        let merged = reconcile(&stored, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, stored[0].id);
        assert_eq!(merged[1].id, stored[1].id);
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let stored = vec![user("hi"), assistant_tool("c1", ToolState::OutputAvailable, None)];
        let once = reconcile(&stored, &stored);
        let twice = reconcile(&once, &once);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.id, b.id);
        }
    }
}
