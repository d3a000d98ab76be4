//! Conversation-role normalization for strict backends.
//!
//! Some models reject histories where two user (or two assistant) messages
//! are adjacent. Before every LLM call the history is normalized: the first
//! system message stays at position 0 (later ones are dropped), consecutive
//! same-role user/assistant messages merge with a blank-line separator, and
//! tool messages pass through without affecting alternation.

use helm_domain::{ChatMessage, Role};

pub fn normalize_conversation(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut system: Option<ChatMessage> = None;
    let mut normalized: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    let mut last_kept_role: Option<Role> = None;

    for message in messages {
        match message.role {
            Role::System => {
                if system.is_none() {
                    system = Some(message.clone());
                }
            }
            Role::Tool => normalized.push(message.clone()),
            Role::User | Role::Assistant => {
                if last_kept_role == Some(message.role) {
                    // Merge into the last kept message of this role.
                    if let Some(previous) = normalized
                        .iter_mut()
                        .rev()
                        .find(|m| m.role == message.role)
                    {
                        previous.merge_content(&message.content);
                        // A merged assistant turn keeps the union of its
                        // tool calls.
                        if let Some(calls) = &message.tool_calls {
                            previous
                                .tool_calls
                                .get_or_insert_with(Vec::new)
                                .extend(calls.iter().cloned());
                        }
                        continue;
                    }
                }
                normalized.push(message.clone());
                last_kept_role = Some(message.role);
            }
        }
    }

    match system {
        Some(system) => {
            let mut result = Vec::with_capacity(normalized.len() + 1);
            result.push(system);
            result.extend(normalized);
            result
        }
        None => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(messages: &[ChatMessage]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    /// No two adjacent user/assistant messages of the same role.
    fn assert_alternating(messages: &[ChatMessage]) {
        let convo: Vec<Role> = messages
            .iter()
            .map(|m| m.role)
            .filter(|r| matches!(r, Role::User | Role::Assistant))
            .collect();
        for pair in convo.windows(2) {
            assert_ne!(pair[0], pair[1], "adjacent same-role messages: {convo:?}");
        }
    }

    #[test]
    fn consecutive_user_messages_merge_with_blank_line() {
        let input = vec![
            ChatMessage::user("first"),
            ChatMessage::user("second"),
            ChatMessage::assistant("ok"),
        ];
        let output = normalize_conversation(&input);
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].content, "first\n\nsecond");
        assert_alternating(&output);
    }

    #[test]
    fn system_message_is_pinned_first_and_deduplicated() {
        let input = vec![
            ChatMessage::user("question"),
            ChatMessage::system("you are helpful"),
            ChatMessage::system("second system ignored"),
            ChatMessage::assistant("answer"),
        ];
        let output = normalize_conversation(&input);
        assert_eq!(output[0].role, Role::System);
        assert_eq!(output[0].content, "you are helpful");
        assert_eq!(
            roles(&output),
            vec![Role::System, Role::User, Role::Assistant]
        );
    }

    #[test]
    fn tool_messages_do_not_break_alternation() {
        let input = vec![
            ChatMessage::user("list files"),
            ChatMessage::assistant("calling tool"),
            ChatMessage::tool_result("call-1", "{\"entries\": []}"),
            ChatMessage::user("now summarize"),
        ];
        let output = normalize_conversation(&input);
        assert_eq!(output.len(), 4);
        assert_alternating(&output);
    }

    #[test]
    fn same_role_run_across_tool_messages_still_merges() {
        // user, tool, user: the two user messages are consecutive in
        // alternation terms and must merge.
        let input = vec![
            ChatMessage::user("first"),
            ChatMessage::tool_result("call-1", "out"),
            ChatMessage::user("second"),
        ];
        let output = normalize_conversation(&input);
        let users: Vec<&ChatMessage> =
            output.iter().filter(|m| m.role == Role::User).collect();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].content, "first\n\nsecond");
        assert_alternating(&output);
    }

    #[test]
    fn merged_assistant_turns_keep_tool_calls() {
        use helm_domain::ToolCall;
        let call = ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "/tmp"}),
        };
        let input = vec![
            ChatMessage::user("go"),
            ChatMessage::assistant("thinking"),
            ChatMessage::assistant_with_tool_calls("", vec![call]),
        ];
        let output = normalize_conversation(&input);
        let assistant = output.iter().find(|m| m.role == Role::Assistant).unwrap();
        assert_eq!(assistant.tool_calls.as_ref().unwrap().len(), 1);
        assert_alternating(&output);
    }

    #[test]
    fn already_normalized_input_is_unchanged() {
        let input = vec![
            ChatMessage::system("s"),
            ChatMessage::user("u"),
            ChatMessage::assistant("a"),
            ChatMessage::user("u2"),
        ];
        let output = normalize_conversation(&input);
        assert_eq!(roles(&output), roles(&input));
        assert_eq!(output[3].content, "u2");
    }

    #[test]
    fn arbitrary_mixed_history_normalizes_fully() {
        let input = vec![
            ChatMessage::user("a"),
            ChatMessage::user("b"),
            ChatMessage::assistant("c"),
            ChatMessage::assistant("d"),
            ChatMessage::tool_result("t", "r"),
            ChatMessage::assistant("e"),
            ChatMessage::user("f"),
        ];
        let output = normalize_conversation(&input);
        assert_alternating(&output);
        let assistant_contents: Vec<&str> = output
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(assistant_contents, vec!["c\n\nd\n\ne"]);
    }
}
