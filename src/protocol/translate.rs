use crate::config::BackendConfig;
use crate::error::BridgeError;

use super::backend::{BackendRequest, ConversationTurn};
use super::openai_chat::{ChatMessage, Role};

/// How misaligned history pairs are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryMode {
    /// Drop pairs that are not `user` followed by `assistant`.
    #[default]
    Lenient,
    /// Reject the request when a pair would be dropped.
    Strict,
}

impl HistoryMode {
    #[must_use]
    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            HistoryMode::Strict
        } else {
            HistoryMode::Lenient
        }
    }
}

/// Convert an `OpenAI` message list into the backend's prompt/history shape.
///
/// - A leading `system` message becomes the first turn with an empty answer.
/// - The last remaining message is the prompt and never enters history.
/// - The rest is walked in consecutive pairs; only `user` -> `assistant`
///   pairs are kept, in order.
///
/// # Errors
///
/// Returns [`BridgeError::RequestShape`] when no prompt can be derived, or in
/// [`HistoryMode::Strict`] when a pair is misaligned.
pub fn translate_messages(
    messages: &[ChatMessage],
    backend: &BackendConfig,
    mode: HistoryMode,
) -> Result<BackendRequest, BridgeError> {
    let mut history = Vec::with_capacity(messages.len() / 2 + 1);

    let rest = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => {
            history.push(ConversationTurn {
                query: first.content.clone(),
                answer: String::new(),
            });
            rest
        }
        _ => messages,
    };

    let Some((prompt, earlier)) = rest.split_last() else {
        return Err(BridgeError::RequestShape(
            "messages must contain at least one non-system message".to_string(),
        ));
    };

    // `chunks_exact` leaves an odd trailing message out, which is exactly the
    // pair that would otherwise overlap the prompt.
    for (pair_index, pair) in earlier.chunks_exact(2).enumerate() {
        let (query, answer) = (&pair[0], &pair[1]);
        if query.role == Role::User && answer.role == Role::Assistant {
            history.push(ConversationTurn {
                query: query.content.clone(),
                answer: answer.content.clone(),
            });
            continue;
        }
        if mode == HistoryMode::Strict {
            return Err(BridgeError::RequestShape(format!(
                "history pair {pair_index} is {}->{}, expected user->assistant",
                query.role.as_str(),
                answer.role.as_str()
            )));
        }
        tracing::debug!(
            pair_index,
            first_role = query.role.as_str(),
            second_role = answer.role.as_str(),
            "dropping misaligned history pair"
        );
    }
    if mode == HistoryMode::Strict && earlier.len() % 2 == 1 {
        return Err(BridgeError::RequestShape(
            "history has an unpaired message before the prompt".to_string(),
        ));
    }

    Ok(BackendRequest {
        user_id: backend.user_id.clone(),
        user_role: backend.user_role,
        ide: backend.ide.clone(),
        ide_version: backend.ide_version.clone(),
        plugin_version: backend.plugin_version.clone(),
        talk_id: backend.talk_id.clone(),
        locale: backend.locale.clone(),
        model: backend.model.clone(),
        agent: None,
        prompt: prompt.content.clone(),
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> BackendConfig {
        let mut config = BackendConfig::new("https://geek.example.com/chat", "tok", "geek-7b");
        config.user_id = "u-1".to_string();
        config.talk_id = "t-1".to_string();
        config
    }

    fn msg(role: Role, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    fn turn(query: &str, answer: &str) -> ConversationTurn {
        ConversationTurn {
            query: query.to_string(),
            answer: answer.to_string(),
        }
    }

    #[test]
    fn test_system_user_assistant_user() {
        let messages = [
            msg(Role::System, "Sys"),
            msg(Role::User, "Hi"),
            msg(Role::Assistant, "Hello"),
            msg(Role::User, "Bye"),
        ];
        let request = translate_messages(&messages, &backend(), HistoryMode::Lenient).unwrap();
        assert_eq!(request.history, vec![turn("Sys", ""), turn("Hi", "Hello")]);
        assert_eq!(request.prompt, "Bye");
    }

    #[test]
    fn test_identity_fields_come_from_config() {
        let request =
            translate_messages(&[msg(Role::User, "ping")], &backend(), HistoryMode::Lenient)
                .unwrap();
        assert_eq!(request.user_id, "u-1");
        assert_eq!(request.talk_id, "t-1");
        assert_eq!(request.model, "geek-7b");
        assert_eq!(request.locale, "zh");
        assert_eq!(request.ide, "VSCode");
        assert!(request.agent.is_none());
        assert!(request.history.is_empty());
        assert_eq!(request.prompt, "ping");
    }

    #[test]
    fn test_empty_and_system_only_are_rejected() {
        let err = translate_messages(&[], &backend(), HistoryMode::Lenient).unwrap_err();
        assert!(matches!(err, BridgeError::RequestShape(_)));

        let err = translate_messages(&[msg(Role::System, "Sys")], &backend(), HistoryMode::Lenient)
            .unwrap_err();
        assert!(matches!(err, BridgeError::RequestShape(_)));
    }

    #[test]
    fn test_prompt_is_last_message_and_not_in_history() {
        let messages = [
            msg(Role::User, "a"),
            msg(Role::Assistant, "b"),
            msg(Role::User, "c"),
            msg(Role::Assistant, "d"),
        ];
        let request = translate_messages(&messages, &backend(), HistoryMode::Lenient).unwrap();
        assert_eq!(request.prompt, "d");
        assert_eq!(request.history, vec![turn("a", "b")]);
        assert!(request
            .history
            .iter()
            .all(|t| t.query != "d" && t.answer != "d"));
    }

    #[test]
    fn test_misaligned_pairs_are_dropped() {
        let messages = [
            msg(Role::Assistant, "greeting"),
            msg(Role::User, "q1"),
            msg(Role::Assistant, "a1"),
            msg(Role::User, "q2"),
            msg(Role::User, "prompt"),
        ];
        let request = translate_messages(&messages, &backend(), HistoryMode::Lenient).unwrap();
        // Pairs are (assistant,user) and (assistant,user): both dropped.
        assert!(request.history.is_empty());
        assert_eq!(request.prompt, "prompt");
    }

    #[test]
    fn test_non_leading_system_is_not_special() {
        let messages = [
            msg(Role::User, "q"),
            msg(Role::Assistant, "a"),
            msg(Role::System, "late"),
            msg(Role::User, "x"),
            msg(Role::User, "prompt"),
        ];
        let request = translate_messages(&messages, &backend(), HistoryMode::Lenient).unwrap();
        assert_eq!(request.history, vec![turn("q", "a")]);
    }

    #[test]
    fn test_strict_mode_rejects_dropped_pairs() {
        let messages = [
            msg(Role::User, "q1"),
            msg(Role::User, "q2"),
            msg(Role::User, "prompt"),
        ];
        let err = translate_messages(&messages, &backend(), HistoryMode::Strict).unwrap_err();
        assert!(matches!(err, BridgeError::RequestShape(_)));

        let odd = [
            msg(Role::User, "q1"),
            msg(Role::Assistant, "a1"),
            msg(Role::User, "q2"),
            msg(Role::User, "prompt"),
        ];
        let err = translate_messages(&odd, &backend(), HistoryMode::Strict).unwrap_err();
        assert!(matches!(err, BridgeError::RequestShape(_)));

        let aligned = [
            msg(Role::System, "Sys"),
            msg(Role::User, "q1"),
            msg(Role::Assistant, "a1"),
            msg(Role::User, "prompt"),
        ];
        assert!(translate_messages(&aligned, &backend(), HistoryMode::Strict).is_ok());
    }
}
