//! Conversions from stored rows to outbound payloads.

use std::time::Duration;

use parlor_shared::constants::{IMAGE_SNIPPET, VIDEO_SNIPPET};
use parlor_shared::protocol::MessageView;
use parlor_shared::types::MessageKind;
use parlor_store::Message;

use crate::collaborators::{Translator, UserProfile};
use crate::config::EngineConfig;

pub(crate) fn message_view(
    message: &Message,
    sender: Option<&UserProfile>,
    config: &EngineConfig,
    target_content: Option<String>,
) -> MessageView {
    let origin_content = if message.kind.is_media() {
        config.media_url(&message.content)
    } else {
        message.content.clone()
    };

    MessageView {
        id: message.id,
        room_id: message.room_id,
        sender_id: message.sender_id,
        origin_content,
        target_content,
        sent_at: message.sent_at,
        sender_first_name: sender.map(|p| p.first_name.clone()),
        sender_last_name: sender.map(|p| p.last_name.clone()),
        sender_image_url: sender.and_then(|p| p.image_url.clone()),
        message_type: message.kind,
    }
}

/// Short preview used in notifications and room summaries.
pub(crate) fn snippet(message: &Message) -> String {
    match message.kind {
        MessageKind::Text => message.content.clone(),
        MessageKind::Image => IMAGE_SNIPPET.to_string(),
        MessageKind::Video => VIDEO_SNIPPET.to_string(),
    }
}

/// Translate with a deadline. Any failure, including a length mismatch,
/// yields `None` so callers fall back to the original text.
pub(crate) async fn translate_within(
    translator: &dyn Translator,
    texts: &[String],
    target_lang: &str,
    timeout: Duration,
) -> Option<Vec<String>> {
    if texts.is_empty() {
        return Some(Vec::new());
    }

    match tokio::time::timeout(timeout, translator.translate(texts, target_lang)).await {
        Ok(Ok(out)) if out.len() == texts.len() => Some(out),
        Ok(Ok(out)) => {
            tracing::warn!(
                expected = texts.len(),
                got = out.len(),
                lang = target_lang,
                "translator returned wrong number of texts"
            );
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(lang = target_lang, error = %e, "translation failed");
            None
        }
        Err(_) => {
            tracing::warn!(lang = target_lang, ?timeout, "translation timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parlor_shared::types::{MessageId, RoomId, UserId};

    struct Slow;

    #[async_trait]
    impl Translator for Slow {
        async fn translate(&self, texts: &[String], _lang: &str) -> anyhow::Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.to_vec())
        }
    }

    struct Short;

    #[async_trait]
    impl Translator for Short {
        async fn translate(&self, _texts: &[String], _lang: &str) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn message(kind: MessageKind, content: &str) -> Message {
        Message {
            id: MessageId(1),
            room_id: RoomId(2),
            sender_id: UserId(3),
            content: content.into(),
            kind,
            sent_at: parlor_store::now(),
        }
    }

    #[test]
    fn media_views_carry_full_url() {
        let config = EngineConfig {
            media_base_url: "https://cdn.test".into(),
            ..Default::default()
        };
        let view = message_view(&message(MessageKind::Video, "chats/2/v.mp4"), None, &config, None);
        assert_eq!(view.origin_content, "https://cdn.test/chats/2/v.mp4");
        assert_eq!(snippet(&message(MessageKind::Video, "k")), VIDEO_SNIPPET);
        assert_eq!(snippet(&message(MessageKind::Text, "yo")), "yo");
    }

    #[tokio::test]
    async fn slow_or_broken_translators_fall_back() {
        let texts = vec!["hello".to_string()];
        assert!(translate_within(&Slow, &texts, "de", Duration::from_millis(20))
            .await
            .is_none());
        assert!(translate_within(&Short, &texts, "de", Duration::from_millis(20))
            .await
            .is_none());
    }
}
