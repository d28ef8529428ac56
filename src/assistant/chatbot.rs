//! Chat replies: a canned-response rule table, optionally proxied to an
//! external chat-completion API when one is configured.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Assistant;

/// One turn of conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Where a reply came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReplySource {
    RuleBased,
    Api,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub timestamp: String,
    pub confidence: f64,
    pub source: ReplySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Keyword rules checked in order; first hit wins.
const RULES: &[(&[&str], &str)] = &[
    (
        &["hello", "hi ", "hey", "good morning", "good afternoon"],
        "Hello! I can help with attendance, classes, assignments, and notifications. What do you need?",
    ),
    (
        &["attendance", "check in", "check-in", "absent", "present", "qr"],
        "Attendance can be marked by scanning the class QR code while it is valid, or through face check-in if you are registered. Instructors can open a QR session from the class page.",
    ),
    (
        &["enroll", "class", "course", "schedule", "room"],
        "Class details, schedules, and rooms are on each class page. Instructors manage enrollment; if you are missing from a roster, contact your instructor.",
    ),
    (
        &["assignment", "homework", "due", "deadline", "exam"],
        "Assignment deadlines are announced through notifications. Check your pending notifications, and enable reminders in your preferences so you do not miss one.",
    ),
    (
        &["notification", "notify", "alert", "remind"],
        "Notifications are delivered by email, push, and webhook depending on your preferences. You can set preferred delivery times and a priority threshold.",
    ),
    (
        &["meeting", "conference"],
        "Meeting reminders are sent 15 minutes before the scheduled start to all listed attendees.",
    ),
    (
        &["thank", "thanks"],
        "You're welcome! Anything else I can help with?",
    ),
    (
        &["help", "what can you do"],
        "I can answer questions about attendance (QR and face check-in), classes and enrollment, assignments, and how notifications are delivered.",
    ),
];

const FALLBACK_REPLY: &str =
    "I'm not sure about that one. Try asking about attendance, classes, assignments, or notifications.";

impl Assistant {
    /// Answer a chat message, preferring the remote API when configured.
    pub async fn chat(&self, message: &str, history: &[ChatMessage]) -> ChatReply {
        if let (Some(api_url), Some(api_key)) = (&self.config.api_url, &self.config.api_key) {
            match self.remote_chat(api_url, api_key, message, history).await {
                Ok(reply) => return reply,
                Err(e) => {
                    tracing::warn!(error = %e, "Chat API call failed, falling back to rules");
                }
            }
        }

        let (response, confidence) = rule_based_reply(message);
        ChatReply {
            response: response.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            confidence,
            source: ReplySource::RuleBased,
            model: None,
        }
    }

    async fn remote_chat(
        &self,
        api_url: &str,
        api_key: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> anyhow::Result<ChatReply> {
        let mut messages: Vec<serde_json::Value> = history
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        messages.push(json!({"role": "user", "content": message}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
        });

        let response = self
            .http
            .post(api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: serde_json::Value = response.json().await?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("completion response missing content"))?
            .to_string();

        Ok(ChatReply {
            response: content,
            timestamp: Utc::now().to_rfc3339(),
            confidence: 0.95,
            source: ReplySource::Api,
            model: Some(self.config.model.clone()),
        })
    }
}

fn rule_based_reply(message: &str) -> (&'static str, f64) {
    let text = format!(" {} ", message.to_lowercase());

    for (keywords, reply) in RULES {
        if keywords.iter().any(|k| text.contains(k)) {
            return (reply, 0.9);
        }
    }

    (FALLBACK_REPLY, 0.3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantConfig;

    #[test]
    fn test_rule_based_reply_matches_topics() {
        let (reply, confidence) = rule_based_reply("how do I mark attendance?");
        assert!(reply.contains("QR"));
        assert_eq!(confidence, 0.9);

        let (reply, _) = rule_based_reply("when is my homework due");
        assert!(reply.contains("deadline") || reply.contains("notification"));
    }

    #[test]
    fn test_rule_based_reply_falls_back() {
        let (reply, confidence) = rule_based_reply("what is the meaning of life");
        assert_eq!(reply, FALLBACK_REPLY);
        assert_eq!(confidence, 0.3);
    }

    #[tokio::test]
    async fn test_chat_uses_rules_without_api_config() {
        let assistant = Assistant::new(AssistantConfig::default());
        let reply = assistant.chat("hello there", &[]).await;
        assert_eq!(reply.source, ReplySource::RuleBased);
        assert!(reply.model.is_none());
        assert!(!reply.response.is_empty());
    }
}
