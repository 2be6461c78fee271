//! Prompt assembly: system preamble, stored history, then the new user turn.

use chrono::{NaiveDate, Utc};
use replyd_config::AppConfig;
use replyd_core::message::{Message, Turn};

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    bot_name: String,
    template: String,
}

impl PromptBuilder {
    /// `template` may use `{bot_name}`, `{user}` and `{date}`.
    pub fn new(bot_name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            template: template.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.bot_name, &config.system_prompt)
    }

    pub fn preamble(&self, conversation_id: &str, date: NaiveDate) -> String {
        self.template
            .replace("{bot_name}", &self.bot_name)
            .replace("{user}", display_name(conversation_id))
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
    }

    /// The full message list for one upstream call, oldest history first.
    pub fn build(&self, conversation_id: &str, history: &[Turn], text: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(
            self.preamble(conversation_id, Utc::now().date_naive()),
        ));
        messages.extend(history.iter().map(Turn::to_message));
        messages.push(Message::user(text));
        messages
    }
}

/// The part of a chat address before `@`, e.g. the phone number in
/// `254700000000@s.whatsapp.net`.
pub fn display_name(conversation_id: &str) -> &str {
    conversation_id
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(conversation_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replyd_core::message::Role;

    #[test]
    fn preamble_fills_placeholders() {
        let builder = PromptBuilder::new("Silva", "You are {bot_name}. Today is {date}. User: {user}.");
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(
            builder.preamble("254700000000@s.whatsapp.net", date),
            "You are Silva. Today is 2026-03-14. User: 254700000000."
        );
    }

    #[test]
    fn display_name_without_at_is_whole_id() {
        assert_eq!(display_name("operator"), "operator");
        assert_eq!(display_name("@weird"), "@weird");
    }

    #[test]
    fn build_orders_system_history_user() {
        let builder = PromptBuilder::from_config(&AppConfig::default());
        let history = vec![
            Turn::new(Role::User, "first question"),
            Turn::new(Role::Assistant, "first answer"),
        ];

        let messages = builder.build("alice@s.whatsapp.net", &history, "second question");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Replyd"));
        assert!(messages[0].content.contains("alice"));
        assert_eq!(messages[1], Message::user("first question"));
        assert_eq!(messages[2], Message::assistant("first answer"));
        assert_eq!(messages[3], Message::user("second question"));
    }
}
