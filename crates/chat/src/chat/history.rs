//! Prompt assembly for the on-device model.
//!
//! The model expects role-delimited turns:
//!
//! ```text
//! <persona preamble>
//! <start_of_turn>user
//! ...<end_of_turn>
//! <start_of_turn>model
//! ...<end_of_turn>
//! <start_of_turn>user
//! <new turn><end_of_turn>
//! <start_of_turn>model
//! ```
//!
//! History is replayed newest first under a character budget, so the most
//! recent exchanges always survive truncation.

use chrono::{DateTime, Local};

use crate::chat::message::{Message, Sender};
use crate::settings::{
    AssistantSettings, HistorySettings, PersonaPreset, PersonaSettings, ProfileSettings,
};

pub const USER_TURN_OPEN: &str = "<start_of_turn>user\n";
pub const MODEL_TURN_OPEN: &str = "<start_of_turn>model\n";
pub const TURN_CLOSE: &str = "<end_of_turn>\n";

const HONESTY_INSTRUCTIONS: &str = " If you do not know an answer, say so instead of making one up. \
Do not repeat the question back when answering. Pay close attention to the conversation history.";
const CLOCK_FORMAT: &str = "%B %-d, %Y at %-I:%M %p";

/// Builds one bounded prompt from conversation history and persona settings.
///
/// Pure: the same inputs (including `now`) always produce the same prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptHistoryBuilder<'a> {
    budget: &'a HistorySettings,
    persona: &'a PersonaSettings,
    profile: &'a ProfileSettings,
}

impl<'a> PromptHistoryBuilder<'a> {
    pub fn new(
        budget: &'a HistorySettings,
        persona: &'a PersonaSettings,
        profile: &'a ProfileSettings,
    ) -> Self {
        Self {
            budget,
            persona,
            profile,
        }
    }

    pub fn from_settings(settings: &'a AssistantSettings) -> Self {
        Self::new(&settings.history, &settings.persona, &settings.profile)
    }

    pub fn build(&self, history: &[Message], new_turn: &str, now: DateTime<Local>) -> String {
        let turns = self.select_turns(history);

        let mut prompt = self.preamble(now);
        prompt.push('\n');
        for message in turns {
            push_turn(&mut prompt, message.sender, &message.text);
        }
        push_turn(&mut prompt, Sender::User, new_turn);
        prompt.push_str(MODEL_TURN_OPEN);
        prompt
    }

    /// Dialogue turns that fit the budget, in chronological order.
    ///
    /// Scanning stops at the first turn that would overflow the character
    /// budget, even when older turns are shorter.
    pub fn select_turns<'m>(&self, history: &'m [Message]) -> Vec<&'m Message> {
        let mut selected = Vec::new();
        let mut used_characters = 0;

        for message in history.iter().rev() {
            if selected.len() >= self.budget.max_turns {
                break;
            }
            let Some(length) = formatted_turn_len(message) else {
                continue;
            };
            if used_characters + length > self.budget.max_characters {
                break;
            }
            used_characters += length;
            selected.push(message);
        }

        selected.reverse();
        selected
    }

    pub fn preamble(&self, now: DateTime<Local>) -> String {
        let mut preamble = persona_text(self.persona);

        let name = self.profile.name.trim();
        if !name.is_empty() {
            preamble.push_str(&format!(" Your primary user is {name}."));
        }
        let about = self.profile.about.trim().trim_end_matches('.');
        if !about.is_empty() {
            preamble.push_str(&format!(" Here's a bit about them: {about}."));
        }

        preamble.push_str(HONESTY_INSTRUCTIONS);
        preamble.push_str(&format!(" [System Clock: {}]", now.format(CLOCK_FORMAT)));
        preamble
    }
}

/// Length in characters of `message` once wrapped in turn markers.
///
/// `None` for messages that are never replayed: notices, errors and an
/// assistant placeholder that has not produced text yet.
pub fn formatted_turn_len(message: &Message) -> Option<usize> {
    let open = turn_open(message.sender)?;
    if message.text.is_empty() {
        return None;
    }
    Some(open.chars().count() + message.text.chars().count() + TURN_CLOSE.chars().count())
}

fn turn_open(sender: Sender) -> Option<&'static str> {
    match sender {
        Sender::User => Some(USER_TURN_OPEN),
        Sender::Assistant => Some(MODEL_TURN_OPEN),
        Sender::Info | Sender::Error { .. } => None,
    }
}

fn push_turn(prompt: &mut String, sender: Sender, text: &str) {
    if let Some(open) = turn_open(sender) {
        prompt.push_str(open);
        prompt.push_str(text);
        prompt.push_str(TURN_CLOSE);
    }
}

fn persona_text(persona: &PersonaSettings) -> String {
    let name = persona.assistant_name.trim();
    match persona.preset {
        PersonaPreset::Friendly => friendly(name),
        PersonaPreset::ExecutiveCoach => "You are a calm, professional assistant with the tone of \
an executive coach. You speak clearly, avoid repetition and favour insight over small talk. \
Your answers are direct and thoughtful, and they help the user think critically."
            .to_string(),
        PersonaPreset::Enthusiastic => format!(
            "You are {name}, an incredibly helpful and enthusiastic assistant! You love exclamation \
points and encouraging words, and you keep a positive, supportive tone."
        ),
        PersonaPreset::Witty => format!(
            "You are {name}. You are helpful, with a dry, witty and slightly sarcastic sense of \
humour. A little cheekiness is fine, but stay helpful and never be rude."
        ),
        PersonaPreset::Custom => {
            let custom = persona.custom.trim();
            if custom.is_empty() {
                friendly(name)
            } else {
                custom.to_string()
            }
        }
    }
}

fn friendly(name: &str) -> String {
    format!("You are {name}, a friendly and concise assistant who talks like a person.")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn clock() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 10, 19, 15, 4, 0)
            .single()
            .expect("unambiguous local time")
    }

    fn message(sender: Sender, text: &str) -> Message {
        Message::new(sender, text)
    }

    #[test]
    fn builds_the_full_prompt_layout() {
        let settings = AssistantSettings::default();
        let history = vec![
            message(Sender::User, "Hi"),
            message(Sender::Assistant, "Hello!"),
        ];

        let prompt =
            PromptHistoryBuilder::from_settings(&settings).build(&history, "How are you?", clock());

        assert_eq!(
            prompt,
            "You are Lumen, a friendly and concise assistant who talks like a person. \
If you do not know an answer, say so instead of making one up. \
Do not repeat the question back when answering. \
Pay close attention to the conversation history. \
[System Clock: October 19, 2026 at 3:04 PM]\n\
<start_of_turn>user\nHi<end_of_turn>\n\
<start_of_turn>model\nHello!<end_of_turn>\n\
<start_of_turn>user\nHow are you?<end_of_turn>\n\
<start_of_turn>model\n"
        );
    }

    #[test]
    fn character_budget_wins_over_turn_limit() {
        let history = (0..6)
            .map(|index| message(Sender::User, &format!("turn {index}")))
            .collect::<Vec<_>>();
        let turn_length = formatted_turn_len(&history[0]).expect("dialogue turn");
        assert!(history
            .iter()
            .all(|turn| formatted_turn_len(turn) == Some(turn_length)));

        // Same ratio as 30-character turns against a 50-character budget.
        let budget = HistorySettings {
            max_turns: 20,
            max_characters: turn_length * 5 / 3,
        };
        let persona = PersonaSettings::default();
        let profile = ProfileSettings::default();
        let builder = PromptHistoryBuilder::new(&budget, &persona, &profile);

        let selected = builder.select_turns(&history);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].text, "turn 5");

        let prompt = builder.build(&history, "next", clock());
        assert!(prompt.contains("turn 5"));
        assert!(!prompt.contains("turn 4"));
    }

    #[test]
    fn fifty_character_budget_keeps_only_the_newest_turn() {
        // One-character turns are the shortest possible: 35 characters once wrapped.
        let history = ["a", "b", "c", "d"]
            .into_iter()
            .map(|text| message(Sender::User, text))
            .collect::<Vec<_>>();
        assert_eq!(formatted_turn_len(&history[0]), Some(35));

        let budget = HistorySettings {
            max_turns: 20,
            max_characters: 50,
        };
        let persona = PersonaSettings::default();
        let profile = ProfileSettings::default();
        let builder = PromptHistoryBuilder::new(&budget, &persona, &profile);

        let selected = builder.select_turns(&history);
        assert_eq!(
            selected.iter().map(|turn| turn.text.as_str()).collect::<Vec<_>>(),
            vec!["d"]
        );

        // A turn of exactly the budget still fits.
        let exact = vec![message(Sender::User, "old"), message(Sender::User, &"x".repeat(16))];
        assert_eq!(formatted_turn_len(&exact[1]), Some(50));
        let selected = builder.select_turns(&exact);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].text, "x".repeat(16));
    }

    #[test]
    fn stops_at_first_overflow_even_if_older_turns_fit() {
        let history = vec![
            message(Sender::User, "old"),
            message(Sender::User, &"x".repeat(200)),
            message(Sender::User, "new"),
        ];
        let budget = HistorySettings {
            max_turns: 20,
            max_characters: 100,
        };
        let persona = PersonaSettings::default();
        let profile = ProfileSettings::default();
        let selected = PromptHistoryBuilder::new(&budget, &persona, &profile).select_turns(&history);

        assert_eq!(
            selected.iter().map(|turn| turn.text.as_str()).collect::<Vec<_>>(),
            vec!["new"]
        );
    }

    #[test]
    fn turn_limit_applies_and_order_is_chronological() {
        let history = vec![
            message(Sender::User, "one"),
            message(Sender::Assistant, "two"),
            message(Sender::Info, "(no response produced)"),
            message(Sender::Error { critical: true }, "broken"),
            message(Sender::User, "three"),
            message(Sender::Assistant, "four"),
            Message::placeholder(),
        ];
        let budget = HistorySettings {
            max_turns: 3,
            max_characters: 4200,
        };
        let persona = PersonaSettings::default();
        let profile = ProfileSettings::default();
        let selected = PromptHistoryBuilder::new(&budget, &persona, &profile).select_turns(&history);

        assert_eq!(
            selected.iter().map(|turn| turn.text.as_str()).collect::<Vec<_>>(),
            vec!["two", "three", "four"]
        );
    }

    #[test]
    fn preamble_carries_persona_and_profile() {
        let budget = HistorySettings::default();
        let persona = PersonaSettings {
            assistant_name: "Nova".to_string(),
            preset: PersonaPreset::Witty,
            custom: String::new(),
        };
        let profile = ProfileSettings {
            name: "Sam".to_string(),
            about: "Likes sailing.".to_string(),
        };
        let preamble = PromptHistoryBuilder::new(&budget, &persona, &profile).preamble(clock());

        assert!(preamble.starts_with("You are Nova. You are helpful, with a dry, witty"));
        assert!(preamble.contains(" Your primary user is Sam."));
        assert!(preamble.contains(" Here's a bit about them: Likes sailing."));
        assert!(preamble.ends_with("[System Clock: October 19, 2026 at 3:04 PM]"));
    }

    #[test]
    fn blank_custom_persona_falls_back_to_friendly() {
        let budget = HistorySettings::default();
        let profile = ProfileSettings::default();
        let mut persona = PersonaSettings {
            preset: PersonaPreset::Custom,
            ..PersonaSettings::default()
        };
        let builder = PromptHistoryBuilder::new(&budget, &persona, &profile);
        assert!(builder.preamble(clock()).starts_with("You are Lumen, a friendly"));

        persona.custom = "You are a pirate.".to_string();
        let builder = PromptHistoryBuilder::new(&budget, &persona, &profile);
        assert!(builder.preamble(clock()).starts_with("You are a pirate. If you do not know"));
    }
}
