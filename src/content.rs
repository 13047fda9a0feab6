//! Prompt content: the truth/dare bank and the spin that picks a round type.

use rand::{Rng, seq::IndexedRandom};

use crate::dao::models::{GameMode, RoundType};

/// Maps a (mode, kind) pair to a prompt. Implementations are opaque to the game core.
pub trait PromptSource: Send + Sync {
    /// A question or challenge of `kind` suited to `mode`.
    fn prompt(&self, mode: GameMode, kind: RoundType) -> String;
}

/// Prompt assigned to the active player after a spin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Truth or dare.
    pub kind: RoundType,
    /// Text shown on the card.
    pub question: String,
}

/// Built-in bank covering every mode and both kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBank;

const FRIENDLY_TRUTHS: &[&str] = &[
    "Which childhood habit have you never quite grown out of?",
    "What is the strangest snack you would defend to anyone?",
    "Which fictional world would you move into tomorrow?",
    "What is a small thing that instantly improves your day?",
    "What did you believe as a kid that turned out to be wrong?",
    "Which song do you know every single word of?",
];

const FRIENDLY_DARES: &[&str] = &[
    "Do your most dramatic slow-motion walk across the room",
    "Speak only in questions for the next minute",
    "Draw the other player from memory in thirty seconds",
    "Hum a theme tune and let the other player guess it",
    "Show the third photo in your camera roll",
    "Invent a handshake and teach it to the other player",
];

const CRUSH_TRUTHS: &[&str] = &[
    "What was the first thing you noticed about the other player?",
    "Describe your ideal lazy Sunday together with someone special",
    "What is the most romantic thing anyone has done for you?",
    "Which compliment would make you blush the most?",
    "What song would you dedicate to someone you like?",
    "Have you ever written a message and deleted it before sending?",
];

const CRUSH_DARES: &[&str] = &[
    "Give the other player a sincere compliment while holding eye contact",
    "Describe the other player using only three emojis",
    "Send a voice note with your best movie-style love line",
    "Plan a pretend first date out loud in under a minute",
    "Write a two-line poem about the other player",
    "Let the other player pick your profile picture for an hour",
];

const BOLD_TRUTHS: &[&str] = &[
    "What is the boldest thing you have done to impress someone?",
    "Which secret would surprise your closest friends the most?",
    "What is a rule you broke and never got caught for?",
    "What is the riskiest message you have ever sent?",
    "Which of your habits would you never admit on a first date?",
    "What is something you want but have never asked for?",
];

const BOLD_DARES: &[&str] = &[
    "Let the other player read your last sent message aloud",
    "Do your best impression of the other player",
    "Call a friend and sing them happy birthday, whatever the date",
    "Post a story the other player writes for you",
    "Reveal your screen time report for today",
    "Keep a straight face while the other player tries to make you laugh for a minute",
];

impl PromptBank {
    fn table(mode: GameMode, kind: RoundType) -> &'static [&'static str] {
        match (mode, kind) {
            (GameMode::Friendly, RoundType::Truth) => FRIENDLY_TRUTHS,
            (GameMode::Friendly, RoundType::Dare) => FRIENDLY_DARES,
            (GameMode::Crush, RoundType::Truth) => CRUSH_TRUTHS,
            (GameMode::Crush, RoundType::Dare) => CRUSH_DARES,
            (GameMode::Bold, RoundType::Truth) => BOLD_TRUTHS,
            (GameMode::Bold, RoundType::Dare) => BOLD_DARES,
        }
    }
}

impl PromptSource for PromptBank {
    fn prompt(&self, mode: GameMode, kind: RoundType) -> String {
        Self::table(mode, kind)
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or("Tell the other player something true")
            .to_string()
    }
}

/// Pick truth or dare with equal odds.
pub fn spin() -> RoundType {
    if rand::rng().random_bool(0.5) {
        RoundType::Truth
    } else {
        RoundType::Dare
    }
}

/// Spin and draw the matching prompt from `source`.
pub fn draw(source: &dyn PromptSource, mode: GameMode) -> Prompt {
    let kind = spin();
    Prompt {
        kind,
        question: source.prompt(mode, kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [GameMode; 3] = [GameMode::Friendly, GameMode::Crush, GameMode::Bold];
    const KINDS: [RoundType; 2] = [RoundType::Truth, RoundType::Dare];

    #[test]
    fn bank_covers_every_mode_and_kind() {
        for mode in MODES {
            for kind in KINDS {
                let question = PromptBank.prompt(mode, kind);
                assert!(PromptBank::table(mode, kind).contains(&question.as_str()));
            }
        }
    }

    #[test]
    fn spin_yields_both_kinds() {
        let kinds: Vec<RoundType> = (0..200).map(|_| spin()).collect();
        assert!(kinds.contains(&RoundType::Truth));
        assert!(kinds.contains(&RoundType::Dare));
    }

    #[test]
    fn draw_matches_kind_to_table() {
        let prompt = draw(&PromptBank, GameMode::Crush);
        assert!(PromptBank::table(GameMode::Crush, prompt.kind).contains(&prompt.question.as_str()));
    }
}
