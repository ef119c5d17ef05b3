//! Crisis interception.
//!
//! The keyword list is a blunt instrument and over-flags on purpose. Callers
//! only see [`SafetyClassifier`], so the matcher can be swapped out.

/// Verdict for one inbound text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub flagged: bool,
}

pub trait SafetyClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;
}

/// Crisis-indicating phrases, Russian and English.
pub const DEFAULT_CRISIS_PHRASES: &[&str] = &[
    "суицид",
    "самоубийство",
    "покончить с собой",
    "убить себя",
    "причинить вред",
    "навредить себе",
    "не хочу жить",
    "жить не хочется",
    "свести счеты",
    "повеситься",
    "броситься",
    "порезы",
    "резать себя",
    "suicide",
    "kill myself",
    "harm myself",
    "hurt myself",
    "end my life",
];

/// Case-insensitive substring match over a fixed phrase list.
#[derive(Clone, Debug)]
pub struct KeywordFilter {
    phrases: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CRISIS_PHRASES.iter().copied())
    }
}

impl SafetyClassifier for KeywordFilter {
    fn classify(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        Classification {
            flagged: self.phrases.iter().any(|p| lower.contains(p.as_str())),
        }
    }
}
