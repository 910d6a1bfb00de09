use std::collections::HashSet;

use crate::config::DetectorConfig;

/// Text patterns posted by game and utility bots that should never count as conversation.
#[derive(Clone, Debug, Default)]
pub struct Denylist {
    phrases: HashSet<String>,
    suffixes: Vec<String>,
    prefixes: Vec<String>,
}

impl Denylist {
    pub fn new(
        phrases: impl IntoIterator<Item = String>,
        suffixes: impl IntoIterator<Item = String>,
        prefixes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            phrases: phrases.into_iter().collect(),
            suffixes: suffixes.into_iter().filter(|entry| !entry.is_empty()).collect(),
            prefixes: prefixes.into_iter().filter(|entry| !entry.is_empty()).collect(),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.noise_phrases.iter().cloned(),
            config.noise_suffixes.iter().cloned(),
            config.noise_prefixes.iter().cloned(),
        )
    }

    /// Matches on the trimmed text.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.trim();
        self.phrases.contains(text)
            || self.suffixes.iter().any(|suffix| text.ends_with(suffix.as_str()))
            || self.prefixes.iter().any(|prefix| text.starts_with(prefix.as_str()))
    }
}
