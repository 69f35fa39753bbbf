use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language the translated text should be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    Zh,
    En,
}

impl TargetLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
        }
    }

    /// Full language name for LLM prompts
    pub fn language_name(&self) -> &'static str {
        match self {
            Self::Zh => "Chinese",
            Self::En => "English",
        }
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zh" => Ok(Self::Zh),
            "en" => Ok(Self::En),
            other => Err(format!("unknown direction '{}', expected 'zh' or 'en'", other)),
        }
    }
}

/// Pick the output language from the composition of `text`.
///
/// One Chinese character carries roughly as much as three to five Latin
/// letters, so the text is only treated as English when Latin letters
/// outnumber CJK characters more than three to one. Everything else,
/// including mixed text such as "我爱iPhone", goes to English.
pub fn detect_direction(text: &str) -> TargetLanguage {
    let cjk_count = text.chars().filter(|c| ('\u{4e00}'..='\u{9fa5}').contains(c)).count();
    let latin_count = text.chars().filter(|c| c.is_ascii_alphabetic()).count();

    if latin_count > cjk_count * 3 {
        TargetLanguage::Zh
    } else {
        TargetLanguage::En
    }
}
