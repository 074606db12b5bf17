use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Language tag for the shared code buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    #[default]
    JavaScript,
    TypeScript,
    Python,
    Java,
    Cpp,
    Other(String),
}

impl Language {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Self::JavaScript,
            "typescript" | "ts" => Self::TypeScript,
            "python" | "py" => Self::Python,
            "java" => Self::Java,
            "cpp" | "c++" => Self::Cpp,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::Other(tag) => tag,
        }
    }

    /// File extension used when exporting the buffer.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
            Self::Python => "py",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::Other(_) => "txt",
        }
    }
}

impl From<String> for Language {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.tag().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Replicated snapshot of a participant's code buffer.
///
/// Ordering is last-writer-wins on `(revision, author)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    pub text: String,
    pub language: Language,
    pub revision: u64,
    pub author: ParticipantId,
}

impl CodeUpdate {
    /// Whether this update should replace a buffer stamped `(revision, author)`.
    pub fn supersedes(&self, revision: u64, author: &ParticipantId) -> bool {
        (self.revision, &self.author) > (revision, author)
    }
}
