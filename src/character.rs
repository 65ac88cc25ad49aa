use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A persona the bot role-plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    /// Other names the persona answers to, e.g. a nickname.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub description: String,
    pub personality: String,
    #[serde(default)]
    pub lore: String,
    /// Facts written by hand; learned facts live in the memory store.
    #[serde(default)]
    pub facts: Vec<String>,
}

impl Character {
    /// Strips a leading speaker label the model sometimes echoes back:
    /// `"Name: "`, `"Alias: "` or `"Name (Alias): "`.
    pub fn strip_name_prefix<'a>(&self, text: &'a str) -> &'a str {
        let trimmed = text.trim_start();
        std::iter::once(&self.name)
            .chain(&self.aliases)
            .filter(|label| !label.is_empty())
            .find_map(|label| {
                let rest = trimmed.strip_prefix(label.as_str())?;
                let rest = strip_parenthesized(rest).unwrap_or(rest);
                rest.strip_prefix(':').map(str::trim_start)
            })
            .unwrap_or(text)
    }
}

/// `" (anything)"` at the start of `text`, removed.
fn strip_parenthesized(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(" (")?;
    let close = inner.find(')')?;
    Some(&inner[close + 1..])
}

#[derive(Deserialize)]
struct CharactersFile {
    characters: Vec<Character>,
}

/// Reads personas from a `.toml` or `.json` file. The first one is active.
pub fn load_characters(path: impl AsRef<Path>) -> anyhow::Result<Vec<Character>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read characters file {}", path.display()))?;
    let file: CharactersFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid characters file {}", path.display()))?,
        _ => toml::from_str(&content)
            .with_context(|| format!("Invalid characters file {}", path.display()))?,
    };
    if file.characters.is_empty() {
        anyhow::bail!("{} defines no characters", path.display());
    }
    Ok(file.characters)
}
