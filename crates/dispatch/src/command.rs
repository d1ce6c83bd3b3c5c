//! Prefix command parsing.

/// A message that starts with the command prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lower-cased command name.
    pub name: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Parse `content` if it starts with `prefix`.
    ///
    /// Everything after the prefix is trimmed and split on whitespace; the
    /// first token is the name. A bare prefix yields an empty name.
    #[must_use]
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let rest = content.strip_prefix(prefix)?;
        let mut tokens = rest.split_whitespace();
        let name = tokens.next().unwrap_or_default().to_lowercase();
        Some(Self {
            name,
            args: tokens.map(str::to_owned).collect(),
        })
    }

    /// Arguments joined back with single spaces.
    #[must_use]
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}
