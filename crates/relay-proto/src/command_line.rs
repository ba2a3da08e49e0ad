//! Quote-aware tokenizer for comma-delimited command lines.
//!
//! ```text
//! playDot,1,40,0;1;5;7
//! play,"Event, with comma"
//! play,"Say ""hi"""
//! ```

/// One input line split into its command name and positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    tokens: Vec<String>,
}

impl CommandLine {
    /// Splits a line on commas, honoring double-quoted fields.
    ///
    /// Inside a quoted field, `""` is an escaped quote. After splitting each
    /// token is trimmed; a token still wrapped in quotes has them removed.
    pub fn parse(line: &str) -> Self {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    if in_quotes && chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = !in_quotes;
                    }
                }
                ',' if !in_quotes => tokens.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        tokens.push(current);

        let tokens = tokens.into_iter().map(|token| normalize(&token)).collect();
        Self { tokens }
    }

    /// Returns the command name, or `None` for a blank line.
    pub fn name(&self) -> Option<&str> {
        self.tokens
            .first()
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    /// Returns the positional arguments (everything after the name).
    pub fn args(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or_default()
    }
}

fn normalize(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}
