use thiserror::Error;

use crate::UsageError;

pub const PROMPT: &str = "Enter command (PUT key value | GET key | DELETE key | SHOW | exit): ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Show,
    Exit,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("SHOW command does not require additional arguments.")]
    ShowTakesNoArguments,
    #[error("Unknown command. Please use PUT, GET, DELETE, SHOW, or exit.")]
    Unknown,
}

impl Command {
    /// Parse one input line. The command word is case-insensitive; tokens
    /// past the ones a command needs are ignored, except for SHOW.
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            return Ok(Command::Exit);
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(word) = tokens.first() else {
            return Err(ParseError::Unknown);
        };
        let key = tokens.get(1).map(|k| k.to_string());
        let value = tokens.get(2).map(|v| v.to_string());

        match word.to_ascii_uppercase().as_str() {
            "PUT" => match (key, value) {
                (Some(key), Some(value)) => Ok(Command::Put { key, value }),
                _ => Err(UsageError::Insert.into()),
            },
            "GET" => key
                .map(|key| Command::Get { key })
                .ok_or(UsageError::Lookup.into()),
            "DELETE" => key
                .map(|key| Command::Delete { key })
                .ok_or(UsageError::Delete.into()),
            "SHOW" if tokens.len() == 1 => Ok(Command::Show),
            "SHOW" => Err(ParseError::ShowTakesNoArguments),
            _ => Err(ParseError::Unknown),
        }
    }
}

/// Entries written by the client at startup.
pub const SEED: [(&str, &str); 5] = [
    ("apple", "red"),
    ("banana", "yellow"),
    ("grape", "purple"),
    ("lemon", "yellow"),
    ("cherry", "red"),
];
