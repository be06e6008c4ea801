//! Line commands typed into the dashboard or stdin

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Search the catalog
    Search(String),
    /// Add the nth search result (1-based)
    Add(usize),
    /// Remove the nth playlist song (1-based, host only)
    Remove(usize),
    List,
    Hosts,
    Save,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
    InvalidNumber(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "Type a command (help lists them)"),
            ParseError::Unknown(cmd) => write!(f, "Unknown command: {}", cmd),
            ParseError::MissingArgument(cmd) => write!(f, "{} needs an argument", cmd),
            ParseError::InvalidNumber(arg) => write!(f, "Not a song number: {}", arg),
        }
    }
}

impl std::error::Error for ParseError {}

pub const HELP: &str =
    "search <query> | add <n> | remove <n> | list | hosts | save | quit";

/// Parse one input line
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    match name.to_ascii_lowercase().as_str() {
        "" => Err(ParseError::Empty),
        "search" | "s" => {
            if rest.is_empty() {
                Err(ParseError::MissingArgument("search"))
            } else {
                Ok(Command::Search(rest.to_string()))
            }
        }
        "add" | "a" => number(rest, "add").map(Command::Add),
        "remove" | "rm" => number(rest, "remove").map(Command::Remove),
        "list" | "ls" => Ok(Command::List),
        "hosts" => Ok(Command::Hosts),
        "save" => Ok(Command::Save),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn number(arg: &str, command: &'static str) -> Result<usize, ParseError> {
    if arg.is_empty() {
        return Err(ParseError::MissingArgument(command));
    }
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::InvalidNumber(arg.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("search daft punk"), Ok(Command::Search("daft punk".to_string())));
        assert_eq!(parse("  add 2 "), Ok(Command::Add(2)));
        assert_eq!(parse("rm 1"), Ok(Command::Remove(1)));
        assert_eq!(parse("LIST"), Ok(Command::List));
        assert_eq!(parse("hosts"), Ok(Command::Hosts));
        assert_eq!(parse("save"), Ok(Command::Save));
        assert_eq!(parse("q"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("search"), Err(ParseError::MissingArgument("search")));
        assert_eq!(parse("add"), Err(ParseError::MissingArgument("add")));
        assert_eq!(parse("add 0"), Err(ParseError::InvalidNumber("0".to_string())));
        assert_eq!(parse("remove two"), Err(ParseError::InvalidNumber("two".to_string())));
        assert_eq!(parse("play"), Err(ParseError::Unknown("play".to_string())));
    }

    #[test]
    fn test_search_keeps_inner_spacing() {
        assert_eq!(
            parse("search   AC/DC  & co"),
            Ok(Command::Search("AC/DC  & co".to_string()))
        );
    }
}
