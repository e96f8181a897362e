//! Command-line parsing. Verbs are case-insensitive; arguments keep their case.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// Reverse path; empty for the null sender `<>`.
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    Unknown(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("missing argument")]
    MissingArgument,

    #[error("malformed path")]
    MalformedPath,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, SyntaxError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Ok(Command::Helo(required(rest)?.to_string())),
            "EHLO" => Ok(Command::Ehlo(required(rest)?.to_string())),
            "MAIL" => {
                let path = strip_keyword(rest, "FROM:")?;
                Ok(Command::Mail(parse_path(path, true)?))
            }
            "RCPT" => {
                let path = strip_keyword(rest, "TO:")?;
                Ok(Command::Rcpt(parse_path(path, false)?))
            }
            "DATA" => Ok(Command::Data),
            "RSET" => Ok(Command::Rset),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            "STARTTLS" => Ok(Command::StartTls),
            "AUTH" => {
                let mut parts = required(rest)?.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or(SyntaxError::MissingArgument)?
                    .to_ascii_uppercase();
                Ok(Command::Auth {
                    mechanism,
                    initial: parts.next().map(str::to_string),
                })
            }
            _ => Ok(Command::Unknown(verb.to_string())),
        }
    }
}

fn required(arg: &str) -> Result<&str, SyntaxError> {
    if arg.is_empty() {
        Err(SyntaxError::MissingArgument)
    } else {
        Ok(arg)
    }
}

fn strip_keyword<'a>(arg: &'a str, keyword: &str) -> Result<&'a str, SyntaxError> {
    match arg.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => Ok(arg[keyword.len()..].trim_start()),
        _ => Err(SyntaxError::MissingArgument),
    }
}

/// `<local@domain>` followed by optional ESMTP parameters, which are ignored.
fn parse_path(arg: &str, allow_null: bool) -> Result<String, SyntaxError> {
    let path = arg.split_whitespace().next().ok_or(SyntaxError::MalformedPath)?;
    let inner = path
        .strip_prefix('<')
        .and_then(|p| p.strip_suffix('>'))
        .ok_or(SyntaxError::MalformedPath)?;

    if inner.is_empty() {
        return if allow_null {
            Ok(String::new())
        } else {
            Err(SyntaxError::MalformedPath)
        };
    }

    // Source routes (`@a,@b:user@c`) are obsolete; keep the mailbox.
    let mailbox = inner.rsplit(':').next().unwrap_or(inner);
    match mailbox.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(mailbox.to_string()),
        _ => Err(SyntaxError::MalformedPath),
    }
}

/// Domain part of a mailbox.
pub fn domain_of(mailbox: &str) -> Option<&str> {
    mailbox
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|d| !d.is_empty())
}
