//! Typed classification of modem output.
//!
//! Callers never substring-match raw modem text; they ask a [`Reply`] for
//! terminators, status values or the payload prompt.

use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::space0,
    sequence::preceded,
    IResult,
};

use crate::LinkError;

/// One classified line of modem output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtLine {
    /// Final `OK` terminator.
    Ok,
    /// Final `ERROR` terminator.
    Error,
    /// `+FIELD: value` status report.
    Status { field: String, value: String },
    /// The `>` prompt asking for raw payload bytes.
    Prompt,
    /// Command echo, unsolicited codes we do not model, noise.
    Unrecognized(String),
}

fn status(input: &str) -> IResult<&str, (&str, &str)> {
    let (rest, field) = preceded(
        tag("+"),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == ' ' || c == '_'),
    )(input)?;
    let (rest, _) = tag(":")(rest)?;
    let (value, _) = space0(rest)?;
    Ok(("", (field, value)))
}

/// Classify a single trimmed line.
pub fn classify(line: &str) -> AtLine {
    match line {
        "OK" => AtLine::Ok,
        "ERROR" => AtLine::Error,
        ">" => AtLine::Prompt,
        _ => match status(line) {
            Ok((_, (field, value))) => AtLine::Status {
                field: field.trim_end().to_owned(),
                value: value.trim_end().to_owned(),
            },
            Err(_) => AtLine::Unrecognized(line.to_owned()),
        },
    }
}

/// Terminator found at the tail of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Ok,
    Error,
}

/// Accumulated response to one command (or one wait window).
#[derive(Debug, Clone)]
pub struct Reply {
    text: String,
}

impl Reply {
    pub(crate) fn new(text: String) -> Self {
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lines of the response, classified. The trailing fragment is
    /// included — the prompt never gets its CRLF.
    pub fn lines(&self) -> impl Iterator<Item = AtLine> + '_ {
        self.text
            .split("\r\n")
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(classify)
    }

    pub fn terminator(&self) -> Option<Terminator> {
        if self.text.ends_with("OK\r\n") {
            Some(Terminator::Ok)
        } else if self.text.ends_with("ERROR\r\n") {
            Some(Terminator::Error)
        } else {
            None
        }
    }

    pub fn is_ok(&self) -> bool {
        self.terminator() == Some(Terminator::Ok)
    }

    /// Value of the first `+field: …` status line, if any.
    pub fn value_of(&self, field: &str) -> Option<String> {
        self.lines().find_map(|line| match line {
            AtLine::Status { field: f, value } if f == field => Some(value),
            _ => None,
        })
    }

    /// Whether any status line reports exactly `+field: value`.
    pub fn has_status(&self, field: &str, value: &str) -> bool {
        self.lines().any(|line| {
            matches!(line, AtLine::Status { field: f, value: v } if f == field && v == value)
        })
    }

    pub fn has_prompt(&self) -> bool {
        self.lines().any(|line| line == AtLine::Prompt)
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.text.contains(marker)
    }

    /// Promote this reply to a hard result for `command`.
    pub fn require_ok(&self, command: &str) -> Result<(), LinkError> {
        match self.terminator() {
            Some(Terminator::Ok) => Ok(()),
            Some(Terminator::Error) => Err(LinkError::ModemRejected {
                command: command.to_owned(),
            }),
            None => Err(LinkError::CommandTimeout {
                command: command.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_classifies_terminators_and_prompt() {
        assert_eq!(classify("OK"), AtLine::Ok);
        assert_eq!(classify("ERROR"), AtLine::Error);
        assert_eq!(classify(">"), AtLine::Prompt);
    }

    #[test]
    fn it_classifies_status_lines() {
        assert_eq!(
            classify("+CREG: 0,1"),
            AtLine::Status {
                field: "CREG".into(),
                value: "0,1".into()
            }
        );
        assert_eq!(
            classify("+IPADDR: 10.44.2.7"),
            AtLine::Status {
                field: "IPADDR".into(),
                value: "10.44.2.7".into()
            }
        );
        assert_eq!(
            classify("+CME ERROR: 30"),
            AtLine::Status {
                field: "CME ERROR".into(),
                value: "30".into()
            }
        );
    }

    #[test]
    fn it_leaves_echo_and_noise_unrecognized() {
        assert_eq!(
            classify("AT+CREG?"),
            AtLine::Unrecognized("AT+CREG?".into())
        );
        assert_eq!(classify("+:"), AtLine::Unrecognized("+:".into()));
    }

    #[test]
    fn it_finds_status_values_in_a_reply() {
        let reply =
            Reply::new("AT+CREG?\r\n+CREG: 0,5\r\n\r\nOK\r\n".to_owned());
        assert_eq!(reply.terminator(), Some(Terminator::Ok));
        assert!(reply.is_ok());
        assert_eq!(reply.value_of("CREG").as_deref(), Some("0,5"));
        assert!(reply.has_status("CREG", "0,5"));
        assert!(!reply.has_status("CREG", "0,1"));
    }

    #[test]
    fn it_detects_error_terminators_including_cme() {
        let reply = Reply::new("AT+CGACT=1,1\r\n+CME ERROR\r\n".to_owned());
        assert_eq!(reply.terminator(), Some(Terminator::Error));
        let plain = Reply::new("AT+NETOPEN\r\nERROR\r\n".to_owned());
        assert!(plain.require_ok("AT+NETOPEN").is_err());
    }

    #[test]
    fn it_sees_the_prompt_without_a_newline() {
        let reply = Reply::new("AT+CIPSEND=0,30\r\n> ".to_owned());
        assert!(reply.has_prompt());
        assert_eq!(reply.terminator(), None);
    }

    #[test]
    fn it_times_out_without_a_terminator() {
        let reply = Reply::new(String::new());
        assert!(matches!(
            reply.require_ok("AT"),
            Err(LinkError::CommandTimeout { command }) if command == "AT"
        ));
    }
}
