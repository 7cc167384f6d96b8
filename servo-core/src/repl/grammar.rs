//! Parser for the servo console.
//!
//! Commands are whitespace-separated words, matched case-insensitively
//! against the catalog. The parser works directly on the input line with
//! `winnow` combinators, so it needs neither allocation nor a token buffer.

use core::fmt;

use winnow::ModalResult;
use winnow::ascii::{multispace0, space1};
use winnow::combinator::{alt, eof, opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

use super::catalog::{self, CommandTag};

/// Structured commands produced by the parser.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command<'a> {
    Enable,
    Disable,
    Target(f32),
    Release,
    Etb(EtbCommand),
    Faults(FaultsCommand),
    Status,
    Help(Option<&'a str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EtbCommand {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultsCommand {
    Show,
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    Empty,
    UnknownCommand,
    InvalidArgument,
    TrailingInput,
}

/// Parse failure with the byte offset at which it was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    const fn new(kind: ParseErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParseErrorKind::Empty => f.write_str("empty command"),
            ParseErrorKind::UnknownCommand => {
                write!(f, "unknown command at column {}", self.offset)
            }
            ParseErrorKind::InvalidArgument => {
                write!(f, "invalid argument at column {}", self.offset)
            }
            ParseErrorKind::TrailingInput => {
                write!(f, "unexpected input at column {}", self.offset)
            }
        }
    }
}

/// Parses one console line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError> {
    let mut input = line.trim_start();
    let offset = |rest: &str| line.len() - rest.len();

    if input.trim_end().is_empty() {
        return Err(ParseError::new(ParseErrorKind::Empty, 0));
    }

    let start = offset(input);
    let name = word
        .parse_next(&mut input)
        .map_err(|_| ParseError::new(ParseErrorKind::UnknownCommand, start))?;
    let spec =
        catalog::find(name).ok_or(ParseError::new(ParseErrorKind::UnknownCommand, start))?;

    let command = arguments(spec.tag, &mut input)
        .map_err(|_| ParseError::new(ParseErrorKind::InvalidArgument, offset(input)))?;

    end_of_line
        .parse_next(&mut input)
        .map_err(|_| ParseError::new(ParseErrorKind::TrailingInput, offset(input)))?;

    Ok(command)
}

fn arguments<'i>(tag: CommandTag, input: &mut &'i str) -> ModalResult<Command<'i>> {
    match tag {
        CommandTag::Enable => Ok(Command::Enable),
        CommandTag::Disable => Ok(Command::Disable),
        CommandTag::Release => Ok(Command::Release),
        CommandTag::Status => Ok(Command::Status),
        CommandTag::Target => preceded(space1, percent)
            .map(Command::Target)
            .parse_next(input),
        CommandTag::Etb => preceded(
            space1,
            alt((
                keyword("on").value(EtbCommand::On),
                keyword("off").value(EtbCommand::Off),
            )),
        )
        .map(Command::Etb)
        .parse_next(input),
        CommandTag::Faults => opt(preceded(space1, keyword("clear")))
            .map(|clear| {
                Command::Faults(if clear.is_some() {
                    FaultsCommand::Clear
                } else {
                    FaultsCommand::Show
                })
            })
            .parse_next(input),
        CommandTag::Help => opt(preceded(space1, word))
            .map(Command::Help)
            .parse_next(input),
    }
}

fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| !c.is_ascii_whitespace()).parse_next(input)
}

fn keyword<'i>(expected: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    word.verify(move |candidate: &str| candidate.eq_ignore_ascii_case(expected))
}

fn percent(input: &mut &str) -> ModalResult<f32> {
    take_while(1.., |c: char| {
        c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')
    })
    .verify_map(|text: &str| text.parse::<f32>().ok().filter(|value| value.is_finite()))
    .parse_next(input)
}

fn end_of_line(input: &mut &str) -> ModalResult<()> {
    (multispace0, eof).void().parse_next(input)
}
