//! Reader: turns source text into values.
//!
//! Reading happens in two passes. A `nom` tokenizer splits the text into opening
//! brackets, closing brackets and text blocks (maximal runs of anything else, where a
//! double-quoted section may contain whitespace and brackets). A stack of list buffers
//! then assembles the tokens into nested lists. `(` and `[` are interchangeable, as
//! are `)` and `]`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, multispace0, multispace1, one_of},
    combinator::{cut, map, recognize, value},
    multi::{many0_count, many1_count},
    sequence::pair,
};

use crate::ast::{FloatType, IntegerType, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseConfig {
    /// Treat `;` outside string literals as the start of a comment running to the end
    /// of the line. Off by default, where `;` is an ordinary symbol character.
    pub handle_comments: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Text(&'a str),
}

fn is_delimiter(c: char, config: ParseConfig) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']') || (config.handle_comments && c == ';')
}

/// Skip whitespace, and comments when enabled
fn skip_trivia(input: &str, config: ParseConfig) -> IResult<&str, ()> {
    if config.handle_comments {
        value(
            (),
            many0_count(alt((
                multispace1,
                recognize(pair(char(';'), take_till(|c| c == '\n'))),
            ))),
        )
        .parse(input)
    } else {
        value((), multispace0).parse(input)
    }
}

/// A run of non-delimiter characters; quoted sections may contain delimiters
fn text_block(input: &str, config: ParseConfig) -> IResult<&str, &str> {
    let quoted = recognize((char('"'), take_till(|c| c == '"'), cut(char('"'))));
    let plain = take_while1(move |c: char| c != '"' && !is_delimiter(c, config));
    recognize(many1_count(alt((quoted, plain)))).parse(input)
}

fn token(input: &str, config: ParseConfig) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::Open, one_of("([")),
        value(Token::Close, one_of(")]")),
        map(|input| text_block(input, config), Token::Text),
    ))
    .parse(input)
}

/// Split `input` into tokens paired with their byte offsets
fn tokenize(input: &str, config: ParseConfig) -> Result<Vec<(Token<'_>, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = input;
    loop {
        // Trivia skipping cannot fail: both alternatives accept empty input
        if let Ok((after, ())) = skip_trivia(rest, config) {
            rest = after;
        }
        if rest.is_empty() {
            return Ok(tokens);
        }

        let offset = input.len() - rest.len();
        match token(rest, config) {
            Ok((after, token)) => {
                tokens.push((token, offset));
                rest = after;
            }
            Err(_) => {
                return Err(ParseError::with_context(
                    ParseErrorKind::UnterminatedString,
                    "Unterminated string literal",
                    input,
                    offset,
                    rest.split_whitespace().next().map(str::to_owned),
                ));
            }
        }
    }
}

/// Classify a text block as a literal or a symbol
fn parse_atom(text: &str) -> Value {
    if let Ok(n) = text.parse::<IntegerType>() {
        return Value::Integer(n);
    }
    // Rust also accepts "inf" and "NaN" as floats; those stay symbols
    if text.contains(|c: char| c.is_ascii_digit()) {
        if let Ok(x) = text.parse::<FloatType>() {
            return Value::Float(x);
        }
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        return Value::String(text[1..text.len() - 1].to_owned());
    }
    match text {
        "#t" => Value::Bool(true),
        "#f" => Value::Bool(false),
        _ => Value::Symbol(text.to_owned()),
    }
}

/// Assemble tokens into top-level values using a stack of open list buffers
fn build(input: &str, tokens: Vec<(Token<'_>, usize)>) -> Result<Vec<Value>, ParseError> {
    let mut current: Vec<Value> = Vec::new();
    // Saved outer buffers, each with the offset of the bracket that opened the next one
    let mut enclosing: Vec<(Vec<Value>, usize)> = Vec::new();

    for (token, offset) in tokens {
        match token {
            Token::Open => {
                if enclosing.len() + 1 >= MAX_PARSE_DEPTH {
                    return Err(ParseError::with_context(
                        ParseErrorKind::TooDeeplyNested,
                        format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                        input,
                        offset,
                        None,
                    ));
                }
                enclosing.push((std::mem::take(&mut current), offset));
            }
            Token::Close => {
                let Some((mut parent, _)) = enclosing.pop() else {
                    return Err(ParseError::with_context(
                        ParseErrorKind::UnexpectedCloseParen,
                        "Extra close parenthesis",
                        input,
                        offset,
                        input.get(offset..=offset).map(str::to_owned),
                    ));
                };
                parent.push(Value::list(std::mem::take(&mut current)));
                current = parent;
            }
            Token::Text(text) => current.push(parse_atom(text)),
        }
    }

    if let Some(&(_, open_offset)) = enclosing.last() {
        return Err(ParseError::with_context(
            ParseErrorKind::UnclosedParen,
            format!(
                "Unclosed parenthesis ({} still open at end of input)",
                enclosing.len()
            ),
            input,
            open_offset,
            None,
        ));
    }
    Ok(current)
}

/// Parse a program: zero or more top-level expressions, in order.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    parse_program_with_config(input, ParseConfig::default())
}

pub fn parse_program_with_config(input: &str, config: ParseConfig) -> Result<Vec<Value>, Error> {
    let tokens = tokenize(input, config)?;
    Ok(build(input, tokens)?)
}

/// Parse a complete S-expression from input. Exactly one expression is accepted.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    let mut program = parse_program(input)?.into_iter();
    match (program.next(), program.next()) {
        (Some(value), None) => Ok(value),
        (None, _) => Err(ParseError::from_message(ParseErrorKind::Empty, "No expression found").into()),
        (Some(_), Some(extra)) => Err(ParseError::new(
            ParseErrorKind::TrailingContent,
            "Unexpected input after the first expression",
            None,
            Some(extra.to_string()),
        )
        .into()),
    }
}
