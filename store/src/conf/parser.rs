//! The nom grammar for configuration blocks.

use super::path::PathExpr;
use super::{Block, ConfError, Item, Value};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_till, take_while1};
use nom::character::complete::{char as nomchar, digit1, multispace1};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

/// Consume any run of whitespace and `#`-to-end-of-line comments.
fn sp(i: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(nomchar('#'), take_till(|c| c == '\n'))),
        ))),
    )(i)
}

/// Wrap a parser so it skips leading whitespace and comments.
fn lex<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(sp, inner)
}

fn ident(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(i)
}

/// A double-quoted string, with `\\`, `\"`, `\n` and `\t` escapes undone.
fn string_lit(i: &str) -> IResult<&str, String> {
    delimited(
        nomchar('"'),
        alt((
            escaped_transform(
                is_not("\"\\"),
                '\\',
                alt((
                    value("\\", nomchar('\\')),
                    value("\"", nomchar('"')),
                    value("\n", nomchar('n')),
                    value("\t", nomchar('t')),
                )),
            ),
            map(tag(""), |_| String::new()),
        )),
        nomchar('"'),
    )(i)
}

fn number(i: &str) -> IResult<&str, Value> {
    map_res(
        recognize(tuple((
            opt(nomchar('-')),
            digit1,
            opt(pair(nomchar('.'), digit1)),
        ))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>().map(Value::Float).map_err(|e| e.to_string())
            } else {
                s.parse::<i64>().map(Value::Int).map_err(|e| e.to_string())
            }
        },
    )(i)
}

/// A bare word is either a boolean or a reference to another key.
fn bare_word(i: &str) -> IResult<&str, Value> {
    map_res(
        take_while1(|c: char| c.is_ascii_alphanumeric() || "._-[]\"".contains(c)),
        |s: &str| match s {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => PathExpr::parse(s).map(Value::Ref).map_err(|e| e.to_string()),
        },
    )(i)
}

fn list(i: &str) -> IResult<&str, Value> {
    map(
        delimited(
            nomchar('['),
            separated_list0(lex(nomchar(',')), lex(val)),
            lex(nomchar(']')),
        ),
        Value::List,
    )(i)
}

fn val(i: &str) -> IResult<&str, Value> {
    alt((map(string_lit, Value::Str), list, number, bare_word))(i)
}

fn block(i: &str) -> IResult<&str, Block> {
    map(
        delimited(lex(nomchar('{')), many0(item), lex(nomchar('}'))),
        |items| Block { items },
    )(i)
}

fn item(i: &str) -> IResult<&str, Item> {
    let (i, key) = lex(ident)(i)?;
    let (i, label) = opt(lex(string_lit))(i)?;
    let (i, value) = alt((
        preceded(lex(nomchar('=')), lex(val)),
        map(block, Value::Block),
    ))(i)?;

    Ok((
        i,
        Item {
            key: key.to_string(),
            label,
            value,
        },
    ))
}

pub(super) fn parse(input: &str) -> Result<Block, ConfError> {
    match all_consuming(terminated(many0(item), sp))(input) {
        Ok((_, items)) => Ok(Block { items }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let consumed = input.len() - e.input.len();
            let line = input[..consumed].matches('\n').count() + 1;
            let snippet: String = e.input.trim_start().chars().take(40).collect();
            Err(ConfError::Syntax { line, snippet })
        }
        Err(nom::Err::Incomplete(_)) => {
            unreachable!("Pandora bug: complete parsers cannot return Incomplete")
        }
    }
}
