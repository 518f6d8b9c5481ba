//! S-expression reader.
//!
//! - `(...)` and `[...]` delimit lists; the closer must match the opener
//! - `"..."` strings support the escapes `\" \\ \n \t \r`
//! - `'text'` (a quote run closed by another quote before a delimiter) is a
//!   string literal; any other `'x` reads as `(quote x)`. Single-quoted
//!   literals are raw single tokens: no whitespace, delimiters or escapes.
//!   Text needing any of those uses double quotes.
//! - a run of ASCII digits is an integer; every other token is a symbol
//!   (`#t`, `-5`, `3.5` and `#:key` included)
//! - `;` starts a comment running to the end of the line

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace1, not_line_ending},
    combinator::value,
    error::ErrorKind,
    multi::many0,
    sequence::preceded,
};

use crate::ast::{IntegerType, Symbol, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

type ReadError<'a> = nom::error::Error<&'a str>;

fn fail<T>(input: &str, code: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Failure(ReadError::new(input, code)))
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | ';')
}

fn at_token_end(input: &str) -> bool {
    input.chars().next().is_none_or(is_delimiter)
}

/// Skip whitespace and `;` comments
fn trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((multispace1, preceded(char(';'), not_line_ending)))),
    )
    .parse(input)
}

/// Digits followed by a delimiter. Literals that do not fit are rejected
/// rather than read as symbols.
fn parse_integer(input: &str) -> IResult<&str, Value> {
    let (rest, digits) = take_while1(|c: char| c.is_ascii_digit()).parse(input)?;
    if !at_token_end(rest) {
        return Err(nom::Err::Error(ReadError::new(input, ErrorKind::Digit)));
    }
    match digits.parse::<IntegerType>() {
        Ok(n) => Ok((rest, Value::Integer(n))),
        Err(_) => fail(input, ErrorKind::TooLarge),
    }
}

fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let (rest, name) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;
    Ok((rest, Value::Symbol(Symbol::new(name))))
}

fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), Value::String(text))),
            Some('\\') => {
                match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => return fail(remaining, ErrorKind::Escaped),
                    None => return fail(chars.as_str(), ErrorKind::Eof),
                }
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            None => return fail(remaining, ErrorKind::Eof),
        }
    }
}

/// `'text'` with no delimiter or quote inside and a delimiter after it
fn parse_quoted_literal(input: &str) -> IResult<&str, Value> {
    let (rest, _) = char('\'').parse(input)?;
    let (rest, text) = take_while1(|c: char| c != '\'' && !is_delimiter(c)).parse(rest)?;
    let (rest, _) = char('\'').parse(rest)?;
    if !at_token_end(rest) {
        return Err(nom::Err::Error(ReadError::new(input, ErrorKind::Char)));
    }
    Ok((rest, Value::from(text)))
}

/// `'datum` reads as `(quote datum)`
fn parse_quote(input: &str, depth: usize) -> IResult<&str, Value> {
    let (rest, _) = char('\'').parse(input)?;
    let (rest, _) = trivia(rest)?;
    if rest.is_empty() {
        return fail(rest, ErrorKind::Eof);
    }
    let (rest, datum) = parse_sexpr(rest, depth + 1)?;
    Ok((
        rest,
        Value::from(vec![Value::Symbol(Symbol::new("quote")), datum]),
    ))
}

fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (mut input, open) = alt((char('('), char('['))).parse(input)?;
    let close = if open == '(' { ')' } else { ']' };
    let mut elements = Vec::new();

    loop {
        let (rest, _) = trivia(input)?;
        match rest.chars().next() {
            None => return fail(rest, ErrorKind::Eof),
            Some(c) if c == close => {
                return Ok((&rest[c.len_utf8()..], Value::from(elements)));
            }
            Some(')' | ']') => return fail(rest, ErrorKind::Tag),
            Some(_) => {
                let (rest, element) = parse_sexpr(rest, depth + 1)?;
                elements.push(element);
                input = rest;
            }
        }
    }
}

/// Parse one datum; leading trivia must already be skipped
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return fail(input, ErrorKind::TooLarge);
    }
    if input.starts_with([')', ']']) {
        return fail(input, ErrorKind::Char);
    }
    alt((
        |input| parse_list(input, depth),
        parse_string,
        parse_quoted_literal,
        |input| parse_quote(input, depth),
        parse_integer,
        parse_symbol,
    ))
    .parse(input)
}

/// Translate a nom failure into a structured [`ParseError`]
fn to_parse_error(source: &str, err: nom::Err<ReadError<'_>>) -> Error {
    let (rest, code) = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => (e.input, e.code),
        nom::Err::Incomplete(_) => ("", ErrorKind::Eof),
    };
    let offset = source.len().saturating_sub(rest.len());
    let found = rest.chars().next().map(String::from);

    let (kind, message) = match code {
        ErrorKind::Eof => (ParseErrorKind::Incomplete, "Unexpected end of input".to_owned()),
        ErrorKind::TooLarge if rest.starts_with(|c: char| c.is_ascii_digit()) => (
            ParseErrorKind::ImplementationLimit,
            format!("Integer literal does not fit in {} bits", IntegerType::BITS),
        ),
        ErrorKind::TooLarge => (
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        ),
        ErrorKind::Escaped => (
            ParseErrorKind::InvalidSyntax,
            "Invalid escape sequence in string".to_owned(),
        ),
        ErrorKind::Tag => (
            ParseErrorKind::InvalidSyntax,
            "Mismatched closing bracket".to_owned(),
        ),
        ErrorKind::Char if found.as_deref().is_some_and(|c| c == ")" || c == "]") => (
            ParseErrorKind::InvalidSyntax,
            "Unexpected closing bracket".to_owned(),
        ),
        _ => (
            ParseErrorKind::InvalidSyntax,
            format!("Invalid syntax at position {offset}"),
        ),
    };

    ParseError::at(kind, message, source, offset, found).into()
}

/// Read every datum in `source`. Blank input yields no forms.
pub fn parse(source: &str) -> Result<Vec<Value>, Error> {
    let mut forms = Vec::new();
    let mut input = source;
    loop {
        let (rest, _) = trivia(input).map_err(|e| to_parse_error(source, e))?;
        if rest.is_empty() {
            return Ok(forms);
        }
        let (rest, form) = parse_sexpr(rest, 0).map_err(|e| to_parse_error(source, e))?;
        forms.push(form);
        input = rest;
    }
}

/// Read exactly one datum from `source`
pub fn parse_scheme(source: &str) -> Result<Value, Error> {
    let (rest, _) = trivia(source).map_err(|e| to_parse_error(source, e))?;
    if rest.is_empty() {
        return Err(to_parse_error(
            source,
            nom::Err::Failure(ReadError::new(rest, ErrorKind::Eof)),
        ));
    }
    let (rest, form) = parse_sexpr(rest, 0).map_err(|e| to_parse_error(source, e))?;
    let (rest, _) = trivia(rest).map_err(|e| to_parse_error(source, e))?;

    if rest.is_empty() {
        Ok(form)
    } else {
        let offset = source.len() - rest.len();
        Err(ParseError::at(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input: '{}'", rest.trim_end()),
            source,
            offset,
            rest.chars().next().map(String::from),
        )
        .into())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    /// Test result variants for parse tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),
        SpecificError(ParseErrorKind),
        Error,
    }
    use ParseTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(val(value))
    }

    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("#{} '{input}'", i + 1);
            match (parse_scheme(input), expected) {
                (Ok(actual), Success(expected)) => {
                    assert_eq!(actual, expected, "{test_id}");
                }
                (Err(crate::Error::Parse(err)), SpecificError(kind)) => {
                    assert_eq!(err.kind, kind, "{test_id}: {err}");
                }
                (Err(_), Error) => {}
                (result, expected) => {
                    panic!("{test_id}: expected {expected:?}, got {result:?}");
                }
            }
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // === ATOMS ===
            ("42", success(42)),
            ("0", success(0)),
            ("  7  ", success(7)),
            ("9223372036854775807", success(i64::MAX)),
            ("9223372036854775808", SpecificError(ParseErrorKind::ImplementationLimit)),
            ("-5", Success(sym("-5"))),
            ("3.5", Success(sym("3.5"))),
            ("12abc", Success(sym("12abc"))),
            ("#t", Success(sym("#t"))),
            ("#:color", Success(sym("#:color"))),
            ("set!", Success(sym("set!"))),
            ("λ", Success(sym("λ"))),
            (".", Success(sym("."))),
            // === STRINGS ===
            ("\"hello\"", success("hello")),
            ("\"\"", success("")),
            ("\"a\\\"b\"", success("a\"b")),
            ("\"line\\nnext\\ttab\\\\\"", success("line\nnext\ttab\\")),
            ("\"(not a list) ; nor a comment\"", success("(not a list) ; nor a comment")),
            ("\"bad \\q escape\"", SpecificError(ParseErrorKind::InvalidSyntax)),
            ("\"unterminated", SpecificError(ParseErrorKind::Incomplete)),
            ("\"ends with backslash\\", SpecificError(ParseErrorKind::Incomplete)),
            // === SINGLE-QUOTED LITERALS AND QUOTE ===
            ("'text'", success("text")),
            ("'x", Success(val(vec![sym("quote"), sym("x")]))),
            ("'(1 2)", Success(val(vec![sym("quote"), val([1, 2])]))),
            ("''a", Success(val(vec![sym("quote"), val(vec![sym("quote"), sym("a")])]))),
            ("'it's", Success(val(vec![sym("quote"), sym("it's")]))),
            ("'a\\n'", success("a\\n")),
            ("'two words'", SpecificError(ParseErrorKind::TrailingContent)),
            ("'", SpecificError(ParseErrorKind::Incomplete)),
            // === LISTS ===
            ("()", Success(nil())),
            ("[]", Success(nil())),
            ("(1 2 3)", success([1, 2, 3])),
            ("[a b]", Success(val(vec![sym("a"), sym("b")]))),
            ("(a (b [c]))", Success(val(vec![sym("a"), val(vec![sym("b"), val(vec![sym("c")])])]))),
            ("(f\"s\"1)", Success(val(vec![sym("f"), val("s"), val(1)]))),
            ("(a . rest)", Success(val(vec![sym("a"), sym("."), sym("rest")]))),
            ("(+ 1 ; comment\n 2)", Success(val(vec![sym("+"), val(1), val(2)]))),
            ("; leading comment\n(x)", Success(val(vec![sym("x")]))),
            // === ERRORS ===
            ("(1 2", SpecificError(ParseErrorKind::Incomplete)),
            ("(define (f x)\n  (+ x", SpecificError(ParseErrorKind::Incomplete)),
            (")", SpecificError(ParseErrorKind::InvalidSyntax)),
            ("(a]", SpecificError(ParseErrorKind::InvalidSyntax)),
            ("(a) (b)", SpecificError(ParseErrorKind::TrailingContent)),
            ("(a))", SpecificError(ParseErrorKind::TrailingContent)),
            ("", SpecificError(ParseErrorKind::Incomplete)),
            ("; only a comment", Error),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parse_many_forms() {
        let forms = parse("(define x 1)\n; comment\n(+ x 2) 'done").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[2], val(vec![sym("quote"), sym("done")]));

        assert!(parse("").unwrap().is_empty());
        assert!(parse("  ; nothing\n").unwrap().is_empty());

        let err = parse("(ok) )").unwrap_err();
        assert!(matches!(err, crate::Error::Parse(ref e) if e.kind == ParseErrorKind::InvalidSyntax && e.found.as_deref() == Some(")")));
    }

    #[test]
    fn test_nesting_depth_limit() {
        let ok = format!("{}{}", "(".repeat(MAX_PARSE_DEPTH - 1), ")".repeat(MAX_PARSE_DEPTH - 1));
        assert!(parse_scheme(&ok).is_ok());

        let too_deep = format!("{}{}", "(".repeat(MAX_PARSE_DEPTH + 1), ")".repeat(MAX_PARSE_DEPTH + 1));
        match parse_scheme(&too_deep) {
            Err(crate::Error::Parse(err)) => assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested),
            other => panic!("expected nesting error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_context() {
        let Err(crate::Error::Parse(err)) = parse_scheme("(list 1 2 \"oops\\x\")") else {
            panic!("expected a parse error");
        };
        assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
        assert!(err.context.as_ref().unwrap().contains("oops"));
        assert!(err.to_string().starts_with("ParseError: Invalid escape"));
    }
}
