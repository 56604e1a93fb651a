use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, tuple},
    IResult,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare word: keyword, field, function or index name
    Ident(String),
    /// `"name"` or `` `name` ``
    QuotedIdent(String),
    /// `'text'`
    Str(String),
    /// Numeric literal, kept as written
    Number(String),
    Star,
    Comma,
    LParen,
    RParen,
    Slash,
    Semicolon,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Token {
    /// True for a bare word equal to `keyword`, ignoring case
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::QuotedIdent(s) => format!("\"{}\"", s),
            Token::Str(s) => format!("'{}'", s),
            Token::Number(s) => s.clone(),
            Token::Star => "*".to_string(),
            Token::Comma => ",".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Slash => "/".to_string(),
            Token::Semicolon => ";".to_string(),
            Token::Eq => "=".to_string(),
            Token::NotEq => "!=".to_string(),
            Token::Lt => "<".to_string(),
            Token::Lte => "<=".to_string(),
            Token::Gt => ">".to_string(),
            Token::Gte => ">=".to_string(),
        }
    }
}

/// Token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '@'
}

/// `-` and `*` make index patterns such as `logs-*` one word; the parser
/// only accepts them bare in FROM
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '-' | '*')
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)
}

/// Identifier: letters, digits, `_ . @ - *` after a letter, `_` or `@`
fn word(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(take_while1(is_word_start), take_while(is_word_char))),
        |s: &str| s.to_string(),
    )(input)
}

/// Number glued to a unit suffix such as `1h` or `1.5d`
fn unit_value(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(number, take_while1(|c: char| c.is_alphabetic()))),
        |s: &str| s.to_string(),
    )(input)
}

/// Single-quoted string, `''` escapes a quote
fn string_literal(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(
            many0(alt((
                map(is_not("'"), |s: &str| s.to_string()),
                value("'".to_string(), tag("''")),
            ))),
            |parts| parts.concat(),
        ),
        char('\''),
    )(input)
}

fn quoted_ident(input: &str) -> IResult<&str, String> {
    alt((
        delimited(
            char('"'),
            map(take_until("\""), |s: &str| s.to_string()),
            char('"'),
        ),
        delimited(
            char('`'),
            map(take_until("`"), |s: &str| s.to_string()),
            char('`'),
        ),
    ))(input)
}

fn operator(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Lte, tag("<=")),
        value(Token::Gte, tag(">=")),
        value(Token::NotEq, tag("<>")),
        value(Token::NotEq, tag("!=")),
        value(Token::Eq, tag("==")),
        value(Token::Eq, char('=')),
        value(Token::Lt, char('<')),
        value(Token::Gt, char('>')),
    ))(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Star, char('*')),
        value(Token::Comma, char(',')),
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::Slash, char('/')),
        value(Token::Semicolon, char(';')),
    ))(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        map(string_literal, Token::Str),
        map(quoted_ident, Token::QuotedIdent),
        map(unit_value, Token::Ident),
        map(number, |s: &str| Token::Number(s.to_string())),
        map(word, Token::Ident),
        operator,
        punctuation,
    ))(input)
}

/// Split SQL text into tokens with byte offsets
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        let (after_ws, _) = multispace0::<&str, nom::error::Error<&str>>(rest)
            .map_err(|_| Error::syntax("invalid whitespace", input.len() - rest.len()))?;
        rest = after_ws;
        if rest.is_empty() {
            break;
        }

        let offset = input.len() - rest.len();
        match token(rest) {
            Ok((remaining, tok)) => {
                tokens.push(Spanned { token: tok, offset });
                rest = remaining;
            }
            Err(_) => {
                let message = match rest.chars().next() {
                    Some('\'') => "unterminated string literal".to_string(),
                    Some('"') | Some('`') => "unterminated quoted identifier".to_string(),
                    Some(c) => format!("unexpected character '{}'", c),
                    None => "unexpected end of input".to_string(),
                };
                return Err(Error::syntax(message, offset));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_tokenize_simple_select() {
        let tokens = kinds("SELECT COUNT(*) FROM bank");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("SELECT".to_string()),
                Token::Ident("COUNT".to_string()),
                Token::LParen,
                Token::Star,
                Token::RParen,
                Token::Ident("FROM".to_string()),
                Token::Ident("bank".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_index_with_type() {
        let tokens = kinds("from elasticsearch-sql_test_index/account");
        assert_eq!(tokens[1], Token::Ident("elasticsearch-sql_test_index".to_string()));
        assert_eq!(tokens[2], Token::Slash);
        assert_eq!(tokens[3], Token::Ident("account".to_string()));
    }

    #[test]
    fn test_tokenize_named_arguments() {
        let tokens = kinds("date_histogram(field='insert_time','interval'='1.5h')");
        assert_eq!(tokens[2], Token::Ident("field".to_string()));
        assert_eq!(tokens[3], Token::Eq);
        assert_eq!(tokens[4], Token::Str("insert_time".to_string()));
        assert_eq!(tokens[6], Token::Str("interval".to_string()));
        assert_eq!(tokens[8], Token::Str("1.5h".to_string()));
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = kinds("20, -3, 1.25");
        assert_eq!(tokens[0], Token::Number("20".to_string()));
        assert_eq!(tokens[2], Token::Number("-3".to_string()));
        assert_eq!(tokens[4], Token::Number("1.25".to_string()));
    }

    #[test]
    fn test_tokenize_unit_value() {
        let tokens = kinds("interval=1h");
        assert_eq!(tokens[2], Token::Ident("1h".to_string()));
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = kinds("a <= 1 AND b <> 2 AND c != 3 AND d >= 4");
        assert!(tokens.contains(&Token::Lte));
        assert!(tokens.contains(&Token::Gte));
        assert_eq!(tokens.iter().filter(|t| **t == Token::NotEq).count(), 2);
    }

    #[test]
    fn test_tokenize_escaped_quote() {
        let tokens = kinds("'it''s'");
        assert_eq!(tokens, vec![Token::Str("it's".to_string())]);
    }

    #[test]
    fn test_tokenize_empty_string() {
        let tokens = kinds("'' , 'x'");
        assert_eq!(tokens[0], Token::Str(String::new()));
        assert_eq!(tokens[2], Token::Str("x".to_string()));
    }

    #[test]
    fn test_tokenize_quoted_identifiers() {
        let tokens = kinds("\"first name\", `last name`");
        assert_eq!(tokens[0], Token::QuotedIdent("first name".to_string()));
        assert_eq!(tokens[2], Token::QuotedIdent("last name".to_string()));
    }

    #[test]
    fn test_offsets() {
        let tokens = tokenize("SELECT  age").unwrap();
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].offset, 8);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("SELECT 'abc").unwrap_err();
        match err {
            Error::Syntax { message, position } => {
                assert!(message.contains("unterminated"));
                assert_eq!(position, 7);
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(tokenize("SELECT #"), Err(Error::Syntax { .. })));
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        assert!(Token::Ident("SeLeCt".to_string()).is_keyword("select"));
        assert!(!Token::Str("select".to_string()).is_keyword("select"));
    }
}
