//! Evaluator for `bucket_selector` scripts
//!
//! Supports the expressions the compiler emits: comparisons between
//! `params.<name>` and numeric literals, joined with `&&`, `||`, `!` and
//! parentheses. Anything else is rejected.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Param(String),
    Number(f64),
    Op(&'static str),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(script: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = script.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Tok::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Tok::Or);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Tok::Op("!="));
                i += 2;
            }
            '!' => {
                tokens.push(Tok::Not);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Tok::Op("=="));
                i += 2;
            }
            '<' | '>' => {
                let op = match (c, next) {
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                tokens.push(Tok::Op(op));
                i += op.len();
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E'))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Tok::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '.'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let name = word
                    .strip_prefix("params.")
                    .ok_or_else(|| format!("unsupported identifier '{}'", word))?;
                tokens.push(Tok::Param(name.to_string()));
            }
            other => return Err(format!("unsupported character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Eval<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    params: &'a HashMap<String, Option<f64>>,
}

impl Eval<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, String> {
        match self.peek() {
            Some(Tok::Not) => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let value = self.or()?;
                match self.bump() {
                    Some(Tok::RParen) => Ok(value),
                    _ => Err("missing ')'".to_string()),
                }
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<bool, String> {
        let lhs = self.operand()?;
        let op = match self.bump() {
            Some(Tok::Op(op)) => op,
            other => return Err(format!("expected comparison, found {:?}", other)),
        };
        let rhs = self.operand()?;

        // A missing metric value never satisfies a comparison
        let (Some(l), Some(r)) = (lhs, rhs) else {
            return Ok(false);
        };
        Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            "<" => l < r,
            "<=" => l <= r,
            ">" => l > r,
            _ => l >= r,
        })
    }

    fn operand(&mut self) -> Result<Option<f64>, String> {
        match self.bump() {
            Some(Tok::Number(n)) => Ok(Some(n)),
            Some(Tok::Param(name)) => self
                .params
                .get(&name)
                .copied()
                .ok_or_else(|| format!("unknown parameter '{}'", name)),
            other => Err(format!("expected operand, found {:?}", other)),
        }
    }
}

/// Evaluate a selector script against resolved bucket paths
pub fn evaluate(script: &str, params: &HashMap<String, Option<f64>>) -> Result<bool, String> {
    let mut eval = Eval {
        tokens: lex(script)?,
        pos: 0,
        params,
    };
    let value = eval.or()?;
    if eval.pos != eval.tokens.len() {
        return Err(format!("unexpected trailing input in script '{}'", script));
    }
    Ok(value)
}
