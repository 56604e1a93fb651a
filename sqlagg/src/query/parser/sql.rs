use super::tokenizer::{tokenize, Spanned, Token};
use crate::error::{Error, Result};
use crate::query::ast::*;

/// Words that end a select item or clause and therefore cannot be bare aliases
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "BY", "AS", "AND", "OR",
    "NOT", "ASC", "DESC", "DISTINCT", "IN", "LIKE", "BETWEEN", "IS", "NULL",
];

/// Function call as it appears in the source, before it is typed as an
/// aggregate or a bucketing function
struct RawCall {
    name: String,
    offset: usize,
    distinct: bool,
    argument: Option<CallArgument>,
    named: Vec<(String, Literal)>,
    positional: Vec<Literal>,
}

impl RawCall {
    fn set_field(&mut self, word: String, offset: usize) -> Result<()> {
        if self.argument.is_some() {
            return Err(Error::syntax(
                format!("unexpected identifier '{}' in {}()", word, self.name),
                offset,
            ));
        }
        self.argument = Some(CallArgument::Field(word));
        Ok(())
    }

    fn into_aggregate(self) -> AggregateCall {
        AggregateCall {
            function: self.name,
            argument: self.argument,
            distinct: self.distinct,
            parameters: self.named,
            positional: self.positional,
            alias: None,
        }
    }

    fn into_bucket(self) -> Result<BucketCall> {
        if self.distinct {
            return Err(Error::syntax(
                format!("DISTINCT is not allowed in {}()", self.name),
                self.offset,
            ));
        }

        let mut field = match self.argument {
            Some(CallArgument::Field(f)) => Some(f),
            Some(CallArgument::Star) => {
                return Err(Error::syntax(
                    format!("'*' is not allowed in {}()", self.name),
                    self.offset,
                ))
            }
            None => None,
        };

        let mut parameters = Vec::new();
        for (key, value) in self.named {
            if key.eq_ignore_ascii_case("field") {
                if field.is_some() {
                    return Err(Error::syntax(
                        format!("field given twice in {}()", self.name),
                        self.offset,
                    ));
                }
                field = Some(value.render());
            } else {
                parameters.push((key, value));
            }
        }

        Ok(BucketCall {
            function: self.name,
            field,
            parameters,
            boundaries: self.positional,
        })
    }
}

/// Deepest nesting of parentheses and NOT in WHERE or HAVING
pub const MAX_NESTING: usize = 128;

/// Recursive descent parser for the supported SELECT dialect
pub struct SqlParser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl SqlParser {
    /// Parse a SQL string into a [`Query`]
    pub fn parse(sql: &str) -> Result<Query> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(Error::syntax("empty query", 0));
        }

        let mut parser = Self {
            tokens: tokenize(sql)?,
            pos: 0,
            end: sql.len(),
            depth: 0,
        };
        parser.parse_query()
    }

    fn parse_query(&mut self) -> Result<Query> {
        self.expect_keyword("SELECT")?;
        let select = self.parse_select_list()?;

        if !self.match_keyword("FROM") {
            return Err(self.error("missing FROM clause"));
        }
        let source = self.parse_source()?;

        let filter = if self.match_keyword("WHERE") {
            Some(self.parse_or()?)
        } else {
            None
        };

        let group_by = if self.match_keyword("GROUP") {
            self.expect_keyword("BY")?;
            self.parse_group_list()?
        } else {
            Vec::new()
        };

        let having = if self.match_keyword("HAVING") {
            Some(self.parse_having_or()?)
        } else {
            None
        };

        let order_by = if self.match_keyword("ORDER") {
            self.expect_keyword("BY")?;
            self.parse_order_list()?
        } else {
            Vec::new()
        };

        let limit = if self.match_keyword("LIMIT") {
            Some(self.parse_limit()?)
        } else {
            None
        };

        self.match_token(&Token::Semicolon);
        if let Some(tok) = self.peek() {
            return Err(self.error(format!("unexpected token '{}'", tok.describe())));
        }

        Ok(Query {
            source,
            select,
            filter,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    // ------------------------------------------------------------------
    // SELECT list
    // ------------------------------------------------------------------

    fn parse_select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while self.match_token(&Token::Comma) {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.match_token(&Token::Star) {
            return Ok(SelectItem::Star);
        }

        if self.at_call() {
            let mut call = self.parse_call()?.into_aggregate();
            call.alias = self.parse_alias()?;
            return Ok(SelectItem::Aggregate(call));
        }

        match self.peek() {
            Some(Token::Ident(_)) | Some(Token::QuotedIdent(_)) => {
                let name = self.parse_name()?;
                let alias = self.parse_alias()?;
                Ok(SelectItem::Field { name, alias })
            }
            Some(tok) => Err(self.error(format!("expected select item, found '{}'", tok.describe()))),
            None => Err(self.error("expected select item")),
        }
    }

    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.match_keyword("AS") {
            return match self.advance() {
                Some(Token::Ident(s)) | Some(Token::QuotedIdent(s)) | Some(Token::Str(s)) => {
                    Ok(Some(s))
                }
                _ => Err(self.error_at_previous("expected alias after AS")),
            };
        }

        match self.peek() {
            Some(Token::Ident(word)) if !is_reserved(word) => {
                let alias = bare_field(word.clone(), self.offset())?;
                self.pos += 1;
                Ok(Some(alias))
            }
            Some(Token::QuotedIdent(word)) => {
                let alias = word.clone();
                self.pos += 1;
                Ok(Some(alias))
            }
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Function calls
    // ------------------------------------------------------------------

    fn at_call(&self) -> bool {
        matches!(self.peek(), Some(Token::Ident(_)))
            && matches!(self.peek_at(1), Some(Token::LParen))
    }

    fn parse_call(&mut self) -> Result<RawCall> {
        let offset = self.offset();
        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return Err(Error::syntax("expected function name", offset)),
        };
        self.expect_token(&Token::LParen)?;

        let mut call = RawCall {
            name,
            offset,
            distinct: false,
            argument: None,
            named: Vec::new(),
            positional: Vec::new(),
        };

        if self.match_token(&Token::RParen) {
            return Ok(call);
        }

        if self.match_keyword("DISTINCT") {
            call.distinct = true;
            match self.peek() {
                Some(Token::Ident(_)) | Some(Token::QuotedIdent(_)) => {}
                _ => return Err(self.error("expected field after DISTINCT")),
            }
        }

        loop {
            self.parse_call_argument(&mut call)?;
            if self.match_token(&Token::Comma) {
                continue;
            }
            if self.match_token(&Token::RParen) {
                break;
            }
            return match self.peek() {
                Some(tok) => Err(self.error(format!(
                    "expected ',' or ')' in {}(), found '{}'",
                    call.name,
                    tok.describe()
                ))),
                None => Err(self.error(format!("unbalanced parentheses in {}()", call.name))),
            };
        }

        Ok(call)
    }

    fn parse_call_argument(&mut self, call: &mut RawCall) -> Result<()> {
        // key=value, key may be a bare word or a quoted string
        if matches!(self.peek_at(1), Some(Token::Eq)) {
            let key = match self.peek() {
                Some(Token::Ident(k)) | Some(Token::QuotedIdent(k)) | Some(Token::Str(k)) => {
                    k.clone()
                }
                Some(tok) => {
                    return Err(self.error(format!("invalid argument name '{}'", tok.describe())))
                }
                None => return Err(self.error("unexpected end of input")),
            };
            self.pos += 2;
            let value = self.parse_parameter_value()?;
            call.named.push((key, value));
            return Ok(());
        }

        let offset = self.offset();
        match self.advance() {
            Some(Token::Star) => {
                if call.argument.is_some() || !call.positional.is_empty() || call.distinct {
                    return Err(Error::syntax("'*' must be the only argument", offset));
                }
                call.argument = Some(CallArgument::Star);
                Ok(())
            }
            Some(Token::Ident(word)) => call.set_field(bare_field(word, offset)?, offset),
            Some(Token::QuotedIdent(word)) => call.set_field(word, offset),
            Some(Token::Number(n)) => {
                call.positional.push(Literal::Number(n));
                Ok(())
            }
            Some(Token::Str(s)) => {
                call.positional.push(Literal::String(s));
                Ok(())
            }
            Some(tok) => Err(Error::syntax(
                format!("unexpected '{}' in {}()", tok.describe(), call.name),
                offset,
            )),
            None => Err(Error::syntax(
                format!("unbalanced parentheses in {}()", call.name),
                offset,
            )),
        }
    }

    fn parse_parameter_value(&mut self) -> Result<Literal> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Literal::Number(n)),
            Some(Token::Str(s)) | Some(Token::QuotedIdent(s)) => Ok(Literal::String(s)),
            Some(Token::Ident(word)) => Ok(bool_literal(&word).unwrap_or(Literal::String(word))),
            _ => Err(Error::syntax("expected argument value after '='", offset)),
        }
    }

    // ------------------------------------------------------------------
    // FROM
    // ------------------------------------------------------------------

    fn parse_source(&mut self) -> Result<Source> {
        let index = if self.match_token(&Token::Star) {
            "*".to_string()
        } else {
            self.parse_index_name()?
        };
        let doc_type = if self.match_token(&Token::Slash) {
            Some(self.parse_index_name()?)
        } else {
            None
        };
        Ok(Source { index, doc_type })
    }

    // ------------------------------------------------------------------
    // GROUP BY / ORDER BY / LIMIT
    // ------------------------------------------------------------------

    fn parse_group_list(&mut self) -> Result<Vec<GroupTerm>> {
        let mut terms = vec![self.parse_group_term()?];
        while self.match_token(&Token::Comma) {
            terms.push(self.parse_group_term()?);
        }
        Ok(terms)
    }

    fn parse_group_term(&mut self) -> Result<GroupTerm> {
        if self.at_call() {
            let call = self.parse_call()?.into_bucket()?;
            return Ok(GroupTerm::BucketFunction(call));
        }
        Ok(GroupTerm::PlainField(self.parse_name()?))
    }

    fn parse_order_list(&mut self) -> Result<Vec<OrderItem>> {
        let mut items = Vec::new();
        loop {
            let target = self.parse_column_ref()?;
            let direction = if self.match_keyword("DESC") {
                SortDirection::Desc
            } else {
                self.match_keyword("ASC");
                SortDirection::Asc
            };
            items.push(OrderItem { target, direction });
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_column_ref(&mut self) -> Result<ColumnRef> {
        if self.at_call() {
            return Ok(ColumnRef::Aggregate(self.parse_call()?.into_aggregate()));
        }
        if let Some(Token::Str(s)) = self.peek() {
            let name = s.clone();
            self.pos += 1;
            return Ok(ColumnRef::Name(name));
        }
        Ok(ColumnRef::Name(self.parse_name()?))
    }

    fn parse_limit(&mut self) -> Result<usize> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => n.parse::<usize>().map_err(|_| {
                Error::syntax(
                    format!("LIMIT expects a non-negative integer, found '{}'", n),
                    offset,
                )
            }),
            _ => Err(Error::syntax("LIMIT expects a non-negative integer", offset)),
        }
    }

    // ------------------------------------------------------------------
    // WHERE
    // Precedence: OR (lowest) > AND > NOT > primary (highest)
    // ------------------------------------------------------------------

    fn parse_or(&mut self) -> Result<Condition> {
        let mut children = vec![self.parse_and()?];
        while self.match_keyword("OR") {
            children.push(self.parse_and()?);
        }
        Ok(collapse(children, Condition::Or))
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut children = vec![self.parse_not()?];
        while self.match_keyword("AND") {
            children.push(self.parse_not()?);
        }
        Ok(collapse(children, Condition::And))
    }

    fn parse_not(&mut self) -> Result<Condition> {
        if self.match_keyword("NOT") {
            return self.nested(|p| Ok(p.parse_not()?.negate()));
        }
        if self.match_token(&Token::LParen) {
            return self.nested(|p| {
                let inner = p.parse_or()?;
                p.expect_token(&Token::RParen)?;
                Ok(inner)
            });
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Condition> {
        let field = self.parse_name()?;

        if let Some(op) = self.match_compare_op() {
            if matches!(self.peek(), Some(tok) if tok.is_keyword("NULL")) {
                return Err(self.error(format!("use IS NULL to compare '{}' with NULL", field)));
            }
            let value = self.parse_literal()?;
            return Ok(Condition::Compare { field, op, value });
        }

        if self.match_keyword("IS") {
            let negated = self.match_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Condition::IsNull { field, negated });
        }

        let negated = self.match_keyword("NOT");

        if self.match_keyword("LIKE") {
            let offset = self.offset();
            return match self.advance() {
                Some(Token::Str(pattern)) => Ok(Condition::Like {
                    field,
                    pattern,
                    negated,
                }),
                _ => Err(Error::syntax("LIKE expects a string pattern", offset)),
            };
        }

        if self.match_keyword("IN") {
            self.expect_token(&Token::LParen)?;
            let mut values = vec![self.parse_literal()?];
            while self.match_token(&Token::Comma) {
                values.push(self.parse_literal()?);
            }
            self.expect_token(&Token::RParen)?;
            return Ok(Condition::In {
                field,
                values,
                negated,
            });
        }

        if self.match_keyword("BETWEEN") {
            let low = self.parse_literal()?;
            self.expect_keyword("AND")?;
            let high = self.parse_literal()?;
            return Ok(Condition::Between {
                field,
                low,
                high,
                negated,
            });
        }

        Err(self.error(format!("expected comparison after '{}'", field)))
    }

    fn match_compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::Lt => CompareOp::Lt,
            Token::Lte => CompareOp::Lte,
            Token::Gt => CompareOp::Gt,
            Token::Gte => CompareOp::Gte,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Literal::Number(n)),
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::Ident(word)) => bool_literal(&word).ok_or_else(|| {
                Error::syntax(format!("expected literal, found '{}'", word), offset)
            }),
            Some(tok) => Err(Error::syntax(
                format!("expected literal, found '{}'", tok.describe()),
                offset,
            )),
            None => Err(Error::syntax("expected literal", offset)),
        }
    }

    // ------------------------------------------------------------------
    // HAVING
    // ------------------------------------------------------------------

    fn parse_having_or(&mut self) -> Result<HavingCondition> {
        let mut children = vec![self.parse_having_and()?];
        while self.match_keyword("OR") {
            children.push(self.parse_having_and()?);
        }
        Ok(collapse(children, HavingCondition::Or))
    }

    fn parse_having_and(&mut self) -> Result<HavingCondition> {
        let mut children = vec![self.parse_having_not()?];
        while self.match_keyword("AND") {
            children.push(self.parse_having_not()?);
        }
        Ok(collapse(children, HavingCondition::And))
    }

    fn parse_having_not(&mut self) -> Result<HavingCondition> {
        if self.match_keyword("NOT") {
            return self.nested(|p| Ok(HavingCondition::Not(Box::new(p.parse_having_not()?))));
        }
        if self.match_token(&Token::LParen) {
            return self.nested(|p| {
                let inner = p.parse_having_or()?;
                p.expect_token(&Token::RParen)?;
                Ok(inner)
            });
        }

        let target = self.parse_column_ref()?;
        let op = self
            .match_compare_op()
            .ok_or_else(|| self.error("expected comparison operator in HAVING"))?;
        let value = self.parse_literal()?;
        Ok(HavingCondition::Compare { target, op, value })
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    /// Field or alias; bare names may not contain `-` or `*`
    fn parse_name(&mut self) -> Result<String> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Ident(word)) if !is_reserved(&word) => bare_field(word, offset),
            Some(Token::QuotedIdent(word)) => Ok(word),
            Some(tok) => Err(Error::syntax(
                format!("expected name, found '{}'", tok.describe()),
                offset,
            )),
            None => Err(Error::syntax("expected name, found end of input", offset)),
        }
    }

    /// Index or type name in FROM, where `-` and `*` are allowed bare
    fn parse_index_name(&mut self) -> Result<String> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Ident(word)) if !is_reserved(&word) => Ok(word),
            Some(Token::QuotedIdent(word)) => Ok(word),
            Some(tok) => Err(Error::syntax(
                format!("expected name, found '{}'", tok.describe()),
                offset,
            )),
            None => Err(Error::syntax("expected name, found end of input", offset)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.end)
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<()> {
        if self.match_token(expected) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(|t| format!("'{}'", t.describe()))
            .unwrap_or_else(|| "end of input".to_string());
        Err(self.error(format!("expected '{}', found {}", expected.describe(), found)))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.match_keyword(keyword) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(|t| format!("'{}'", t.describe()))
            .unwrap_or_else(|| "end of input".to_string());
        Err(self.error(format!("expected {}, found {}", keyword, found)))
    }

    /// Run `f` one nesting level deeper; fails at the opening token once
    /// [`MAX_NESTING`] is reached
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_at_previous(format!(
                "conditions nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::syntax(message, self.offset())
    }

    fn error_at_previous(&self, message: impl Into<String>) -> Error {
        let offset = self
            .pos
            .checked_sub(1)
            .and_then(|p| self.tokens.get(p))
            .map(|s| s.offset)
            .unwrap_or(self.end);
        Error::syntax(message, offset)
    }
}

fn bare_field(word: String, offset: usize) -> Result<String> {
    if word.contains(['-', '*']) {
        return Err(Error::syntax(
            format!("'{}' is not a valid name; quote names containing '-' or '*'", word),
            offset,
        ));
    }
    Ok(word)
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

fn bool_literal(word: &str) -> Option<Literal> {
    if word.eq_ignore_ascii_case("true") {
        Some(Literal::Bool(true))
    } else if word.eq_ignore_ascii_case("false") {
        Some(Literal::Bool(false))
    } else {
        None
    }
}

fn collapse<T>(mut children: Vec<T>, combine: fn(Vec<T>) -> T) -> T {
    if children.len() == 1 {
        children.remove(0)
    } else {
        combine(children)
    }
}
