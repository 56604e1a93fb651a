use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed SELECT statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub source: Source,
    pub select: Vec<SelectItem>,
    pub filter: Option<Condition>,
    pub group_by: Vec<GroupTerm>,
    pub having: Option<HavingCondition>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<usize>,
}

impl Query {
    /// True when the query produces aggregations rather than hits
    pub fn is_aggregation(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .select
                .iter()
                .any(|item| matches!(item, SelectItem::Aggregate(_)))
    }
}

/// `FROM index[/type]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub index: String,
    pub doc_type: Option<String>,
}

impl Source {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
        }
    }

    pub fn with_type(index: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: Some(doc_type.into()),
        }
    }
}

/// Literal token, numbers keep their source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(String),
    String(String),
    Bool(bool),
}

impl Literal {
    pub fn number(raw: impl Into<String>) -> Self {
        Literal::Number(raw.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Literal::String(s.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Number(raw) => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    /// Source-like rendering used in display names and pass-through values
    pub fn render(&self) -> String {
        match self {
            Literal::Number(raw) => raw.clone(),
            Literal::String(s) => s.clone(),
            Literal::Bool(b) => b.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Number(raw) => raw
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| raw.parse::<f64>().map(Value::from))
                .unwrap_or_else(|_| Value::String(raw.clone())),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }
}

/// One entry of the SELECT list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `SELECT *`
    Star,

    /// Plain field reference
    Field { name: String, alias: Option<String> },

    /// Aggregate function call
    Aggregate(AggregateCall),
}

impl SelectItem {
    pub fn field(name: impl Into<String>) -> Self {
        SelectItem::Field {
            name: name.into(),
            alias: None,
        }
    }

    /// Result lookup key: the alias if given, else the canonical rendering
    pub fn display_name(&self) -> String {
        match self {
            SelectItem::Star => "*".to_string(),
            SelectItem::Field { name, alias } => alias.clone().unwrap_or_else(|| name.clone()),
            SelectItem::Aggregate(call) => call.display_name(),
        }
    }
}

/// Target of an aggregate call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArgument {
    Star,
    Field(String),
}

/// `FUNC([DISTINCT] arg, key=value, literal, ...) [AS alias]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCall {
    /// Function name as written
    pub function: String,
    pub argument: Option<CallArgument>,
    pub distinct: bool,
    /// Keyword arguments in source order
    pub parameters: Vec<(String, Literal)>,
    /// Bare literal arguments in source order
    pub positional: Vec<Literal>,
    pub alias: Option<String>,
}

impl AggregateCall {
    pub fn new(function: impl Into<String>, argument: Option<CallArgument>) -> Self {
        Self {
            function: function.into(),
            argument,
            distinct: false,
            parameters: Vec::new(),
            positional: Vec::new(),
            alias: None,
        }
    }

    /// `FUNC(field)`
    pub fn on_field(function: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(function, Some(CallArgument::Field(field.into())))
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn field(&self) -> Option<&str> {
        match &self.argument {
            Some(CallArgument::Field(f)) => Some(f),
            _ => None,
        }
    }

    /// Canonical rendering, e.g. `COUNT(DISTINCT age)` or `TOPHITS(size=3,age=desc)`
    pub fn canonical_name(&self) -> String {
        let mut parts = Vec::new();
        match &self.argument {
            Some(CallArgument::Star) => parts.push("*".to_string()),
            Some(CallArgument::Field(f)) if self.distinct => parts.push(format!("DISTINCT {}", f)),
            Some(CallArgument::Field(f)) => parts.push(f.clone()),
            None => {}
        }
        for (key, value) in &self.parameters {
            parts.push(format!("{}={}", key, value.render()));
        }
        for value in &self.positional {
            parts.push(value.render());
        }
        format!("{}({})", self.function.to_uppercase(), parts.join(","))
    }

    pub fn display_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.canonical_name())
    }
}

/// One GROUP BY term; the first term is the outermost bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupTerm {
    PlainField(String),
    BucketFunction(BucketCall),
}

/// Bucketing pseudo-function such as `range(age, 20, 25, 30)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCall {
    /// Function name as written
    pub function: String,
    pub field: Option<String>,
    pub parameters: Vec<(String, Literal)>,
    pub boundaries: Vec<Literal>,
}

/// Reference to a result column from ORDER BY or HAVING
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnRef {
    /// Alias, display name or field
    Name(String),
    /// Restated aggregate expression
    Aggregate(AggregateCall),
}

impl ColumnRef {
    /// Name to match against compiled display names
    pub fn lookup_name(&self) -> String {
        match self {
            ColumnRef::Name(n) => n.clone(),
            ColumnRef::Aggregate(call) => call.canonical_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub target: ColumnRef,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// WHERE predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    Like {
        field: String,
        pattern: String,
        negated: bool,
    },
    In {
        field: String,
        values: Vec<Literal>,
        negated: bool,
    },
    Between {
        field: String,
        low: Literal,
        high: Literal,
        negated: bool,
    },
    IsNull {
        field: String,
        negated: bool,
    },
}

impl Condition {
    /// Negate
    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }
}

/// HAVING predicate over aggregate values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HavingCondition {
    And(Vec<HavingCondition>),
    Or(Vec<HavingCondition>),
    Not(Box<HavingCondition>),
    Compare {
        target: ColumnRef,
        op: CompareOp,
        value: Literal,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_count_star() {
        let call = AggregateCall::new("count", Some(CallArgument::Star));
        assert_eq!(call.canonical_name(), "COUNT(*)");
        assert_eq!(call.display_name(), "COUNT(*)");
    }

    #[test]
    fn test_canonical_distinct() {
        let call = AggregateCall::on_field("count", "age").distinct();
        assert_eq!(call.canonical_name(), "COUNT(DISTINCT age)");
    }

    #[test]
    fn test_alias_wins_over_canonical() {
        let call = AggregateCall::new("COUNT", Some(CallArgument::Star)).alias("mycount");
        assert_eq!(call.display_name(), "mycount");
        assert_eq!(call.canonical_name(), "COUNT(*)");
    }

    #[test]
    fn test_canonical_with_parameters() {
        let mut call = AggregateCall::new("topHits", None);
        call.parameters.push(("size".to_string(), Literal::number("3")));
        call.parameters.push(("age".to_string(), Literal::string("desc")));
        assert_eq!(call.canonical_name(), "TOPHITS(size=3,age=desc)");
    }

    #[test]
    fn test_literal_to_json() {
        assert_eq!(Literal::number("20").to_json(), Value::from(20));
        assert_eq!(Literal::number("1.5").to_json(), Value::from(1.5));
        assert_eq!(Literal::string("now-8d").to_json(), Value::from("now-8d"));
        assert_eq!(Literal::Bool(true).to_json(), Value::Bool(true));
    }

    #[test]
    fn test_is_aggregation() {
        let query = Query {
            source: Source::new("bank"),
            select: vec![SelectItem::field("gender")],
            filter: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
        };
        assert!(!query.is_aggregation());

        let grouped = Query {
            group_by: vec![GroupTerm::PlainField("gender".to_string())],
            ..query
        };
        assert!(grouped.is_aggregation());
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!(SortDirection::parse("DESC"), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("asc"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("sideways"), None);
    }
}
