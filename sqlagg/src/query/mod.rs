//! SQL dialect: syntax tree and parser

pub mod ast;
pub mod parser;

pub use ast::{
    AggregateCall, BucketCall, CallArgument, ColumnRef, CompareOp, Condition, GroupTerm,
    HavingCondition, Literal, OrderItem, Query, SelectItem, SortDirection, Source,
};
pub use parser::{parse, SqlParser};
