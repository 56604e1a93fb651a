pub mod backend;
pub mod client;
pub mod compiler;
pub mod config;
pub mod error;
pub mod query;
pub mod request;
pub mod results;

pub use backend::{BackendError, ExecutionBackend, MemoryBackend};
pub use client::SqlClient;
pub use compiler::{Column, CompiledQuery, CompilerOptions, SqlCompiler};
pub use config::Config;
pub use error::{Error, Result};
pub use request::SearchRequest;
pub use results::{QueryOutput, ResultReader, ResultRow, ResultValue, Table};
