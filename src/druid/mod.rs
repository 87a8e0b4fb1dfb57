pub mod compiler;
pub mod context;
pub mod filter;
pub mod layout;
pub mod native;

pub use compiler::{compile, CompileError, CompileOptions, CompiledQuery};
pub use layout::{ColumnSource, LayoutColumn, ResponseShape, ResultLayout};
pub use native::{NativeQuery, QueryContext};
