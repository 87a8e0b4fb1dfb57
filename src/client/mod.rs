pub mod druid;
pub mod retry;
pub mod schema_cache;

pub use druid::{ClientConfig, ClientError, DruidClient, RawResult};
pub use retry::RetryPolicy;
pub use schema_cache::{CacheStats, SchemaCache};
