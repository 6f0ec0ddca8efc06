pub mod proxy;
pub mod query;

pub use proxy::*;
pub use query::*;
