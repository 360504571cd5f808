pub mod capability;
pub mod driver;
pub mod error;
pub mod metric;
pub mod query;
pub mod sample;
pub mod types;

pub use capability::*;
pub use driver::*;
pub use error::*;
pub use metric::*;
pub use query::*;
pub use sample::*;
pub use types::*;
