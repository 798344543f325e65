pub mod api;
pub mod error;
pub mod ids;
pub mod model;
pub mod time;
pub mod value;

pub use api::*;
pub use error::{SysdbError, SysdbResult};
pub use ids::*;
pub use model::*;
pub use time::*;
pub use value::*;
