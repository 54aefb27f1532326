pub mod error;
pub mod result;
pub mod store;

pub use error::*;
pub use result::*;
pub use store::*;
