pub mod error;
pub mod object_id;

pub use error::{Result, StrataError};
pub use object_id::ObjectId;
