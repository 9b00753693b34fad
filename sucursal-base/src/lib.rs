mod error;
mod ids;

pub use error::{err, fatal, protocol, store, transport, validation, Error, ErrorKind, Result};
pub use ids::{BranchId, RowId};
