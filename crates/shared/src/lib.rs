//! Wire protocol types shared by the parley client and any server speaking it.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
