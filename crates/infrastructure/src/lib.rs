pub mod database;
pub mod remote;

pub use database::*;
pub use remote::*;
