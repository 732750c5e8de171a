pub mod remote;
pub mod repository;

pub use remote::*;
pub use repository::*;
