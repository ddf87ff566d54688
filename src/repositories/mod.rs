pub mod key_repo;
pub mod memory;

pub use key_repo::*;
pub use memory::*;
