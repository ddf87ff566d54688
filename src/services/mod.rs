pub mod cache_warmer;
pub mod dek_cache;
pub mod envelope;
pub mod field_cipher;
pub mod key_lifecycle;
pub mod phi_service;

pub use cache_warmer::*;
pub use dek_cache::*;
pub use envelope::*;
pub use field_cipher::*;
pub use key_lifecycle::*;
pub use phi_service::*;
