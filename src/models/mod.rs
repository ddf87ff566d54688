pub mod encryption_key;

pub use encryption_key::*;
