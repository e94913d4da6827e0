pub mod error;

pub use self::error::*;
