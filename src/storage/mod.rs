pub mod sqlite;

pub use sqlite::{Storage, ALL_SOURCES};
