mod time_utils;

pub use time_utils::*;

#[cfg(test)]
pub mod testing;
