pub mod builders;
pub mod core;
pub mod utils;

#[cfg(test)]
mod tests;
