pub mod cached;
pub mod memory;
pub mod traits;

#[cfg(test)]
pub mod mock;
