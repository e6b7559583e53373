pub mod commands;
pub mod concurrency;
pub mod config;
pub mod filter;
pub mod platform;
pub mod repo;
pub mod rewrite;
pub mod snapshot;
pub mod storage;
pub mod tree;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
