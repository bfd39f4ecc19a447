pub mod audit;
pub mod classify;
pub mod config;
pub mod context;
pub mod decrypt;
pub mod encrypt;
pub mod error;
pub mod event;
pub mod finalize;
pub mod handlers;
pub mod pipeline;

#[cfg(test)]
pub mod test_utils;
