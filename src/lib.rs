pub mod auth;
pub mod config;
pub mod pose;
pub mod posture;
pub mod protocol;
pub mod recorder;
pub mod server;
pub mod session;
pub mod worker;

#[cfg(test)]
mod test_support;
