pub mod config;
pub mod driver;
pub mod error;
pub mod plugin;
pub mod proxy;
pub mod server;
pub mod state;
pub mod web;

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;
