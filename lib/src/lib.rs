#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(async_fn_in_trait)]

pub mod asset;
pub mod config;
pub mod configure;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod resource;
pub mod secrets;

pub use self::error::Error;
