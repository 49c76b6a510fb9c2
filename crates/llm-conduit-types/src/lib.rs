#![allow(clippy::result_large_err)]

pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use config::*;
pub use error::*;
pub use message::*;
pub use provider::*;
pub use request::*;
pub use response::*;
pub use stream::*;
pub use tool::*;
