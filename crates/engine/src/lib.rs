//! Remote debugger protocol engine, client and debugger-module adapter.

pub mod config;
pub use config::*;

pub mod debmod;
pub use debmod::*;

pub mod error;
pub use error::*;

pub mod rpc;
pub use rpc::*;
