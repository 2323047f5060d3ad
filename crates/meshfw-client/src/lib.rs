#![doc = include_str!("../README.md")]

mod client;
mod error;

pub use client::{ClientAuth, ClientConfig, ReqwestConnector, ServiceClient};
pub use error::ClientError;
