#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod chat;
#[cfg(feature = "realtime")]
pub mod client;
pub mod entity;
pub mod error;
#[cfg(feature = "realtime")]
pub mod realtime;
pub mod rest;
pub(crate) mod serde_helpers;
pub mod types;

#[cfg(feature = "realtime")]
pub use client::Client;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
