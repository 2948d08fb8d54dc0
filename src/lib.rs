#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod envelope;
pub mod error;
pub mod queue;
pub mod subscription;
pub mod ws;

use crate::error::Error;

pub use client::Client;

pub type Result<T> = std::result::Result<T, Error>;
