//! Network layer for DVR
//!
//! The session only talks to the network through [`RealClient`].

mod client;

pub use client::{Exchange, HyperClient, RealClient};
