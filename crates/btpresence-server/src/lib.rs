//! # btpresence-server
//!
//! HTTP host for the btpresence Bluetooth presence tracker.
//!
//! Provides the host-side collaborators the tracker reports into (entity
//! state store, presence registry, service registry) and the REST API over
//! them.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod presence;
pub mod radio;
pub mod services;
pub mod state;
