//! Switchboard — operate many accounts on one messaging network.
//!
//! Each account is an [`instance::Instance`] with its own connection state
//! machine, driven through a [`registry::Registry`]. Two transport families
//! sit behind one [`transport::TransportAdapter`] trait: an embedded protocol
//! runtime reached over localhost, and a remote gateway service. Inbound
//! provider events are normalized into a canonical envelope and fanned out to
//! webhook subscribers.
//!
//! See `DESIGN.md` for the component map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod logging;
pub mod logring;
pub mod normalizer;
pub mod reconnect;
pub mod registry;
pub mod store;
pub mod transport;
pub mod types;
