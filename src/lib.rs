//! pppcp - PPP control protocols
//!
//! The RFC 1661 option negotiation automaton with LCP and IPCP on top,
//! CHAP (MD5, MS-CHAP, MS-CHAPv2) and PAP authentication, and the link
//! phase machine tying them together. The engines are pure: they return
//! actions and leave I/O and clocks to the caller, or to [`driver`].

pub mod auth;
pub mod config;
pub mod driver;
pub mod error;
pub mod fsm;
pub mod link;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
pub use link::{Link, LinkAction, LinkEvent, Phase, TimerId};
