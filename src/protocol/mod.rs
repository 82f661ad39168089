//! PPP wire formats
//!
//! Stateless parsers and builders. The state machines that consume them
//! live in [`fsm`](crate::fsm) and [`auth`](crate::auth).

pub mod chap;
pub mod control;
pub mod ipcp;
pub mod lcp;
pub mod mschap;
pub mod options;
pub mod pap;
pub mod ppp;
