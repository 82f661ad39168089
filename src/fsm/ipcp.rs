//! IP Control Protocol option handling
//!
//! Negotiates IP-Address and the RFC 1877 name server options. Addresses
//! come from configuration only; nothing is allocated here.

use super::protocol::{FsmProtocol, OptionVerdict};
use crate::config::IpcpConfig;
use crate::protocol::control::codes;
use crate::protocol::ipcp::{option_ip, options};
use crate::protocol::options::{ConfigOption, OptionValue, OptionWriter};
use crate::protocol::ppp::protocols;
use crate::Result;
use std::net::Ipv4Addr;

/// IPCP option values for one direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpcpOptions {
    pub address: Option<Ipv4Addr>,
    pub primary_dns: Option<Ipv4Addr>,
    pub secondary_dns: Option<Ipv4Addr>,
}

/// IPCP hooks for the generic engine
#[derive(Debug)]
pub struct Ipcp {
    config: IpcpConfig,
    want: IpcpOptions,
    local: IpcpOptions,
    peer: IpcpOptions,
}

impl Ipcp {
    pub fn new(config: &IpcpConfig) -> Self {
        Self {
            config: config.clone(),
            want: IpcpOptions::default(),
            local: IpcpOptions::default(),
            peer: IpcpOptions::default(),
        }
    }

    /// Our address as acked by the peer
    pub fn local_address(&self) -> Option<Ipv4Addr> {
        self.local.address.filter(|a| !a.is_unspecified())
    }

    /// The peer's address as acked by us
    pub fn peer_address(&self) -> Option<Ipv4Addr> {
        self.peer.address
    }

    /// Name servers the peer handed us
    pub fn dns(&self) -> Vec<Ipv4Addr> {
        [self.local.primary_dns, self.local.secondary_dns]
            .into_iter()
            .flatten()
            .filter(|a| !a.is_unspecified())
            .collect()
    }

    fn configured_dns(&self, index: usize) -> Option<Ipv4Addr> {
        self.config.dns.get(index).copied()
    }
}

impl FsmProtocol for Ipcp {
    fn name(&self) -> &'static str {
        "IPCP"
    }

    fn protocol(&self) -> u16 {
        protocols::IPCP
    }

    fn is_known_code(&self, code: u8) -> bool {
        (codes::CONFIGURE_REQUEST..=codes::CODE_REJECT).contains(&code)
    }

    fn configure(&mut self) {
        let any = Some(Ipv4Addr::UNSPECIFIED);
        self.want = IpcpOptions {
            address: self.config.local_address.or(any),
            primary_dns: if self.config.request_dns { any } else { None },
            secondary_dns: if self.config.request_dns { any } else { None },
        };
        self.local = IpcpOptions::default();
    }

    fn unconfigure(&mut self) {
        self.local = IpcpOptions::default();
        self.peer = IpcpOptions::default();
    }

    fn build_request(&mut self, out: &mut OptionWriter) -> Result<()> {
        if let Some(addr) = self.want.address {
            out.push(options::IP_ADDRESS, OptionValue::U32(addr.into()))?;
        }
        if let Some(addr) = self.want.primary_dns {
            out.push(options::PRIMARY_DNS, OptionValue::U32(addr.into()))?;
        }
        if let Some(addr) = self.want.secondary_dns {
            out.push(options::SECONDARY_DNS, OptionValue::U32(addr.into()))?;
        }
        Ok(())
    }

    fn reset_peer(&mut self) {
        self.peer = IpcpOptions::default();
    }

    fn check_option(&mut self, opt: &ConfigOption<'_>) -> OptionVerdict {
        let Some(addr) = option_ip(opt) else {
            return OptionVerdict::Reject;
        };
        match opt.opt_type {
            options::IP_ADDRESS => match self.config.peer_address {
                Some(assigned) if assigned != addr => {
                    OptionVerdict::Nak(u32::from(assigned).to_be_bytes().to_vec())
                }
                Some(_) => {
                    self.peer.address = Some(addr);
                    OptionVerdict::Ack
                }
                // Nothing to hand out
                None if addr.is_unspecified() => OptionVerdict::Reject,
                None => {
                    self.peer.address = Some(addr);
                    OptionVerdict::Ack
                }
            },
            options::PRIMARY_DNS | options::SECONDARY_DNS => {
                let index = usize::from(opt.opt_type == options::SECONDARY_DNS);
                match self.configured_dns(index) {
                    Some(server) if server != addr => {
                        OptionVerdict::Nak(u32::from(server).to_be_bytes().to_vec())
                    }
                    Some(_) => OptionVerdict::Ack,
                    None => OptionVerdict::Reject,
                }
            }
            _ => OptionVerdict::Reject,
        }
    }

    fn recv_ack(&mut self) {
        self.local = self.want.clone();
    }

    fn recv_nak(&mut self, opt: &ConfigOption<'_>) {
        let Some(addr) = option_ip(opt) else {
            return;
        };
        match opt.opt_type {
            options::IP_ADDRESS if self.config.local_address.is_none() => {
                self.want.address = Some(addr);
            }
            options::PRIMARY_DNS if self.want.primary_dns.is_some() => {
                self.want.primary_dns = Some(addr);
            }
            options::SECONDARY_DNS if self.want.secondary_dns.is_some() => {
                self.want.secondary_dns = Some(addr);
            }
            _ => {}
        }
    }

    fn recv_reject(&mut self, opt: &ConfigOption<'_>) {
        match opt.opt_type {
            options::IP_ADDRESS => self.want.address = None,
            options::PRIMARY_DNS => self.want.primary_dns = None,
            options::SECONDARY_DNS => self.want.secondary_dns = None,
            _ => {}
        }
    }
}
