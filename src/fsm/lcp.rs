//! Link Control Protocol option handling
//!
//! Negotiates MRU, ACCM, Authentication-Protocol, Magic-Number, PFC and
//! ACFC. Everything else the peer asks for is rejected.

use super::protocol::{FsmProtocol, OptionVerdict};
use crate::auth::AuthMethod;
use crate::config::{AuthConfig, LcpConfig};
use crate::protocol::lcp::{self, auth_protocol, auth_protocol_value, options, DEFAULT_MRU, MIN_MRU};
use crate::protocol::options::{ConfigOption, OptionValue, OptionWriter};
use crate::protocol::ppp::protocols;
use crate::Result;
use tracing::debug;

/// LCP option values for one direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcpOptions {
    pub mru: Option<u16>,
    pub accm: Option<u32>,
    pub auth: Option<AuthMethod>,
    pub magic: Option<u32>,
    pub pfc: bool,
    pub acfc: bool,
}

impl LcpOptions {
    /// MRU in effect, the default when not negotiated
    pub fn mru(&self) -> u16 {
        self.mru.unwrap_or(DEFAULT_MRU)
    }
}

/// LCP hooks for the generic engine
#[derive(Debug)]
pub struct Lcp {
    config: LcpConfig,
    require: Vec<AuthMethod>,
    accept: Vec<AuthMethod>,
    /// What our next Configure-Request asks for
    want: LcpOptions,
    /// Our options the peer acked
    local: LcpOptions,
    /// Peer's options we acked
    peer: LcpOptions,
    /// Option types the peer rejected; not requested again until unconfigure
    refused: Vec<u8>,
}

impl Lcp {
    pub fn new(config: &LcpConfig, auth: &AuthConfig) -> Self {
        Self {
            config: config.clone(),
            require: auth.require.clone(),
            accept: auth.accept.clone(),
            want: LcpOptions::default(),
            local: LcpOptions::default(),
            peer: LcpOptions::default(),
            refused: Vec::new(),
        }
    }

    /// Options the peer agreed to for our side of the link
    pub fn local_options(&self) -> &LcpOptions {
        &self.local
    }

    /// Options we agreed to for the peer's side of the link
    pub fn peer_options(&self) -> &LcpOptions {
        &self.peer
    }

    /// Method we authenticate the peer with, if any
    pub fn auth_for_peer(&self) -> Option<AuthMethod> {
        self.local.auth
    }

    /// Method the peer authenticates us with, if any
    pub fn auth_for_self(&self) -> Option<AuthMethod> {
        self.peer.auth
    }

    /// True if we demand authentication but the peer refused every method
    pub fn auth_refused(&self) -> bool {
        !self.require.is_empty() && self.local.auth.is_none()
    }

    fn new_magic() -> u32 {
        loop {
            let magic = rand::random::<u32>();
            if magic != 0 {
                return magic;
            }
        }
    }

    fn preferred_accept(&self) -> Option<AuthMethod> {
        self.accept.first().copied()
    }

    fn forget(&mut self, opt_type: u8) {
        match opt_type {
            options::MRU => self.want.mru = None,
            options::ACCM => self.want.accm = None,
            options::AUTH_PROTOCOL => self.want.auth = None,
            options::MAGIC_NUMBER => self.want.magic = None,
            options::PFC => self.want.pfc = false,
            options::ACFC => self.want.acfc = false,
            _ => {}
        }
    }
}

fn auth_option(method: AuthMethod) -> Vec<u8> {
    let (proto, alg) = method.lcp_value();
    auth_protocol_value(proto, alg)
}

impl FsmProtocol for Lcp {
    fn name(&self) -> &'static str {
        "LCP"
    }

    fn protocol(&self) -> u16 {
        protocols::LCP
    }

    fn is_known_code(&self, code: u8) -> bool {
        code <= lcp::MAX_CODE
    }

    fn configure(&mut self) {
        self.want = LcpOptions {
            mru: (self.config.mru != DEFAULT_MRU).then_some(self.config.mru),
            accm: self.config.accm,
            auth: self.require.first().copied(),
            magic: self.config.magic_number.then(Self::new_magic),
            pfc: self.config.pfc,
            acfc: self.config.acfc,
        };
        for opt_type in self.refused.clone() {
            self.forget(opt_type);
        }
        self.local = LcpOptions::default();
    }

    fn unconfigure(&mut self) {
        self.local = LcpOptions::default();
        self.peer = LcpOptions::default();
        self.refused.clear();
    }

    fn build_request(&mut self, out: &mut OptionWriter) -> Result<()> {
        if let Some(mru) = self.want.mru {
            out.push(options::MRU, OptionValue::U16(mru))?;
        }
        if let Some(accm) = self.want.accm {
            out.push(options::ACCM, OptionValue::U32(accm))?;
        }
        if let Some(method) = self.want.auth {
            out.push(options::AUTH_PROTOCOL, OptionValue::Bytes(&auth_option(method)))?;
        }
        if let Some(magic) = self.want.magic {
            out.push(options::MAGIC_NUMBER, OptionValue::U32(magic))?;
        }
        if self.want.pfc {
            out.push(options::PFC, OptionValue::Empty)?;
        }
        if self.want.acfc {
            out.push(options::ACFC, OptionValue::Empty)?;
        }
        Ok(())
    }

    fn reset_peer(&mut self) {
        self.peer = LcpOptions::default();
    }

    fn check_option(&mut self, opt: &ConfigOption<'_>) -> OptionVerdict {
        match opt.opt_type {
            options::MRU => match opt.as_u16() {
                Some(mru) if mru < MIN_MRU => {
                    OptionVerdict::Nak(MIN_MRU.to_be_bytes().to_vec())
                }
                Some(mru) => {
                    self.peer.mru = Some(mru);
                    OptionVerdict::Ack
                }
                None => OptionVerdict::Reject,
            },
            options::ACCM => match opt.as_u32() {
                Some(accm) => {
                    self.peer.accm = Some(accm);
                    OptionVerdict::Ack
                }
                None => OptionVerdict::Reject,
            },
            options::AUTH_PROTOCOL => {
                let method = auth_protocol(opt).and_then(|(proto, alg)| {
                    AuthMethod::from_lcp(proto, alg).filter(|m| opt.data == auth_option(*m))
                });
                match method {
                    Some(m) if self.accept.contains(&m) => {
                        self.peer.auth = Some(m);
                        OptionVerdict::Ack
                    }
                    _ => match self.preferred_accept() {
                        Some(m) => OptionVerdict::Nak(auth_option(m)),
                        None => OptionVerdict::Reject,
                    },
                }
            }
            options::MAGIC_NUMBER => match opt.as_u32() {
                Some(0) => OptionVerdict::Nak(Self::new_magic().to_be_bytes().to_vec()),
                Some(magic) if self.want.magic == Some(magic) => {
                    // Same number both ways: possibly looped back
                    debug!("LCP: peer magic 0x{:08x} equals ours", magic);
                    self.want.magic = Some(Self::new_magic());
                    OptionVerdict::Nak(Self::new_magic().to_be_bytes().to_vec())
                }
                Some(magic) => {
                    self.peer.magic = Some(magic);
                    OptionVerdict::Ack
                }
                None => OptionVerdict::Reject,
            },
            options::PFC if opt.data.is_empty() => {
                self.peer.pfc = true;
                OptionVerdict::Ack
            }
            options::ACFC if opt.data.is_empty() => {
                self.peer.acfc = true;
                OptionVerdict::Ack
            }
            _ => OptionVerdict::Reject,
        }
    }

    fn recv_ack(&mut self) {
        self.local = self.want.clone();
    }

    fn recv_nak(&mut self, opt: &ConfigOption<'_>) {
        match opt.opt_type {
            options::MRU => {
                if let Some(mru) = opt.as_u16() {
                    if (MIN_MRU..=self.config.mru.max(DEFAULT_MRU)).contains(&mru) {
                        self.want.mru = Some(mru);
                    }
                }
            }
            options::ACCM => {
                if let Some(accm) = opt.as_u32() {
                    self.want.accm = Some(self.want.accm.unwrap_or(0) | accm);
                }
            }
            options::AUTH_PROTOCOL => {
                let suggested = auth_protocol(opt).and_then(|(p, a)| AuthMethod::from_lcp(p, a));
                let next = match suggested {
                    Some(m) if self.require.contains(&m) => Some(m),
                    _ => {
                        // Walk down our preference list
                        let pos = self
                            .want
                            .auth
                            .and_then(|cur| self.require.iter().position(|m| *m == cur));
                        pos.and_then(|p| self.require.get(p + 1)).copied()
                    }
                };
                if let Some(m) = next {
                    self.want.auth = Some(m);
                }
            }
            options::MAGIC_NUMBER => {
                if self.want.magic.is_some() {
                    self.want.magic = Some(Self::new_magic());
                }
            }
            _ => {}
        }
    }

    fn recv_reject(&mut self, opt: &ConfigOption<'_>) {
        if !self.refused.contains(&opt.opt_type) {
            self.refused.push(opt.opt_type);
        }
        self.forget(opt.opt_type);
    }

    fn local_magic(&self) -> u32 {
        self.local.magic.or(self.want.magic).unwrap_or(0)
    }

    fn peer_magic(&self) -> u32 {
        self.peer.magic.unwrap_or(0)
    }

    fn check_magic(&self) -> bool {
        self.config.check_magic
    }

    fn max_reject_len(&self) -> usize {
        self.peer.mru() as usize - 4
    }
}
