//! CHAP exchanges (RFC 1994, RFC 2433, RFC 2759)
//!
//! [`ChapAuthenticator`] challenges the peer and checks its response,
//! [`ChapPeer`] answers the peer's challenges. Both push their packets and
//! timers into the caller's action list and hand back an [`AuthResult`]
//! once their direction is decided.

use super::secret::{SecretLookup, SecretStore};
use super::{AuthAction, AuthMethod, AuthResult, AuthTimer};
use crate::config::{AuthConfig, Originate};
use crate::protocol::chap::{calculate_chap_md5, codes, ChapBuilder, ChapPacket, MD5_RESPONSE_LEN};
use crate::protocol::mschap::{self, MsChapResponse, MsChapV2Response};
use crate::protocol::ppp::protocols;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker in bytes 1..4 of every challenge we generate
pub const FINGERPRINT: [u8; 3] = [0x50, 0x43, 0x50];

const MD5_CHALLENGE_MIN: usize = 16;
const MD5_CHALLENGE_MAX: usize = 47;

const SUCCESS_TEXT: &str = "Welcome";
const FAILURE_TEXT: &str = "Authentication failed";

/// Two-bit origination tag carried in the top of the first challenge byte
pub fn origination_tag(originate: Originate) -> u8 {
    match originate {
        Originate::Local => 1,
        Originate::Remote => 2,
    }
}

/// Random challenge stamped with our fingerprint and origination
pub fn generate_challenge(method: AuthMethod, tag: u8) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let len = match method {
        AuthMethod::MsChap => mschap::MSCHAP_CHALLENGE_LEN,
        AuthMethod::MsChapV2 => mschap::MSCHAPV2_CHALLENGE_LEN,
        _ => rng.gen_range(MD5_CHALLENGE_MIN..=MD5_CHALLENGE_MAX),
    };
    let mut challenge = vec![0u8; len];
    rng.fill(&mut challenge[..]);
    challenge[0] = (tag << 6) | (challenge[0] & 0x3f);
    challenge[1..4].copy_from_slice(&FINGERPRINT);
    challenge
}

/// Whether `challenge` looks like one we generated for the same direction
fn is_spoofed(challenge: &[u8], tag: u8) -> bool {
    challenge.len() >= 4 && challenge[1..4] == FINGERPRINT && challenge[0] >> 6 == tag
}

fn send(out: &mut Vec<AuthAction>, packet: Vec<u8>) {
    out.push(AuthAction::Send {
        protocol: protocols::CHAP,
        packet,
    });
}

// ============================================================================
// Authenticator
// ============================================================================

#[derive(Debug)]
enum AuthenticatorState {
    ChallengeSent,
    /// Secret lookup in progress
    Verifying {
        lookup: String,
        user: Vec<u8>,
        value: Vec<u8>,
    },
    Done {
        reply: Vec<u8>,
    },
}

/// We authenticate the peer
#[derive(Debug)]
pub struct ChapAuthenticator {
    link: String,
    method: AuthMethod,
    name: String,
    strip_domain: bool,
    retry_timeout: Duration,
    retries: u32,
    id: u8,
    challenge: Vec<u8>,
    packet: Vec<u8>,
    state: AuthenticatorState,
}

impl ChapAuthenticator {
    /// Send the first Challenge
    pub fn start(
        link: &str,
        method: AuthMethod,
        config: &AuthConfig,
        originate: Originate,
        out: &mut Vec<AuthAction>,
    ) -> Self {
        let name = config.name.clone().unwrap_or_default();
        let challenge = generate_challenge(method, origination_tag(originate));
        let id = rand::random::<u8>();
        let packet = ChapBuilder::challenge(id, &challenge, name.as_bytes()).build();

        debug!(
            "CHAP: sending {} Challenge id={} len={} on {}",
            method,
            id,
            challenge.len(),
            link
        );
        send(out, packet.clone());
        out.push(AuthAction::StartTimer {
            timer: AuthTimer::Challenge,
            after: config.retry_timeout(),
        });

        Self {
            link: link.to_string(),
            method,
            name,
            strip_domain: config.strip_domain,
            retry_timeout: config.retry_timeout(),
            retries: config.max_retries.saturating_sub(1),
            id,
            challenge,
            packet,
            state: AuthenticatorState::ChallengeSent,
        }
    }

    /// The challenge currently outstanding
    pub fn challenge(&self) -> &[u8] {
        &self.challenge
    }

    /// Name advertised in our challenges
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Challenge retransmission timer fired
    pub fn timeout(&mut self, out: &mut Vec<AuthAction>) {
        if !matches!(self.state, AuthenticatorState::ChallengeSent) {
            return;
        }
        if self.retries == 0 {
            warn!("CHAP: no response to Challenge on {}", self.link);
            return;
        }
        self.retries -= 1;
        debug!("CHAP: retransmitting Challenge id={} on {}", self.id, self.link);
        send(out, self.packet.clone());
        out.push(AuthAction::StartTimer {
            timer: AuthTimer::Challenge,
            after: self.retry_timeout,
        });
    }

    pub fn recv_response(
        &mut self,
        pkt: &ChapPacket<'_>,
        secrets: &dyn SecretStore,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        if pkt.identifier() != self.id {
            debug!(
                "CHAP: Response id={} does not match Challenge id={} on {}",
                pkt.identifier(),
                self.id,
                self.link
            );
            return None;
        }
        match &self.state {
            AuthenticatorState::ChallengeSent => {}
            AuthenticatorState::Verifying { .. } => {
                debug!("CHAP: Response while verifying on {}", self.link);
                return None;
            }
            AuthenticatorState::Done { reply } => {
                debug!("CHAP: duplicate Response, resending verdict on {}", self.link);
                send(out, reply.clone());
                return None;
            }
        }
        out.push(AuthAction::StopTimer(AuthTimer::Challenge));

        let Some((value, user)) = pkt.value_and_name() else {
            warn!("CHAP: malformed Response on {}", self.link);
            return Some(self.conclude(false, out));
        };

        let shown = if self.strip_domain && self.method.is_mschap() {
            mschap::strip_domain(user)
        } else {
            user
        };
        let lookup = String::from_utf8_lossy(shown).into_owned();
        debug!("CHAP: Response from '{}' on {}", lookup, self.link);

        match secrets.lookup(&lookup) {
            SecretLookup::Found(secret) => {
                let ok = self.verify(value, user, &secret);
                Some(self.finish(ok, user, value, &secret, out))
            }
            SecretLookup::NotFound => {
                warn!("CHAP: no secret for '{}' on {}", lookup, self.link);
                Some(self.conclude(false, out))
            }
            SecretLookup::Pending => {
                debug!("CHAP: waiting for secret of '{}' on {}", lookup, self.link);
                self.state = AuthenticatorState::Verifying {
                    lookup,
                    user: user.to_vec(),
                    value: value.to_vec(),
                };
                None
            }
        }
    }

    /// A pending secret lookup completed
    pub fn credentials_ready(
        &mut self,
        name: &str,
        secret: &str,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let AuthenticatorState::Verifying { lookup, user, value } = &self.state else {
            return None;
        };
        if lookup != name {
            return None;
        }
        let (user, value) = (user.clone(), value.clone());
        let ok = self.verify(&value, &user, secret);
        Some(self.finish(ok, &user, &value, secret, out))
    }

    fn verify(&self, value: &[u8], user: &[u8], secret: &str) -> bool {
        match self.method {
            AuthMethod::MsChap => {
                let Ok(challenge) = <[u8; 8]>::try_from(self.challenge.as_slice()) else {
                    return false;
                };
                // Only the NT half counts; the LM half is never checked
                MsChapResponse::decode(value).is_some_and(|r| {
                    r.use_nt && r.nt_response == mschap::nt_response_v1(&challenge, secret)
                })
            }
            AuthMethod::MsChapV2 => {
                let Ok(challenge) = <[u8; 16]>::try_from(self.challenge.as_slice()) else {
                    return false;
                };
                MsChapV2Response::decode(value).is_some_and(|r| {
                    r.nt_response
                        == mschap::nt_response_v2(&challenge, &r.peer_challenge, user, secret)
                })
            }
            _ => {
                value.len() == MD5_RESPONSE_LEN
                    && calculate_chap_md5(self.id, secret.as_bytes(), &self.challenge) == value
            }
        }
    }

    fn finish(
        &mut self,
        ok: bool,
        user: &[u8],
        value: &[u8],
        secret: &str,
        out: &mut Vec<AuthAction>,
    ) -> AuthResult {
        if ok && self.method == AuthMethod::MsChapV2 {
            // Mutual authentication: prove we know the secret too
            let proof = MsChapV2Response::decode(value).and_then(|r| {
                let challenge = <[u8; 16]>::try_from(self.challenge.as_slice()).ok()?;
                Some(mschap::authenticator_response(
                    secret,
                    &r.nt_response,
                    &r.peer_challenge,
                    &challenge,
                    user,
                ))
            });
            if let Some(proof) = proof {
                let message = mschap::success_message_v2(&proof, SUCCESS_TEXT);
                return self.reply(true, message, out);
            }
        }
        self.conclude(ok, out)
    }

    fn conclude(&mut self, ok: bool, out: &mut Vec<AuthAction>) -> AuthResult {
        let message = match (ok, self.method) {
            (true, _) => SUCCESS_TEXT.to_string(),
            (false, AuthMethod::MsChap) => mschap::failure_message_v1(),
            (false, AuthMethod::MsChapV2) => {
                mschap::failure_message_v2(&self.challenge, FAILURE_TEXT)
            }
            (false, _) => FAILURE_TEXT.to_string(),
        };
        self.reply(ok, message, out)
    }

    fn reply(&mut self, ok: bool, message: String, out: &mut Vec<AuthAction>) -> AuthResult {
        let packet = if ok {
            info!("CHAP: peer authenticated with {} on {}", self.method, self.link);
            ChapBuilder::success(self.id, &message).build()
        } else {
            warn!("CHAP: peer failed {} authentication on {}", self.method, self.link);
            ChapBuilder::failure(self.id, &message).build()
        };
        send(out, packet.clone());
        self.state = AuthenticatorState::Done { reply: packet };
        if ok {
            AuthResult::Success(message)
        } else {
            AuthResult::Failure(message)
        }
    }
}

// ============================================================================
// Peer
// ============================================================================

#[derive(Debug)]
enum PeerState {
    Idle,
    /// Secret lookup in progress
    Pending {
        id: u8,
        challenge: Vec<u8>,
        user: String,
    },
    ResponseSent {
        id: u8,
        /// MS-CHAPv2 authenticator response we expect in Success
        expected: Option<String>,
    },
    Done,
}

/// The peer authenticates us
#[derive(Debug)]
pub struct ChapPeer {
    link: String,
    method: AuthMethod,
    name: Option<String>,
    tag: u8,
    spoof_check: bool,
    retry_timeout: Duration,
    max_retries: u32,
    retries: u32,
    packet: Vec<u8>,
    state: PeerState,
}

impl ChapPeer {
    /// Wait for the peer's Challenge
    pub fn new(link: &str, method: AuthMethod, config: &AuthConfig, originate: Originate) -> Self {
        Self {
            link: link.to_string(),
            method,
            name: config.name.clone(),
            tag: origination_tag(originate),
            spoof_check: config.spoof_check,
            retry_timeout: config.retry_timeout(),
            max_retries: config.max_retries,
            retries: 0,
            packet: Vec::new(),
            state: PeerState::Idle,
        }
    }

    pub fn recv_challenge(
        &mut self,
        pkt: &ChapPacket<'_>,
        own_challenge: Option<&[u8]>,
        secrets: &dyn SecretStore,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let Some((challenge, peer_name)) = pkt.value_and_name() else {
            warn!("CHAP: malformed Challenge on {}", self.link);
            return None;
        };

        if own_challenge == Some(challenge) {
            warn!("CHAP: peer reflected our own challenge on {}", self.link);
            return None;
        }
        if self.spoof_check && is_spoofed(challenge, self.tag) {
            warn!("CHAP: challenge carries our own origination, dropping on {}", self.link);
            return None;
        }
        let expected_len = match self.method {
            AuthMethod::MsChap => Some(mschap::MSCHAP_CHALLENGE_LEN),
            AuthMethod::MsChapV2 => Some(mschap::MSCHAPV2_CHALLENGE_LEN),
            _ => None,
        };
        if expected_len.is_some_and(|len| len != challenge.len()) {
            warn!(
                "CHAP: {} challenge of {} bytes on {}",
                self.method,
                challenge.len(),
                self.link
            );
            return None;
        }

        let user = match &self.name {
            Some(name) => name.clone(),
            None => String::from_utf8_lossy(peer_name).into_owned(),
        };
        let id = pkt.identifier();
        debug!(
            "CHAP: Challenge id={} from '{}' on {}",
            id,
            String::from_utf8_lossy(peer_name),
            self.link
        );

        match secrets.lookup(&user) {
            SecretLookup::Found(secret) => self.respond(id, challenge, &user, &secret, out),
            SecretLookup::NotFound => {
                warn!("CHAP: no secret for '{}' on {}", user, self.link);
                self.state = PeerState::Done;
                Some(AuthResult::Failure(format!("no secret for {}", user)))
            }
            SecretLookup::Pending => {
                self.state = PeerState::Pending {
                    id,
                    challenge: challenge.to_vec(),
                    user,
                };
                None
            }
        }
    }

    /// A pending secret lookup completed
    pub fn credentials_ready(
        &mut self,
        name: &str,
        secret: &str,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let PeerState::Pending {
            id,
            challenge,
            user,
        } = &self.state
        else {
            return None;
        };
        if user != name {
            return None;
        }
        let (id, challenge, user) = (*id, challenge.clone(), user.clone());
        self.respond(id, &challenge, &user, secret, out)
    }

    fn respond(
        &mut self,
        id: u8,
        challenge: &[u8],
        user: &str,
        secret: &str,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let mut expected = None;
        let value = match self.method {
            AuthMethod::MsChap => {
                let challenge = <[u8; 8]>::try_from(challenge).ok()?;
                MsChapResponse::new(&challenge, secret).encode().to_vec()
            }
            AuthMethod::MsChapV2 => {
                let auth_challenge = <[u8; 16]>::try_from(challenge).ok()?;
                let peer_challenge: [u8; 16] = rand::random();
                let response =
                    MsChapV2Response::new(&auth_challenge, peer_challenge, user.as_bytes(), secret);
                expected = Some(mschap::authenticator_response(
                    secret,
                    &response.nt_response,
                    &peer_challenge,
                    &auth_challenge,
                    user.as_bytes(),
                ));
                response.encode().to_vec()
            }
            _ => calculate_chap_md5(id, secret.as_bytes(), challenge).to_vec(),
        };

        self.packet = ChapBuilder::response(id, &value, user.as_bytes()).build();
        self.retries = self.max_retries.saturating_sub(1);
        self.state = PeerState::ResponseSent { id, expected };
        debug!("CHAP: sending Response id={} as '{}' on {}", id, user, self.link);
        send(out, self.packet.clone());
        out.push(AuthAction::StartTimer {
            timer: AuthTimer::Response,
            after: self.retry_timeout,
        });
        None
    }

    /// Success or Failure from the authenticator
    pub fn recv_verdict(
        &mut self,
        pkt: &ChapPacket<'_>,
        out: &mut Vec<AuthAction>,
    ) -> Option<AuthResult> {
        let PeerState::ResponseSent { id, expected } = &self.state else {
            debug!(
                "CHAP: unexpected {} on {}",
                if pkt.code() == codes::SUCCESS { "Success" } else { "Failure" },
                self.link
            );
            return None;
        };
        if pkt.identifier() != *id {
            debug!(
                "CHAP: verdict id={} does not match Response id={} on {}",
                pkt.identifier(),
                id,
                self.link
            );
            return None;
        }
        let expected = expected.clone();
        let message_bytes = pkt.message().unwrap_or_default();
        let message = String::from_utf8_lossy(message_bytes).into_owned();

        out.push(AuthAction::StopTimer(AuthTimer::Response));
        self.packet = Vec::new();
        self.state = PeerState::Done;

        if pkt.code() != codes::SUCCESS {
            warn!("CHAP: authentication failed: {} on {}", message, self.link);
            return Some(AuthResult::Failure(message));
        }
        if let Some(expected) = expected {
            if !mschap::verify_authenticator_response(message_bytes, &expected) {
                warn!("CHAP: bad authenticator response from peer on {}", self.link);
                return Some(AuthResult::Failure(
                    "peer failed mutual authentication".to_string(),
                ));
            }
        }
        info!("CHAP: authentication success: {} on {}", message, self.link);
        Some(AuthResult::Success(message))
    }

    /// Response retransmission timer fired
    pub fn timeout(&mut self, out: &mut Vec<AuthAction>) {
        if !matches!(self.state, PeerState::ResponseSent { .. }) {
            return;
        }
        if self.retries == 0 {
            warn!("CHAP: no verdict for our Response on {}", self.link);
            return;
        }
        self.retries -= 1;
        debug!("CHAP: retransmitting Response on {}", self.link);
        send(out, self.packet.clone());
        out.push(AuthAction::StartTimer {
            timer: AuthTimer::Response,
            after: self.retry_timeout,
        });
    }
}
