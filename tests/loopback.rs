//! Two links wired back-to-back through an in-memory wire
//!
//! Frames are delivered in order; timers only fire when a test fires them.

use pppcp::auth::{AuthMethod, MemorySecretStore, SecretStore};
use pppcp::config::{validate_pair, LinkConfig, Originate};
use pppcp::fsm::{FailureReason, FsmState, FsmTimer};
use pppcp::protocol::chap::{self, calculate_chap_md5, ChapPacket};
use pppcp::protocol::control::{codes, ControlPacket};
use pppcp::protocol::pap::{self, PapPacket};
use pppcp::protocol::ppp::{protocols, PppBuilder, PppFrame};
use pppcp::telemetry::LinkStats;
use pppcp::{Link, LinkAction, LinkEvent, Phase, TimerId};
use std::collections::{HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;

const A: usize = 0;
const B: usize = 1;

struct Wire {
    links: [Link; 2],
    queue: VecDeque<(usize, Vec<u8>)>,
    /// Every frame put on the wire, with its sender
    trace: Vec<(usize, Vec<u8>)>,
    events: [Vec<LinkEvent>; 2],
    timers: [HashSet<TimerId>; 2],
}

impl Wire {
    fn new(
        a: LinkConfig,
        a_secrets: Arc<dyn SecretStore>,
        b: LinkConfig,
        b_secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            links: [
                Link::new("ppp-a", &a, a_secrets, Arc::new(LinkStats::new())),
                Link::new("ppp-b", &b, b_secrets, Arc::new(LinkStats::new())),
            ],
            queue: VecDeque::new(),
            trace: Vec::new(),
            events: [Vec::new(), Vec::new()],
            timers: [HashSet::new(), HashSet::new()],
        }
    }

    fn shared(a: LinkConfig, b: LinkConfig, secrets: &[(&str, &str)]) -> Self {
        let store = store(secrets);
        Self::new(a, store.clone(), b, store)
    }

    fn absorb(&mut self, side: usize, actions: Vec<LinkAction>) {
        for action in actions {
            match action {
                LinkAction::Send(frame) => {
                    self.trace.push((side, frame.clone()));
                    self.queue.push_back((1 - side, frame));
                }
                LinkAction::StartTimer { timer, .. } => {
                    self.timers[side].insert(timer);
                }
                LinkAction::StopTimer(timer) => {
                    self.timers[side].remove(&timer);
                }
                LinkAction::Event(event) => self.events[side].push(event),
            }
        }
    }

    fn start(&mut self) {
        for side in [A, B] {
            let actions = self.links[side].open();
            self.absorb(side, actions);
            let actions = self.links[side].lower_up();
            self.absorb(side, actions);
        }
        self.pump();
    }

    fn pump(&mut self) {
        let mut budget = 1000;
        while let Some((to, frame)) = self.queue.pop_front() {
            budget -= 1;
            assert!(budget > 0, "links never settled");
            let actions = self.links[to].input(&frame);
            self.absorb(to, actions);
        }
    }

    fn fire(&mut self, side: usize, timer: TimerId) {
        assert!(self.timers[side].contains(&timer), "{:?} not armed", timer);
        let actions = self.links[side].timeout(timer);
        self.absorb(side, actions);
    }

    fn network_up(&self, side: usize) -> Option<&LinkEvent> {
        self.events[side]
            .iter()
            .find(|e| matches!(e, LinkEvent::NetworkUp { .. }))
    }

    fn auth_result(&self, side: usize) -> Option<(bool, String)> {
        self.events[side].iter().find_map(|e| match e {
            LinkEvent::AuthFinished { success, message } => Some((*success, message.clone())),
            _ => None,
        })
    }

    /// Packets of `protocol` sent by `side`
    fn sent(&self, side: usize, protocol: u16) -> Vec<Vec<u8>> {
        self.trace
            .iter()
            .filter(|(from, _)| *from == side)
            .filter_map(|(_, frame)| {
                let ppp = PppFrame::parse(frame).ok()?;
                (ppp.protocol() == protocol).then(|| ppp.payload().to_vec())
            })
            .collect()
    }
}

fn store(secrets: &[(&str, &str)]) -> Arc<dyn SecretStore> {
    let store = MemorySecretStore::default();
    for (name, secret) in secrets {
        store.insert(*name, *secret);
    }
    Arc::new(store)
}

fn server() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.originate = Originate::Remote;
    config.ipcp.local_address = Some(Ipv4Addr::new(10, 0, 0, 1));
    config.ipcp.peer_address = Some(Ipv4Addr::new(10, 0, 0, 2));
    config.ipcp.dns = vec![Ipv4Addr::new(10, 0, 0, 53)];
    config
}

fn client(name: &str) -> LinkConfig {
    let mut config = LinkConfig::default();
    config.originate = Originate::Local;
    config.auth.name = Some(name.to_string());
    config.ipcp.request_dns = true;
    config
}

fn requiring(mut config: LinkConfig, method: AuthMethod) -> LinkConfig {
    config.auth.require = vec![method];
    config
}

#[test]
fn test_negotiates_to_network_without_auth() {
    let mut wire = Wire::shared(server(), client("bob"), &[]);
    wire.start();

    for side in [A, B] {
        assert_eq!(wire.links[side].phase(), Phase::Network);
        assert_eq!(wire.links[side].lcp().state(), FsmState::Opened);
        assert!(wire.links[side].is_network_up());
        assert_eq!(wire.auth_result(side), Some((true, String::new())));
    }

    assert_eq!(
        wire.network_up(B),
        Some(&LinkEvent::NetworkUp {
            local: Some(Ipv4Addr::new(10, 0, 0, 2)),
            peer: Some(Ipv4Addr::new(10, 0, 0, 1)),
            dns: vec![Ipv4Addr::new(10, 0, 0, 53)],
        })
    );
    match wire.network_up(A) {
        Some(LinkEvent::NetworkUp { local, peer, .. }) => {
            assert_eq!(*local, Some(Ipv4Addr::new(10, 0, 0, 1)));
            assert_eq!(*peer, Some(Ipv4Addr::new(10, 0, 0, 2)));
        }
        other => panic!("unexpected {:?}", other),
    }

    // First Configure-Request of each side carries id 1
    for side in [A, B] {
        let first = &wire.sent(side, protocols::LCP)[0];
        let pkt = ControlPacket::parse(first).unwrap();
        assert_eq!(pkt.code(), codes::CONFIGURE_REQUEST);
        assert_eq!(pkt.identifier(), 1);
    }
}

#[test]
fn test_chap_md5() {
    let mut wire = Wire::shared(
        requiring(server(), AuthMethod::ChapMd5),
        client("bob"),
        &[("bob", "y")],
    );
    wire.start();

    let challenges = wire.sent(A, protocols::CHAP);
    let challenge = ChapPacket::parse(&challenges[0]).unwrap();
    assert_eq!(challenge.code(), chap::codes::CHALLENGE);
    let value = challenge.value().unwrap();
    assert!((16..=47).contains(&value.len()));

    let responses = wire.sent(B, protocols::CHAP);
    let response = ChapPacket::parse(&responses[0]).unwrap();
    assert_eq!(response.code(), chap::codes::RESPONSE);
    assert_eq!(response.identifier(), challenge.identifier());
    assert_eq!(
        response.value().unwrap(),
        &calculate_chap_md5(challenge.identifier(), b"y", value)[..]
    );
    assert_eq!(response.name(), Some(&b"bob"[..]));

    let success = ChapPacket::parse(&challenges[1]).unwrap();
    assert_eq!(success.code(), chap::codes::SUCCESS);
    assert!(!success.message().unwrap().is_empty());

    assert_eq!(wire.auth_result(A), Some((true, "Welcome".into())));
    assert_eq!(wire.auth_result(B), Some((true, "Welcome".into())));
    assert!(wire.links[A].is_network_up());
    assert!(wire.links[B].is_network_up());
}

#[test]
fn test_chap_both_directions() {
    let mut a = requiring(server(), AuthMethod::ChapMd5);
    a.auth.name = Some("alice".to_string());
    let b = requiring(client("bob"), AuthMethod::ChapMd5);
    let mut wire = Wire::shared(a, b, &[("alice", "a-secret"), ("bob", "b-secret")]);
    wire.start();

    // Each side sent a Challenge and a Response
    for side in [A, B] {
        let codes: Vec<u8> = wire.sent(side, protocols::CHAP).iter().map(|p| p[0]).collect();
        assert!(codes.contains(&chap::codes::CHALLENGE));
        assert!(codes.contains(&chap::codes::RESPONSE));
        assert_eq!(wire.auth_result(side), Some((true, "Welcome".into())));
    }
    assert!(wire.links[A].is_network_up());
    assert!(wire.links[B].is_network_up());
}

#[test]
fn test_same_origination_challenge_is_dropped() {
    let a = requiring(client("alice"), AuthMethod::ChapMd5);
    let b = requiring(client("bob"), AuthMethod::ChapMd5);
    assert!(validate_pair("a", &a, "b", &b).has_errors());
    let mut wire = Wire::shared(a, b, &[("alice", "a"), ("bob", "b")]);
    wire.start();

    // Both sides stamp challenges as locally originated; each drops the other's
    for side in [A, B] {
        let sent = wire.sent(side, protocols::CHAP);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], chap::codes::CHALLENGE);
        assert_eq!(wire.links[side].phase(), Phase::Authenticate);
    }
}

#[test]
fn test_pap_wrong_password() {
    let mut wire = Wire::new(
        requiring(server(), AuthMethod::Pap),
        store(&[("bob", "y")]),
        client("bob"),
        store(&[("bob", "x")]),
    );
    wire.start();

    let requests = wire.sent(B, protocols::PAP);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0][0], pap::codes::AUTHENTICATE_REQUEST);

    let replies = wire.sent(A, protocols::PAP);
    let nak = PapPacket::parse(&replies[0]).unwrap();
    assert_eq!(nak.code(), pap::codes::AUTHENTICATE_NAK);
    assert!(!nak.message().unwrap().is_empty());

    assert_eq!(
        wire.auth_result(A),
        Some((false, "Authentication failed".into()))
    );
    assert_eq!(wire.auth_result(B).map(|(ok, _)| ok), Some(false));
    assert_eq!(wire.links[A].stats().auth_failures.get(), 1);
    assert!(wire.network_up(A).is_none());

    // The authenticator closed LCP and the Terminate exchange completed
    assert_eq!(wire.links[A].phase(), Phase::Dead);
    assert_eq!(wire.links[A].lcp().state(), FsmState::Closed);
    assert!(wire.events[A].contains(&LinkEvent::LowerLayerDone));
}

#[test]
fn test_pap_success() {
    let mut wire = Wire::shared(
        requiring(server(), AuthMethod::Pap),
        client("bob"),
        &[("bob", "y")],
    );
    wire.start();

    assert_eq!(wire.auth_result(A), Some((true, "Welcome".into())));
    assert_eq!(wire.auth_result(B), Some((true, "Welcome".into())));
    assert!(wire.links[B].is_network_up());
}

#[test]
fn test_mschapv2_mutual() {
    let mut wire = Wire::shared(
        requiring(server(), AuthMethod::MsChapV2),
        client("User"),
        &[("User", "clientPass")],
    );
    wire.start();

    let challenge = &wire.sent(A, protocols::CHAP)[0];
    assert_eq!(ChapPacket::parse(challenge).unwrap().value().unwrap().len(), 16);
    let response = &wire.sent(B, protocols::CHAP)[0];
    assert_eq!(ChapPacket::parse(response).unwrap().value().unwrap().len(), 49);

    let success = &wire.sent(A, protocols::CHAP)[1];
    let message = ChapPacket::parse(success).unwrap().message().unwrap().to_vec();
    assert!(message.starts_with(b"S="));

    assert_eq!(wire.auth_result(B).map(|(ok, _)| ok), Some(true));
    assert!(wire.links[A].is_network_up());
    assert!(wire.links[B].is_network_up());
}

#[test]
fn test_mschapv2_wrong_secret() {
    let mut wire = Wire::new(
        requiring(server(), AuthMethod::MsChapV2),
        store(&[("User", "clientPass")]),
        client("User"),
        store(&[("User", "guess")]),
    );
    wire.start();

    let failure = wire.sent(A, protocols::CHAP)[1].clone();
    let failure = ChapPacket::parse(&failure).unwrap();
    assert_eq!(failure.code(), chap::codes::FAILURE);
    assert!(failure.message().unwrap().starts_with(b"E=691 R=0 C="));
    assert_eq!(wire.auth_result(A).map(|(ok, _)| ok), Some(false));
}

#[test]
fn test_pending_secret() {
    let secrets = MemorySecretStore::default();
    secrets.defer("bob");
    let mut wire = Wire::new(
        requiring(server(), AuthMethod::ChapMd5),
        Arc::new(secrets),
        client("bob"),
        store(&[("bob", "y")]),
    );
    wire.start();

    assert_eq!(wire.links[A].phase(), Phase::Authenticate);
    assert!(wire.auth_result(A).is_none());

    let actions = wire.links[A].credentials_ready("bob", "y");
    wire.absorb(A, actions);
    wire.pump();

    assert_eq!(wire.auth_result(A), Some((true, "Welcome".into())));
    assert!(wire.links[A].is_network_up());
}

#[test]
fn test_echo_timeout() {
    let mut a = server();
    a.lcp.echo_interval_secs = 10;
    a.lcp.echo_max_secs = 30;
    let mut wire = Wire::shared(a, client("bob"), &[]);
    wire.start();
    assert!(wire.links[A].is_network_up());

    let echo = TimerId::Lcp(FsmTimer::Echo);
    // The first tick only records the negotiation traffic
    wire.fire(A, echo);
    assert!(wire.queue.is_empty());
    for _ in 0..3 {
        wire.fire(A, echo);
        // The peer's replies are lost
        wire.queue.clear();
    }

    let failures: Vec<_> = wire.events[A]
        .iter()
        .filter(|e| matches!(e, LinkEvent::Failed { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![&LinkEvent::Failed {
            protocol: protocols::LCP,
            reason: FailureReason::EchoTimeout,
        }]
    );
    assert!(wire.events[A].contains(&LinkEvent::NetworkDown));
    assert!(!wire.timers[A].contains(&echo));
    assert_eq!(wire.links[A].lcp().state(), FsmState::Stopping);
    assert_eq!(wire.links[A].phase(), Phase::Terminate);
}

#[test]
fn test_echo_answered_keeps_link_up() {
    let mut wire = Wire::shared(server(), client("bob"), &[]);
    wire.start();

    let echo = TimerId::Lcp(FsmTimer::Echo);
    for _ in 0..10 {
        wire.fire(A, echo);
        wire.pump();
    }
    assert!(wire.links[A].is_network_up());
    assert!(wire.events[A]
        .iter()
        .all(|e| !matches!(e, LinkEvent::Failed { .. })));
}

#[test]
fn test_unknown_protocol_rejected() {
    let mut wire = Wire::shared(server(), client("bob"), &[]);
    wire.start();

    let frame = PppBuilder::new(0x8057).payload(&[1, 1, 0, 4]).build();
    let actions = wire.links[A].input(&frame);
    wire.absorb(A, actions);

    let lcp = wire.sent(A, protocols::LCP);
    let reject = ControlPacket::parse(lcp.last().unwrap()).unwrap();
    assert_eq!(reject.code(), codes::PROTOCOL_REJECT);
    assert_eq!(&reject.data()[..2], &[0x80, 0x57]);
    assert_eq!(&reject.data()[2..], &[1, 1, 0, 4]);

    // The peer never sent that protocol; nothing changes
    wire.pump();
    assert!(wire.links[B].is_network_up());
}

#[test]
fn test_ipcp_protocol_reject_brings_link_down() {
    let mut wire = Wire::shared(server(), client("bob"), &[]);
    wire.start();

    let mut data = protocols::IPCP.to_be_bytes().to_vec();
    data.extend_from_slice(&[1, 1, 0, 4]);
    let packet = pppcp::protocol::control::ControlBuilder::new(codes::PROTOCOL_REJECT, 9)
        .raw_data(&data)
        .build();
    let frame = PppBuilder::new(protocols::LCP).payload(&packet).build();
    let actions = wire.links[A].input(&frame);
    wire.absorb(A, actions);

    assert!(wire.events[A].contains(&LinkEvent::NetworkDown));
    assert!(wire.events[A].contains(&LinkEvent::Failed {
        protocol: protocols::IPCP,
        reason: FailureReason::ProtocolRejected,
    }));

    // Once IPCP has finished there is nothing left to carry
    wire.pump();
    assert_eq!(wire.links[A].ipcp().state(), FsmState::Starting);
    assert_eq!(wire.links[A].lcp().state(), FsmState::Closed);
    assert_eq!(wire.links[A].phase(), Phase::Dead);
}

#[test]
fn test_peer_renegotiation_returns_to_establish() {
    let mut wire = Wire::shared(server(), client("bob"), &[]);
    wire.start();
    assert!(wire.links[A].is_network_up());

    let packet =
        pppcp::protocol::control::ControlBuilder::new(codes::CONFIGURE_REQUEST, 50).build();
    let frame = PppBuilder::new(protocols::LCP).payload(&packet).build();
    let actions = wire.links[A].input(&frame);
    wire.absorb(A, actions);
    assert_eq!(wire.links[A].lcp().state(), FsmState::AckSent);
    assert_eq!(wire.links[A].phase(), Phase::Establish);

    wire.pump();
    for side in [A, B] {
        assert_eq!(wire.links[side].lcp().state(), FsmState::Opened);
        assert!(wire.links[side].is_network_up());
    }
}

#[test]
fn test_close_and_reopen() {
    let mut wire = Wire::shared(server(), client("bob"), &[]);
    wire.start();

    let actions = wire.links[A].close();
    wire.absorb(A, actions);
    wire.pump();
    assert_eq!(wire.links[A].phase(), Phase::Dead);
    assert!(wire.events[B].contains(&LinkEvent::NetworkDown));

    // B's Stopping state ends with its restart timer
    wire.fire(B, TimerId::Lcp(FsmTimer::Restart));
    assert_eq!(wire.links[B].lcp().state(), FsmState::Stopped);

    for side in [A, B] {
        wire.events[side].clear();
    }
    let actions = wire.links[A].open();
    wire.absorb(A, actions);
    assert_eq!(wire.links[A].phase(), Phase::Establish);
    wire.pump();

    assert!(wire.links[A].is_network_up());
    assert!(wire.links[B].is_network_up());
}
