use super::*;
use crate::protocol::control::ControlBuilder;
use crate::protocol::options::{ConfigOption, OptionValue};
use crate::Result;

/// Minimal protocol: we ask for option 1 carrying a u32, the peer may send
/// option 1 too. Value 0xdead is unacceptable and Nak'd with 1.
#[derive(Debug, Default)]
struct TestProto {
    value: u32,
    acked: bool,
    peer_value: Option<u32>,
    configured: u32,
}

const OPT: u8 = 1;
const BAD: u32 = 0xdead;
const MAGIC: u32 = 0x0102_0304;

impl FsmProtocol for TestProto {
    fn name(&self) -> &'static str {
        "TEST"
    }

    fn protocol(&self) -> u16 {
        0x8001
    }

    fn is_known_code(&self, code: u8) -> bool {
        (1..=codes::TIME_REMAINING).contains(&code)
    }

    fn configure(&mut self) {
        self.configured += 1;
        self.value = 7;
        self.acked = false;
    }

    fn unconfigure(&mut self) {
        self.acked = false;
        self.peer_value = None;
    }

    fn build_request(&mut self, out: &mut OptionWriter) -> Result<()> {
        out.push(OPT, OptionValue::U32(self.value))
    }

    fn reset_peer(&mut self) {
        self.peer_value = None;
    }

    fn check_option(&mut self, opt: &ConfigOption<'_>) -> OptionVerdict {
        match (opt.opt_type, opt.as_u32()) {
            (OPT, Some(BAD)) => OptionVerdict::Nak(1u32.to_be_bytes().to_vec()),
            (OPT, Some(v)) => {
                self.peer_value = Some(v);
                OptionVerdict::Ack
            }
            _ => OptionVerdict::Reject,
        }
    }

    fn recv_ack(&mut self) {
        self.acked = true;
    }

    fn recv_nak(&mut self, opt: &ConfigOption<'_>) {
        if let Some(v) = opt.as_u32() {
            self.value = v;
        }
    }

    fn recv_reject(&mut self, _opt: &ConfigOption<'_>) {}

    fn local_magic(&self) -> u32 {
        MAGIC
    }
}

fn pkt(code: u8, id: u8, data: &[u8]) -> Vec<u8> {
    ControlBuilder::new(code, id).raw_data(data).build()
}

fn opt(value: u32) -> Vec<u8> {
    let mut v = vec![OPT, 6];
    v.extend_from_slice(&value.to_be_bytes());
    v
}

fn sent(actions: &[FsmAction], want: u8) -> Vec<(u8, Vec<u8>)> {
    actions
        .iter()
        .filter_map(|a| match a {
            FsmAction::Send { code, id, data } if *code == want => Some((*id, data.clone())),
            _ => None,
        })
        .collect()
}

fn count(actions: &[FsmAction], want: &FsmAction) -> usize {
    actions.iter().filter(|a| *a == want).count()
}

fn new_fsm() -> Fsm<TestProto> {
    Fsm::new("test0", TestProto::default(), &FsmConfig::default())
}

/// Closed -> open, returning the first Configure-Request
fn started(fsm: &mut Fsm<TestProto>) -> (u8, Vec<u8>) {
    fsm.lower_up();
    let actions = fsm.open();
    sent(&actions, codes::CONFIGURE_REQUEST).remove(0)
}

fn opened(fsm: &mut Fsm<TestProto>) -> Vec<FsmAction> {
    let (id, data) = started(fsm);
    let mut actions = fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    actions.extend(fsm.input(&pkt(codes::CONFIGURE_REQUEST, 1, &opt(9))));
    actions
}

#[test]
fn test_open_from_closed_sends_first_request() {
    let mut fsm = new_fsm();
    assert!(fsm.lower_up().is_empty());
    assert_eq!(fsm.state(), FsmState::Closed);

    let actions = fsm.open();
    assert_eq!(fsm.state(), FsmState::ReqSent);
    assert_eq!(actions[0], FsmAction::LayerStart);
    assert_eq!(
        sent(&actions, codes::CONFIGURE_REQUEST),
        vec![(1, opt(7))]
    );
    assert!(actions.contains(&FsmAction::StartTimer {
        timer: FsmTimer::Restart,
        after: Duration::from_millis(3000),
        recurring: false,
    }));
    assert_eq!(fsm.restart_counter(), 9);
}

#[test]
fn test_open_from_initial_waits_for_lower_layer() {
    let mut fsm = new_fsm();
    assert_eq!(fsm.open(), vec![FsmAction::LayerStart]);
    assert_eq!(fsm.state(), FsmState::Starting);

    let actions = fsm.lower_up();
    assert_eq!(fsm.state(), FsmState::ReqSent);
    assert_eq!(sent(&actions, codes::CONFIGURE_REQUEST).len(), 1);
}

#[test]
fn test_ack_then_request_opens_once() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);

    let actions = fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    assert_eq!(fsm.state(), FsmState::AckRcvd);
    assert!(fsm.protocol().acked);
    assert_eq!(count(&actions, &FsmAction::LayerUp), 0);

    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 1, &opt(9)));
    assert_eq!(fsm.state(), FsmState::Opened);
    assert_eq!(sent(&actions, codes::CONFIGURE_ACK), vec![(1, opt(9))]);
    assert_eq!(count(&actions, &FsmAction::LayerUp), 1);
    assert!(actions.contains(&FsmAction::StopTimer(FsmTimer::Restart)));
    assert_eq!(fsm.protocol().peer_value, Some(9));
}

#[test]
fn test_request_then_ack_opens_once() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);

    fsm.input(&pkt(codes::CONFIGURE_REQUEST, 4, &opt(9)));
    assert_eq!(fsm.state(), FsmState::AckSent);

    let actions = fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    assert_eq!(fsm.state(), FsmState::Opened);
    assert_eq!(count(&actions, &FsmAction::LayerUp), 1);
}

#[test]
fn test_ack_with_wrong_id_is_ignored() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);

    let actions = fsm.input(&pkt(codes::CONFIGURE_ACK, id.wrapping_add(5), &data));
    assert!(actions.is_empty());
    assert_eq!(fsm.state(), FsmState::ReqSent);
    assert!(!fsm.protocol().acked);
}

#[test]
fn test_ack_with_different_options_is_ignored() {
    let mut fsm = new_fsm();
    let (id, _) = started(&mut fsm);

    let actions = fsm.input(&pkt(codes::CONFIGURE_ACK, id, &opt(8)));
    assert!(actions.is_empty());
    assert_eq!(fsm.state(), FsmState::ReqSent);
}

#[test]
fn test_duplicate_ack_is_ignored() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);
    fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));

    let actions = fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    assert!(actions.is_empty());
    assert_eq!(fsm.state(), FsmState::AckRcvd);
}

#[test]
fn test_ack_of_retransmission_after_ackrcvd_timeout() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);
    fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    assert_eq!(fsm.state(), FsmState::AckRcvd);

    // Peer's own request was lost; our timer resends the same request
    let actions = fsm.restart_timeout();
    assert_eq!(sent(&actions, codes::CONFIGURE_REQUEST), vec![(id, data.clone())]);
    assert_eq!(fsm.state(), FsmState::ReqSent);

    fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    assert_eq!(fsm.state(), FsmState::AckRcvd);

    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 1, &opt(9)));
    assert_eq!(fsm.state(), FsmState::Opened);
    assert_eq!(count(&actions, &FsmAction::LayerUp), 1);
}

#[test]
fn test_ack_after_terminate_request_in_ackrcvd() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);
    fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));

    fsm.input(&pkt(codes::TERMINATE_REQUEST, 3, &[]));
    assert_eq!(fsm.state(), FsmState::ReqSent);

    fsm.input(&pkt(codes::CONFIGURE_ACK, id, &data));
    assert_eq!(fsm.state(), FsmState::AckRcvd);
}

#[test]
fn test_options_beyond_cap_are_rejected() {
    let mut fsm = new_fsm();
    started(&mut fsm);

    let mut request: Vec<u8> = (0..32).flat_map(|_| opt(9)).collect();
    request.extend_from_slice(&[99, 2]);
    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 2, &request));

    assert!(sent(&actions, codes::CONFIGURE_ACK).is_empty());
    assert_eq!(sent(&actions, codes::CONFIGURE_REJECT), vec![(2, vec![99, 2])]);
    assert_eq!(fsm.state(), FsmState::ReqSent);
}

#[test]
fn test_retransmission_reuses_identifier() {
    let mut fsm = new_fsm();
    let (id, data) = started(&mut fsm);

    let actions = fsm.restart_timeout();
    assert_eq!(sent(&actions, codes::CONFIGURE_REQUEST), vec![(id, data)]);
    assert_eq!(fsm.restart_counter(), 8);
    assert_eq!(fsm.state(), FsmState::ReqSent);
}

#[test]
fn test_silent_peer_exhausts_restart_counter() {
    let mut fsm = new_fsm();
    started(&mut fsm);

    let mut requests = 1;
    loop {
        let actions = fsm.restart_timeout();
        if actions.contains(&FsmAction::Failed(FailureReason::NegotFailure)) {
            assert!(actions.contains(&FsmAction::LayerFinish));
            break;
        }
        requests += sent(&actions, codes::CONFIGURE_REQUEST).len();
        assert!(requests <= 10);
    }
    assert_eq!(requests, 10);
    assert_eq!(fsm.state(), FsmState::Stopped);
    assert_eq!(fsm.last_failure(), Some(FailureReason::NegotFailure));
}

#[test]
fn test_stale_restart_timer_is_ignored() {
    let mut fsm = new_fsm();
    opened(&mut fsm);
    assert!(fsm.restart_timeout().is_empty());
    assert_eq!(fsm.state(), FsmState::Opened);
}

#[test]
fn test_nak_adopts_suggestion_with_new_identifier() {
    let mut fsm = new_fsm();
    let (id, _) = started(&mut fsm);

    let actions = fsm.input(&pkt(codes::CONFIGURE_NAK, id, &opt(42)));
    assert_eq!(
        sent(&actions, codes::CONFIGURE_REQUEST),
        vec![(id + 1, opt(42))]
    );
    assert_eq!(fsm.request_id(), id + 1);
    assert_eq!(fsm.state(), FsmState::ReqSent);
    assert_eq!(fsm.protocol().configured, 1);
}

#[test]
fn test_endless_naks_fail_once() {
    let mut fsm = new_fsm();
    started(&mut fsm);

    for _ in 1..10 {
        let actions = fsm.input(&pkt(codes::CONFIGURE_NAK, fsm.request_id(), &opt(3)));
        assert_eq!(sent(&actions, codes::CONFIGURE_REQUEST).len(), 1);
        assert_eq!(fsm.state(), FsmState::ReqSent);
    }

    let actions = fsm.input(&pkt(codes::CONFIGURE_NAK, fsm.request_id(), &opt(3)));
    assert_eq!(
        count(&actions, &FsmAction::Failed(FailureReason::NegotFailure)),
        1
    );
    assert!(sent(&actions, codes::CONFIGURE_REQUEST).is_empty());
    assert_eq!(fsm.state(), FsmState::Stopped);
}

#[test]
fn test_unacceptable_peer_requests_fail_after_budget() {
    let mut fsm = new_fsm();
    started(&mut fsm);
    let mut bad = opt(BAD);
    bad.extend_from_slice(&[99, 2]);

    for id in 1..5 {
        let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, id, &bad));
        // Reject takes precedence over Nak
        assert_eq!(sent(&actions, codes::CONFIGURE_REJECT), vec![(id, vec![99, 2])]);
        assert!(sent(&actions, codes::CONFIGURE_NAK).is_empty());
    }

    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 5, &bad));
    assert!(actions.contains(&FsmAction::Failed(FailureReason::NegotFailure)));
    assert!(sent(&actions, codes::CONFIGURE_REJECT).is_empty());
    assert_eq!(fsm.state(), FsmState::Stopped);
}

#[test]
fn test_nak_suggests_value() {
    let mut fsm = new_fsm();
    started(&mut fsm);

    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 3, &opt(BAD)));
    assert_eq!(sent(&actions, codes::CONFIGURE_NAK), vec![(3, opt(1))]);
    assert_eq!(fsm.state(), FsmState::ReqSent);
}

#[test]
fn test_close_from_opened() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.close();
    assert_eq!(fsm.state(), FsmState::Closing);
    assert_eq!(count(&actions, &FsmAction::LayerDown), 1);
    let terms = sent(&actions, codes::TERMINATE_REQUEST);
    assert_eq!(terms.len(), 1);
    assert_eq!(terms[0].1, b"User request".to_vec());

    let actions = fsm.input(&pkt(codes::TERMINATE_ACK, terms[0].0, &[]));
    assert_eq!(fsm.state(), FsmState::Closed);
    assert!(actions.contains(&FsmAction::LayerFinish));
}

#[test]
fn test_close_without_terminate_ack_times_out() {
    let mut fsm = new_fsm();
    opened(&mut fsm);
    fsm.close();

    // max_terminate = 2: one retransmission, then give up
    let actions = fsm.restart_timeout();
    assert_eq!(sent(&actions, codes::TERMINATE_REQUEST).len(), 1);
    let actions = fsm.restart_timeout();
    assert!(actions.contains(&FsmAction::LayerFinish));
    assert_eq!(fsm.state(), FsmState::Closed);
}

#[test]
fn test_peer_terminate_in_opened() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.input(&pkt(codes::TERMINATE_REQUEST, 33, b"bye"));
    assert_eq!(fsm.state(), FsmState::Stopping);
    assert_eq!(count(&actions, &FsmAction::LayerDown), 1);
    assert_eq!(sent(&actions, codes::TERMINATE_ACK), vec![(33, vec![])]);
    assert_eq!(fsm.restart_counter(), 0);

    let actions = fsm.restart_timeout();
    assert!(actions.contains(&FsmAction::LayerFinish));
    assert_eq!(fsm.state(), FsmState::Stopped);
}

#[test]
fn test_renegotiation_in_opened() {
    let mut fsm = new_fsm();
    opened(&mut fsm);
    let before = fsm.request_id();

    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 2, &opt(11)));
    assert_eq!(count(&actions, &FsmAction::LayerDown), 1);
    assert_eq!(sent(&actions, codes::CONFIGURE_REQUEST).len(), 1);
    assert_eq!(sent(&actions, codes::CONFIGURE_ACK), vec![(2, opt(11))]);
    assert_eq!(fsm.request_id(), before + 1);
    assert_eq!(fsm.state(), FsmState::AckSent);
    assert_eq!(fsm.protocol().configured, 2);
}

#[test]
fn test_lower_down_in_opened() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.lower_down();
    assert_eq!(count(&actions, &FsmAction::LayerDown), 1);
    assert_eq!(fsm.state(), FsmState::Starting);
    assert!(fsm.input(&pkt(codes::CONFIGURE_REQUEST, 1, &opt(1))).is_empty());
}

#[test]
fn test_closed_answers_request_with_terminate_ack() {
    let mut fsm = new_fsm();
    fsm.lower_up();

    let actions = fsm.input(&pkt(codes::CONFIGURE_REQUEST, 8, &opt(1)));
    assert_eq!(sent(&actions, codes::TERMINATE_ACK), vec![(8, vec![])]);
    assert_eq!(fsm.state(), FsmState::Closed);
}

#[test]
fn test_unknown_code_is_rejected() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let raw = pkt(42, 9, &[1, 2, 3]);
    let actions = fsm.input(&raw);
    let rejects = sent(&actions, codes::CODE_REJECT);
    assert_eq!(rejects.len(), 1);
    assert_eq!(rejects[0].1, raw);
    assert_eq!(fsm.state(), FsmState::Opened);
}

#[test]
fn test_fatal_code_reject() {
    let mut fsm = new_fsm();
    started(&mut fsm);

    let actions = fsm.input(&pkt(codes::CODE_REJECT, 1, &pkt(codes::CONFIGURE_REQUEST, 1, &[])));
    assert!(actions.contains(&FsmAction::Failed(FailureReason::CodeRejected)));
    assert_eq!(fsm.state(), FsmState::Stopped);
}

#[test]
fn test_tolerated_code_reject() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.input(&pkt(codes::CODE_REJECT, 1, &pkt(codes::ECHO_REQUEST, 1, &[0; 4])));
    assert!(actions.is_empty());
    assert_eq!(fsm.state(), FsmState::Opened);
}

#[test]
fn test_protocol_reject_is_reported() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.input(&pkt(codes::PROTOCOL_REJECT, 1, &[0x80, 0x21, 1, 1, 0, 4]));
    assert_eq!(actions, vec![FsmAction::ProtocolRejected(0x8021)]);
}

#[test]
fn test_send_protocol_reject_only_when_opened() {
    let mut fsm = new_fsm();
    started(&mut fsm);
    assert!(fsm.send_protocol_reject(0x8057, &[1, 2]).is_empty());

    fsm.input(&pkt(codes::CONFIGURE_ACK, 1, &opt(7)));
    fsm.input(&pkt(codes::CONFIGURE_REQUEST, 1, &opt(9)));
    let actions = fsm.send_protocol_reject(0x8057, &[1, 2]);
    assert_eq!(
        sent(&actions, codes::PROTOCOL_REJECT),
        vec![(1, vec![0x80, 0x57, 1, 2])]
    );
}

#[test]
fn test_echo_request_answered_with_local_magic() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.input(&pkt(codes::ECHO_REQUEST, 17, &[0, 0, 0, 0, 0xaa]));
    let mut expected = MAGIC.to_be_bytes().to_vec();
    expected.push(0xaa);
    assert_eq!(sent(&actions, codes::ECHO_REPLY), vec![(17, expected)]);
}

#[test]
fn test_echo_request_before_opened_is_ignored() {
    let mut fsm = new_fsm();
    started(&mut fsm);
    assert!(fsm.input(&pkt(codes::ECHO_REQUEST, 1, &[0; 4])).is_empty());
}

#[test]
fn test_short_echo_is_dropped() {
    let mut fsm = new_fsm();
    opened(&mut fsm);
    assert!(fsm.input(&pkt(codes::ECHO_REQUEST, 1, &[0, 0])).is_empty());
}

fn with_echo() -> Fsm<TestProto> {
    new_fsm().with_echo(Some(EchoSettings {
        interval: Duration::from_secs(10),
        max: Duration::from_secs(30),
    }))
}

#[test]
fn test_echo_timer_runs_while_opened() {
    let mut fsm = with_echo();
    let actions = opened(&mut fsm);
    assert!(actions.contains(&FsmAction::StartTimer {
        timer: FsmTimer::Echo,
        after: Duration::from_secs(10),
        recurring: true,
    }));

    let actions = fsm.close();
    assert!(actions.contains(&FsmAction::StopTimer(FsmTimer::Echo)));
}

#[test]
fn test_echo_timeout_after_silence() {
    let mut fsm = with_echo();
    opened(&mut fsm);
    fsm.set_idle_snapshot(5);

    let first = fsm.echo_timeout(5);
    assert_eq!(sent(&first, codes::ECHO_REQUEST).len(), 1);
    assert!(fsm.echo_timeout(5).is_empty());

    let actions = fsm.echo_timeout(5);
    assert_eq!(
        count(&actions, &FsmAction::Failed(FailureReason::EchoTimeout)),
        1
    );
    assert_eq!(count(&actions, &FsmAction::LayerDown), 1);
    assert_eq!(sent(&actions, codes::TERMINATE_REQUEST).len(), 1);
    assert_eq!(fsm.state(), FsmState::Stopping);

    // Timer stopped; a late tick changes nothing
    assert!(fsm.echo_timeout(5).is_empty());
}

#[test]
fn test_echo_traffic_resets_silence() {
    let mut fsm = with_echo();
    opened(&mut fsm);

    fsm.echo_timeout(0);
    fsm.echo_timeout(0);
    assert!(fsm.echo_timeout(1).is_empty());
    fsm.echo_timeout(1);
    fsm.echo_timeout(1);
    assert_eq!(fsm.state(), FsmState::Opened);

    let reply = fsm.input(&pkt(codes::ECHO_REPLY, 1, &[0, 0, 0, 0]));
    assert!(reply.is_empty());
    fsm.echo_timeout(1);
    assert_eq!(fsm.state(), FsmState::Opened);
}

#[test]
fn test_identification_and_time_remaining() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    fsm.input(&pkt(codes::IDENTIFICATION, 1, b"\0\0\0\0pppd 2.5"));
    assert_eq!(fsm.peer_ident(), Some("pppd 2.5"));

    fsm.input(&pkt(codes::TIME_REMAINING, 2, &[0, 0, 0, 0, 0, 0, 0x0e, 0x10]));
    assert_eq!(fsm.time_remaining(), Some(3600));
}

#[test]
fn test_passive_failure_keeps_lower_layer() {
    let config = FsmConfig {
        passive: true,
        ..FsmConfig::default()
    };
    let mut fsm = Fsm::new("test0", TestProto::default(), &config);
    started(&mut fsm);

    let actions = fsm.failure(FailureReason::ProtocolRejected);
    assert!(!actions.contains(&FsmAction::LayerFinish));
    assert_eq!(fsm.state(), FsmState::Stopped);
}

#[test]
fn test_failure_in_opened_terminates_with_reason() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    let actions = fsm.failure(FailureReason::BadMagic);
    let terms = sent(&actions, codes::TERMINATE_REQUEST);
    assert_eq!(terms[0].1, b"bad magic number".to_vec());
    assert_eq!(fsm.state(), FsmState::Stopping);
}

#[test]
fn test_malformed_packets_are_dropped() {
    let mut fsm = new_fsm();
    opened(&mut fsm);

    assert!(fsm.input(&[1, 2]).is_empty());
    // Length field larger than the buffer
    assert!(fsm.input(&[1, 2, 0, 40, 1, 6]).is_empty());
    assert_eq!(fsm.state(), FsmState::Opened);
}

#[test]
fn test_every_code_in_every_state_is_handled() {
    let setups: [fn(&mut Fsm<TestProto>); 5] = [
        |_| {},
        |f| {
            f.lower_up();
        },
        |f| {
            started(f);
        },
        |f| {
            opened(f);
        },
        |f| {
            opened(f);
            f.close();
        },
    ];
    for setup in setups {
        for code in 0..=u8::MAX {
            let mut fsm = new_fsm();
            setup(&mut fsm);
            fsm.input(&pkt(code, 1, &[]));
            fsm.input(&pkt(code, 1, &[0, 0, 0, 0, 1, 6, 0, 0, 0, 1]));
            fsm.restart_timeout();
            fsm.echo_timeout(0);
        }
    }
}
