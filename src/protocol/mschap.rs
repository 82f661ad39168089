//! MS-CHAP (RFC 2433) and MS-CHAPv2 (RFC 2759)
//!
//! Hash primitives and the 49-byte response value layouts. Both variants
//! ride inside an ordinary CHAP Response, see [`chap`](super::chap).

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use md4::{Digest, Md4};
use sha1::Sha1;
use std::fmt::Write;

/// MS-CHAP challenge length
pub const MSCHAP_CHALLENGE_LEN: usize = 8;

/// MS-CHAPv2 challenge length (authenticator and peer)
pub const MSCHAPV2_CHALLENGE_LEN: usize = 16;

/// Response value length for both variants
pub const RESPONSE_LEN: usize = 49;

/// NT-Response length
pub const NT_RESPONSE_LEN: usize = 24;

/// Authenticator response length ("S=" + 40 hex digits)
pub const AUTHENTICATOR_RESPONSE_LEN: usize = 42;

/// Longest failure message we put on the wire
pub const MAX_FAILURE_MESSAGE: usize = 128;

/// Windows "authentication failure" error code
pub const ERROR_AUTHENTICATION_FAILURE: u32 = 691;

const MAGIC1: &[u8] = b"Magic server to client signing constant";
const MAGIC2: &[u8] = b"Pad to make it do more than one iteration";

/// MD4 of the UTF-16LE encoded password
pub fn nt_password_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    for unit in password.encode_utf16() {
        hasher.update(unit.to_le_bytes());
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// MD4 of a password hash
pub fn hash_nt_password_hash(password_hash: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(password_hash));
    out
}

// Spread 56 key bits over 8 bytes, leaving the low (parity) bit of each clear
fn des_key(input: &[u8]) -> [u8; 8] {
    [
        input[0] & 0xfe,
        (input[0] << 7) | (input[1] >> 1),
        (input[1] << 6) | (input[2] >> 2),
        (input[2] << 5) | (input[3] >> 3),
        (input[3] << 4) | (input[4] >> 4),
        (input[4] << 3) | (input[5] >> 5),
        (input[5] << 2) | (input[6] >> 6),
        input[6] << 1,
    ]
}

fn des_encrypt(clear: &[u8; 8], key7: &[u8]) -> [u8; 8] {
    let key = des_key(key7);
    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut block = GenericArray::clone_from_slice(clear);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; 8];
    out.copy_from_slice(&block);
    out
}

/// DES-encrypt the challenge under three keys cut from the zero-padded hash
pub fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; 24] {
    let mut zpwd = [0u8; 21];
    zpwd[..16].copy_from_slice(password_hash);

    let mut out = [0u8; 24];
    for (i, chunk) in zpwd.chunks(7).enumerate() {
        out[i * 8..i * 8 + 8].copy_from_slice(&des_encrypt(challenge, chunk));
    }
    out
}

/// Drop a leading `DOMAIN\` from a user name
pub fn strip_domain(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b'\\') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// First 8 bytes of SHA1(peer challenge + authenticator challenge + user)
///
/// Any domain prefix on the user name is ignored.
pub fn challenge_hash(
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    user: &[u8],
) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(auth_challenge);
    hasher.update(strip_domain(user));
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// MS-CHAP NT-Response
pub fn nt_response_v1(challenge: &[u8; 8], password: &str) -> [u8; 24] {
    challenge_response(challenge, &nt_password_hash(password))
}

/// MS-CHAPv2 NT-Response
pub fn nt_response_v2(
    auth_challenge: &[u8; 16],
    peer_challenge: &[u8; 16],
    user: &[u8],
    password: &str,
) -> [u8; 24] {
    let challenge = challenge_hash(peer_challenge, auth_challenge, user);
    challenge_response(&challenge, &nt_password_hash(password))
}

/// MS-CHAPv2 authenticator response, `S=` followed by 40 uppercase hex digits
pub fn authenticator_response(
    password: &str,
    nt_response: &[u8; 24],
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    user: &[u8],
) -> String {
    let hash_hash = hash_nt_password_hash(&nt_password_hash(password));

    let mut hasher = Sha1::new();
    hasher.update(hash_hash);
    hasher.update(nt_response);
    hasher.update(MAGIC1);
    let digest = hasher.finalize();

    let challenge = challenge_hash(peer_challenge, auth_challenge, user);
    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(challenge);
    hasher.update(MAGIC2);
    let digest = hasher.finalize();

    let mut out = String::with_capacity(AUTHENTICATOR_RESPONSE_LEN);
    out.push_str("S=");
    out.push_str(&hex_upper(&digest));
    out
}

/// Check the `S=` proof at the front of an MS-CHAPv2 Success message
pub fn verify_authenticator_response(message: &[u8], expected: &str) -> bool {
    message.len() >= AUTHENTICATOR_RESPONSE_LEN
        && message[..AUTHENTICATOR_RESPONSE_LEN].eq_ignore_ascii_case(expected.as_bytes())
}

/// MS-CHAPv2 Success message
pub fn success_message_v2(auth_response: &str, text: &str) -> String {
    format!("{} M={}", auth_response, text)
}

/// MS-CHAP Failure message
pub fn failure_message_v1() -> String {
    format!("E={} R=1", ERROR_AUTHENTICATION_FAILURE)
}

/// MS-CHAPv2 Failure message, clipped to [`MAX_FAILURE_MESSAGE`]
pub fn failure_message_v2(auth_challenge: &[u8], text: &str) -> String {
    let mut msg = format!(
        "E={} R=0 C={} V=3 M={}",
        ERROR_AUTHENTICATION_FAILURE,
        hex_upper(auth_challenge),
        text
    );
    if msg.len() > MAX_FAILURE_MESSAGE {
        let mut end = MAX_FAILURE_MESSAGE;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg.truncate(end);
    }
    msg
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// MS-CHAP response value
///
/// Layout: LM-Response (24) + NT-Response (24) + Use-NT flag (1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsChapResponse {
    pub lm_response: [u8; 24],
    pub nt_response: [u8; 24],
    pub use_nt: bool,
}

impl MsChapResponse {
    /// Response carrying only the NT half; the LM half stays zeroed
    pub fn new(challenge: &[u8; 8], password: &str) -> Self {
        Self {
            lm_response: [0; 24],
            nt_response: nt_response_v1(challenge, password),
            use_nt: true,
        }
    }

    pub fn decode(value: &[u8]) -> Option<Self> {
        if value.len() != RESPONSE_LEN {
            return None;
        }
        let mut lm_response = [0u8; 24];
        let mut nt_response = [0u8; 24];
        lm_response.copy_from_slice(&value[0..24]);
        nt_response.copy_from_slice(&value[24..48]);
        Some(Self {
            lm_response,
            nt_response,
            use_nt: value[48] != 0,
        })
    }

    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let mut out = [0u8; RESPONSE_LEN];
        out[0..24].copy_from_slice(&self.lm_response);
        out[24..48].copy_from_slice(&self.nt_response);
        out[48] = self.use_nt as u8;
        out
    }
}

/// MS-CHAPv2 response value
///
/// Layout: Peer-Challenge (16) + Reserved (8, zero) + NT-Response (24) + Flags (1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsChapV2Response {
    pub peer_challenge: [u8; 16],
    pub nt_response: [u8; 24],
    pub flags: u8,
}

impl MsChapV2Response {
    pub fn new(
        auth_challenge: &[u8; 16],
        peer_challenge: [u8; 16],
        user: &[u8],
        password: &str,
    ) -> Self {
        Self {
            nt_response: nt_response_v2(auth_challenge, &peer_challenge, user, password),
            peer_challenge,
            flags: 0,
        }
    }

    pub fn decode(value: &[u8]) -> Option<Self> {
        if value.len() != RESPONSE_LEN {
            return None;
        }
        let mut peer_challenge = [0u8; 16];
        let mut nt_response = [0u8; 24];
        peer_challenge.copy_from_slice(&value[0..16]);
        nt_response.copy_from_slice(&value[24..48]);
        Some(Self {
            peer_challenge,
            nt_response,
            flags: value[48],
        })
    }

    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let mut out = [0u8; RESPONSE_LEN];
        out[0..16].copy_from_slice(&self.peer_challenge);
        out[24..48].copy_from_slice(&self.nt_response);
        out[48] = self.flags;
        out
    }
}
