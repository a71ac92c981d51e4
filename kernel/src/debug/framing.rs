//! Byte-oriented GDB remote-serial-protocol framing (§4.9): turns a raw byte stream
//! into `{Ack, Nak, Interrupt, Packet}` events. A packet is `$<data>#<2 hex checksum>`,
//! where `<data>` may contain the escape byte `0x7D` followed by a byte XORed with
//! `0x20` (so `$`, `#`, and `0x7D` itself can appear in the payload). The checksum is
//! the sum of the *unescaped* payload bytes mod 256.
//!
//! Kept free of any kernel dependency so it can be driven directly from host tests.

use alloc::vec::Vec;

#[derive(Debug, PartialEq, Eq)]
pub enum FrameEvent {
    Ack,
    Nak,
    Interrupt,
    Packet(Vec<u8>),
    /// A byte was consumed but didn't complete anything observable yet.
    Pending,
}

enum FramerState {
    Init,
    Data(Vec<u8>),
    Escaped(Vec<u8>),
    Checksum1(Vec<u8>),
    Checksum2(Vec<u8>, u8),
}

pub struct Framer {
    state: FramerState,
}

impl Framer {
    pub const fn new() -> Self {
        Self {
            state: FramerState::Init,
        }
    }

    pub fn feed(&mut self, byte: u8) -> FrameEvent {
        match core::mem::replace(&mut self.state, FramerState::Init) {
            FramerState::Init => match byte {
                b'+' => FrameEvent::Ack,
                b'-' => FrameEvent::Nak,
                0x03 => FrameEvent::Interrupt,
                b'$' => {
                    self.state = FramerState::Data(Vec::new());
                    FrameEvent::Pending
                }
                _ => FrameEvent::Pending, // stray byte outside a packet; ignore
            },
            FramerState::Data(mut buf) => match byte {
                b'#' => {
                    self.state = FramerState::Checksum1(buf);
                    FrameEvent::Pending
                }
                0x7D => {
                    self.state = FramerState::Escaped(buf);
                    FrameEvent::Pending
                }
                b => {
                    buf.push(b);
                    self.state = FramerState::Data(buf);
                    FrameEvent::Pending
                }
            },
            FramerState::Escaped(mut buf) => {
                buf.push(byte ^ 0x20);
                self.state = FramerState::Data(buf);
                FrameEvent::Pending
            }
            FramerState::Checksum1(buf) => match hex_digit(byte) {
                Some(hi) => {
                    self.state = FramerState::Checksum2(buf, hi);
                    FrameEvent::Pending
                }
                None => FrameEvent::Nak,
            },
            FramerState::Checksum2(buf, hi) => match hex_digit(byte) {
                Some(lo) => {
                    let expected = (hi << 4) | lo;
                    if expected == checksum(&buf) {
                        FrameEvent::Packet(buf)
                    } else {
                        FrameEvent::Nak
                    }
                }
                None => FrameEvent::Nak,
            },
        }
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn hex_char(nibble: u8) -> u8 {
    match nibble {
        0..=9 => b'0' + nibble,
        _ => b'a' + (nibble - 10),
    }
}

/// Frames `payload` into `$<escaped payload>#<checksum>`, escaping `$`, `#`, and the
/// escape byte itself.
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(b'$');
    for &b in payload {
        if b == b'$' || b == b'#' || b == 0x7D {
            out.push(0x7D);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out.push(b'#');
    let cs = checksum(payload);
    out.push(hex_char((cs >> 4) & 0xF));
    out.push(hex_char(cs & 0xF));
    out
}

/// Feeds every byte of a complete, already-framed packet through a fresh `Framer` and
/// returns the decoded payload, panicking if `bytes` isn't exactly one valid packet.
/// Test-only: production code drives `Framer::feed` one byte at a time as bytes arrive
/// off the wire.
#[cfg(test)]
fn decode_packet(bytes: &[u8]) -> Vec<u8> {
    let mut framer = Framer::new();
    let mut last = FrameEvent::Pending;
    for &b in bytes {
        last = framer.feed(b);
    }
    match last {
        FrameEvent::Packet(payload) => payload,
        other => panic!("expected a decoded packet, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn encode_then_decode_round_trips_arbitrary_payloads() {
        let payloads: [&[u8]; 4] = [b"", b"hello", b"$#}weird$$bytes##", &[0x7D, 0x00, 0xFF]];
        for payload in payloads {
            let framed = encode_packet(payload);
            assert_eq!(decode_packet(&framed), payload);
        }
    }

    #[test]
    fn bad_checksum_is_rejected_with_nak() {
        let mut framed = encode_packet(b"hello");
        let last = framed.len() - 1;
        framed[last] = if framed[last] == b'0' { b'1' } else { b'0' };

        let mut framer = Framer::new();
        let mut last_event = FrameEvent::Pending;
        for &b in &framed {
            last_event = framer.feed(b);
        }
        assert_eq!(last_event, FrameEvent::Nak);
    }

    #[test]
    fn plus_minus_and_interrupt_are_recognised_outside_a_packet() {
        let mut framer = Framer::new();
        assert_eq!(framer.feed(b'+'), FrameEvent::Ack);
        assert_eq!(framer.feed(b'-'), FrameEvent::Nak);
        assert_eq!(framer.feed(0x03), FrameEvent::Interrupt);
    }

    #[test]
    fn malformed_input_leaves_the_framer_ready_for_the_next_packet() {
        let mut framer = Framer::new();
        // Bogus checksum digit resets to Init per the Checksum1/Checksum2 `None` arms.
        assert_eq!(framer.feed(b'$'), FrameEvent::Pending);
        assert_eq!(framer.feed(b'x'), FrameEvent::Pending);
        assert_eq!(framer.feed(b'#'), FrameEvent::Pending);
        assert_eq!(framer.feed(b'z'), FrameEvent::Nak);

        // The framer is back in Init and can decode a fresh packet normally.
        let framed = encode_packet(b"ok");
        let mut last = FrameEvent::Pending;
        for &b in &framed {
            last = framer.feed(b);
        }
        assert_eq!(last, FrameEvent::Packet(b"ok".to_vec()));
    }
}
