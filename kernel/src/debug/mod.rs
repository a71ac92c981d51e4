//! Remote-debug protocol stub (§4.9): a GDB-remote-serial-protocol target. [`framing`]
//! turns the serial byte stream into packets; this module dispatches the commands a
//! debugger actually sends to one (register file, single software-breakpoint table,
//! memory read/write) and drives the stub's own state machine (`INIT` → `INTERACTIVE`
//! → `RUNNING`).
//!
//! Wiring a live serial RX interrupt and an int3/single-step exception handler into
//! `GdbStub::dispatch` is the remaining integration work; `service_one_byte` is the
//! intended entry point for that handler once it exists (see DESIGN.md).

pub mod framing;

use crate::{
    error::DebugError,
    memory::address_space::AddressSpace,
    serial::SERIAL,
};
use alloc::{string::String, vec::Vec};
use framing::{FrameEvent, Framer};
use x86_64::{
    memory::{Page, Size4KiB, VirtualAddress},
    paging::PageTableEntryFlags,
};

const MAX_BREAKPOINTS: usize = 16;
const INT3: u8 = 0xCC;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StubState {
    /// Waiting for the debugger's first packet.
    Init,
    /// Servicing a request; the target is halted.
    Interactive,
    /// `c`/`vCont` has been issued; the target is executing again.
    Running,
}

/// Register file ordering per §6: 8 GPRs, then EIP, FLAGS, CS, SS, DS, ES.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct RegisterFile {
    pub gprs: [u64; 8],
    pub eip: u64,
    pub eflags: u64,
    pub cs: u64,
    pub ss: u64,
    pub ds: u64,
    pub es: u64,
}

impl RegisterFile {
    fn as_words(&self) -> [u64; 14] {
        [
            self.gprs[0],
            self.gprs[1],
            self.gprs[2],
            self.gprs[3],
            self.gprs[4],
            self.gprs[5],
            self.gprs[6],
            self.gprs[7],
            self.eip,
            self.eflags,
            self.cs,
            self.ss,
            self.ds,
            self.es,
        ]
    }

    fn from_words(words: &[u64; 14]) -> Self {
        Self {
            gprs: [
                words[0], words[1], words[2], words[3], words[4], words[5], words[6], words[7],
            ],
            eip: words[8],
            eflags: words[9],
            cs: words[10],
            ss: words[11],
            ds: words[12],
            es: words[13],
        }
    }

    /// Hex-encodes every register, little-endian byte order, as `g` expects.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(14 * 16);
        for word in self.as_words() {
            for byte in word.to_le_bytes() {
                out.push(nibble_to_hex(byte >> 4));
                out.push(nibble_to_hex(byte & 0xF));
            }
        }
        out
    }

    /// Decodes a `G` payload produced by [`Self::encode`]. Returns `None` if the
    /// payload isn't exactly 14 little-endian 8-byte hex fields.
    pub fn decode(hex: &[u8]) -> Option<Self> {
        if hex.len() != 14 * 16 {
            return None;
        }
        let mut words = [0u64; 14];
        for (i, word) in words.iter_mut().enumerate() {
            let mut bytes = [0u8; 8];
            for (j, byte) in bytes.iter_mut().enumerate() {
                let offset = i * 16 + j * 2;
                *byte = (hex_val(hex[offset])? << 4) | hex_val(hex[offset + 1])?;
            }
            *word = u64::from_le_bytes(bytes);
        }
        Some(Self::from_words(&words))
    }
}

fn nibble_to_hex(n: u8) -> char {
    match n & 0xF {
        0..=9 => (b'0' + n) as char,
        n => (b'a' + n - 10) as char,
    }
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn encode_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nibble_to_hex(b >> 4));
        out.push(nibble_to_hex(b & 0xF));
    }
    out
}

fn decode_hex_bytes(hex: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2)
        .map(|pair| Some((hex_val(pair[0])? << 4) | hex_val(pair[1])?))
        .collect()
}

/// Fixed-size table of installed software breakpoints, keyed by target address. A
/// teaching stub only ever debugs one task at a time, so there's no need for more
/// entries than a debugger would realistically set in one session.
struct BreakpointTable {
    slots: [Option<(VirtualAddress, u8)>; MAX_BREAKPOINTS],
}

impl BreakpointTable {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_BREAKPOINTS],
        }
    }

    /// Writes `0xCC` at `addr`, recording the original byte so it can be restored.
    /// Fails with `Unsupported` once the table is full.
    fn install(&mut self, space: &mut AddressSpace, addr: VirtualAddress) -> Result<(), DebugError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(DebugError::Unsupported)?;

        let original = read_byte(space, addr).ok_or(DebugError::MalformedPacket)?;
        write_byte(space, addr, INT3).ok_or(DebugError::MalformedPacket)?;
        *slot = Some((addr, original));
        Ok(())
    }

    /// Restores the original byte at `addr`, if a breakpoint is installed there.
    fn remove(&mut self, space: &mut AddressSpace, addr: VirtualAddress) -> Result<(), DebugError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some((a, _)) if *a == addr))
            .ok_or(DebugError::Unsupported)?;

        let (_, original) = slot.take().unwrap();
        write_byte(space, addr, original).ok_or(DebugError::MalformedPacket)?;
        Ok(())
    }
}

fn read_byte(space: &AddressSpace, addr: VirtualAddress) -> Option<u8> {
    let page = Page::<Size4KiB>::containing_address(addr);
    let (frame, _) = space.translate(page).ok()?;
    let offset = (addr.as_u64() & 0xFFF) as usize;
    let ptr = crate::memory::manager::MemoryManager::the()
        .lock()
        .physical_memory_offset();
    let byte_addr = VirtualAddress::new(frame.start() + ptr as u64 + offset as u64);
    Some(unsafe { *byte_addr.as_ptr::<u8>() })
}

fn write_byte(space: &AddressSpace, addr: VirtualAddress, value: u8) -> Option<()> {
    let page = Page::<Size4KiB>::containing_address(addr);
    let (frame, _) = space.translate(page).ok()?;
    let offset = (addr.as_u64() & 0xFFF) as usize;
    let ptr = crate::memory::manager::MemoryManager::the()
        .lock()
        .physical_memory_offset();
    let byte_addr = VirtualAddress::new(frame.start() + ptr as u64 + offset as u64);
    unsafe { *byte_addr.as_mut_ptr::<u8>() = value };
    Some(())
}

pub struct GdbStub {
    framer: Framer,
    state: StubState,
    breakpoints: BreakpointTable,
    last_response: Vec<u8>,
}

impl GdbStub {
    pub const fn new() -> Self {
        Self {
            framer: Framer::new(),
            state: StubState::Init,
            breakpoints: BreakpointTable::new(),
            last_response: Vec::new(),
        }
    }

    pub fn state(&self) -> StubState {
        self.state
    }

    /// Feeds one byte off the wire through the framer; returns the bytes (if any) to
    /// write back to the debugger. `+`/interrupt produce no reply of their own; `-`
    /// triggers retransmission of the last framed response.
    pub fn handle_byte(&mut self, byte: u8, regs: &mut RegisterFile, space: &mut AddressSpace) -> Vec<u8> {
        match self.framer.feed(byte) {
            FrameEvent::Ack | FrameEvent::Pending => Vec::new(),
            FrameEvent::Nak => alloc::vec![b'-'],
            FrameEvent::Interrupt => {
                self.state = StubState::Interactive;
                self.respond(b"S05") // SIGTRAP
            }
            FrameEvent::Packet(packet) => {
                let reply = self.dispatch(&packet, regs, space);
                self.respond(&reply)
            }
        }
    }

    fn respond(&mut self, payload: &[u8]) -> Vec<u8> {
        let framed = framing::encode_packet(payload);
        self.last_response = framed.clone();
        let mut out = alloc::vec![b'+'];
        out.extend_from_slice(&framed);
        out
    }

    fn dispatch(&mut self, packet: &[u8], regs: &mut RegisterFile, space: &mut AddressSpace) -> Vec<u8> {
        self.state = StubState::Interactive;

        match packet.first() {
            Some(b'?') => b"S05".to_vec(),
            Some(b'g') => regs.encode().into_bytes(),
            Some(b'G') => {
                match RegisterFile::decode(&packet[1..]) {
                    Some(new_regs) => {
                        *regs = new_regs;
                        b"OK".to_vec()
                    }
                    None => b"E01".to_vec(),
                }
            }
            Some(b'p') => self.read_single_register(&packet[1..], regs),
            Some(b'P') => self.write_single_register(&packet[1..], regs),
            Some(b'm') => self.read_memory(&packet[1..], space),
            Some(b'M') => self.write_memory(&packet[1..], space, false),
            Some(b'X') => self.write_memory(&packet[1..], space, true),
            Some(b'z') if packet.get(1) == Some(&b'0') => self.clear_breakpoint(&packet[2..], space),
            Some(b'Z') if packet.get(1) == Some(&b'0') => self.set_breakpoint(&packet[2..], space),
            Some(b'c') => {
                self.state = StubState::Running;
                Vec::new() // no immediate reply; the next stop reply comes from a trap
            }
            Some(b'v') if packet.starts_with(b"vCont") => self.dispatch_vcont(packet, regs),
            Some(b'H') | Some(b'T') => b"OK".to_vec(),
            Some(b'q') if packet.starts_with(b"qSupported") => Vec::new(),
            Some(b'q') if packet.starts_with(b"qSymbol") => b"OK".to_vec(),
            Some(b'q') if packet.starts_with(b"qfThreadInfo") => b"l".to_vec(),
            Some(b'k') => {
                self.state = StubState::Init;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn dispatch_vcont(&mut self, packet: &[u8], regs: &mut RegisterFile) -> Vec<u8> {
        // `vCont;s` single-steps: set the trap flag so the next instruction re-enters
        // the debug exception, then resume. `vCont;c` is a plain continue.
        if packet.windows(2).any(|w| w == b";s") {
            const TRAP_FLAG: u64 = 1 << 8;
            regs.eflags |= TRAP_FLAG;
        }
        self.state = StubState::Running;
        Vec::new()
    }

    fn read_single_register(&self, args: &[u8], regs: &RegisterFile) -> Vec<u8> {
        let Some(idx) = parse_hex_usize(args) else {
            return b"E01".to_vec();
        };
        let words = regs.as_words();
        match words.get(idx) {
            Some(word) => encode_hex_bytes(&word.to_le_bytes()).into_bytes(),
            None => b"E01".to_vec(),
        }
    }

    fn write_single_register(&self, args: &[u8], regs: &mut RegisterFile) -> Vec<u8> {
        let Some(sep) = args.iter().position(|&b| b == b'=') else {
            return b"E01".to_vec();
        };
        let (idx_hex, value_hex) = (&args[..sep], &args[sep + 1..]);
        let (Some(idx), Some(bytes)) = (parse_hex_usize(idx_hex), decode_hex_bytes(value_hex)) else {
            return b"E01".to_vec();
        };
        if bytes.len() != 8 || idx >= 14 {
            return b"E01".to_vec();
        }

        let mut words = regs.as_words();
        words[idx] = u64::from_le_bytes(bytes.try_into().unwrap());
        *regs = RegisterFile::from_words(&words);
        b"OK".to_vec()
    }

    fn read_memory(&self, args: &[u8], space: &AddressSpace) -> Vec<u8> {
        let Some((addr, len)) = parse_addr_len(args) else {
            return b"E01".to_vec();
        };

        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            match read_byte(space, VirtualAddress::new(addr + i as u64)) {
                Some(b) => out.push(b),
                None => return b"E01".to_vec(),
            }
        }
        encode_hex_bytes(&out).into_bytes()
    }

    fn write_memory(&self, args: &[u8], space: &AddressSpace, binary: bool) -> Vec<u8> {
        let Some(sep) = args.iter().position(|&b| b == b':') else {
            return b"E01".to_vec();
        };
        let Some((addr, len)) = parse_addr_len(&args[..sep]) else {
            return b"E01".to_vec();
        };

        let payload = &args[sep + 1..];
        let bytes = if binary {
            payload.to_vec()
        } else {
            match decode_hex_bytes(payload) {
                Some(b) => b,
                None => return b"E01".to_vec(),
            }
        };
        if bytes.len() != len {
            return b"E01".to_vec();
        }

        for (i, byte) in bytes.iter().enumerate() {
            if write_byte(space, VirtualAddress::new(addr + i as u64), *byte).is_none() {
                return b"E01".to_vec();
            }
        }
        b"OK".to_vec()
    }

    fn set_breakpoint(&mut self, args: &[u8], space: &mut AddressSpace) -> Vec<u8> {
        let Some(addr) = parse_breakpoint_addr(args) else {
            return b"E01".to_vec();
        };
        match self.breakpoints.install(space, VirtualAddress::new(addr)) {
            Ok(()) => b"OK".to_vec(),
            Err(_) => b"E01".to_vec(),
        }
    }

    fn clear_breakpoint(&mut self, args: &[u8], space: &mut AddressSpace) -> Vec<u8> {
        let Some(addr) = parse_breakpoint_addr(args) else {
            return b"E01".to_vec();
        };
        match self.breakpoints.remove(space, VirtualAddress::new(addr)) {
            Ok(()) => b"OK".to_vec(),
            Err(_) => b"E01".to_vec(),
        }
    }
}

/// Parses `;<addr>,<kind>` as sent after a leading `0` in `z0`/`Z0` (kind is unused —
/// every breakpoint here is a single `0xCC`).
fn parse_breakpoint_addr(args: &[u8]) -> Option<u64> {
    let args = args.strip_prefix(b",").unwrap_or(args);
    let comma = args.iter().position(|&b| b == b',')?;
    parse_hex_u64(&args[..comma])
}

fn parse_addr_len(args: &[u8]) -> Option<(u64, usize)> {
    let comma = args.iter().position(|&b| b == b',')?;
    let addr = parse_hex_u64(&args[..comma])?;
    let len = parse_hex_usize(&args[comma + 1..])?;
    Some((addr, len))
}

fn parse_hex_u64(hex: &[u8]) -> Option<u64> {
    if hex.is_empty() {
        return None;
    }
    hex.iter().try_fold(0u64, |acc, &b| Some(acc * 16 + hex_val(b)? as u64))
}

fn parse_hex_usize(hex: &[u8]) -> Option<usize> {
    parse_hex_u64(hex).map(|v| v as usize)
}

/// Services exactly one incoming byte from the serial line, replying inline. Meant to
/// be called from a serial RX interrupt handler once one exists; not currently wired
/// into `interrupts::init` (see module docs and DESIGN.md).
pub fn service_one_byte(stub: &mut GdbStub, regs: &mut RegisterFile, space: &mut AddressSpace) {
    let byte = SERIAL.lock().recv();
    let reply = stub.handle_byte(byte, regs, space);
    for b in reply {
        SERIAL.lock().send(b);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn register_file_round_trips_through_hex_encoding() {
        let regs = RegisterFile {
            gprs: [1, 2, 3, 4, 5, 6, 7, 8],
            eip: 0xdead_beef,
            eflags: 0x202,
            cs: 0x18,
            ss: 0x20,
            ds: 0x20,
            es: 0x20,
        };
        let encoded = regs.encode();
        let decoded = RegisterFile::decode(encoded.as_bytes()).unwrap();
        assert_eq!(regs, decoded);
    }

    #[test]
    fn hex_byte_helpers_round_trip() {
        let bytes = [0x00, 0x7f, 0x80, 0xff, 0x10];
        let hex = encode_hex_bytes(&bytes);
        assert_eq!(decode_hex_bytes(hex.as_bytes()).unwrap(), bytes);
    }

    #[test]
    fn addr_len_parses_standard_m_command_args() {
        assert_eq!(parse_addr_len(b"1000,4"), Some((0x1000, 4)));
        assert_eq!(parse_addr_len(b"garbage"), None);
    }
}
