//! ISO 7816-3 contact smart-card decoder: event-driven over VCC/RST/IO
//! line transitions plus a UART-decoded byte stream, not sample-clocked.

use std::collections::VecDeque;

use chrono::Utc;

use crate::frame_state::FrameType;
use crate::types::{FrameFlags, FramePhase, RawFrame, TechType};

/// An edge or byte event delivered to the decoder. The UART framing
/// (bit rate, parity) is derived from the ATR's TA1/TA2 bytes once seen;
/// before that, `Byte` events are assumed to use the default ISO 7816
/// parameters (372 clock cycles/etu, even parity).
#[derive(Debug, Clone, Copy)]
pub enum CardEvent {
    VccHigh,
    VccLow,
    RstHigh,
    RstLow,
    Byte(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    T0,
    T1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Cold,
    Atr,
    Pps,
    T0Header,
    T0Procedure,
    T1Block,
}

/// Which interface byte is expected next within the current ATR group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceKind {
    Ta,
    Tb,
    Tc,
    Td,
}

/// What the ATR byte walk is currently consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtrStage {
    Ts,
    T0,
    Interface(InterfaceKind),
    Historical,
    Tck,
}

struct AtrParams {
    fi: u8,
    di: u8,
    protocol: Protocol,
    historical_bytes: u8,
    /// Block Waiting Integer / Character Waiting Integer for T=1, from
    /// TBi in the interface-byte group that announces protocol 1.
    bwi: u8,
    cwi: u8,
    /// T=1 error-detection code: `false` = LRC (1 byte), `true` = CRC
    /// (2 bytes), from TCi's low bit in the protocol-1 group.
    checksum_is_crc: bool,
}

impl Default for AtrParams {
    fn default() -> Self {
        Self {
            fi: 1,
            di: 1,
            protocol: Protocol::T0,
            historical_bytes: 0,
            bwi: 4,
            cwi: 13,
            checksum_is_crc: false,
        }
    }
}

pub struct Iso7816Decoder {
    state: State,
    atr: AtrParams,
    atr_bytes: Vec<u8>,
    atr_stage: AtrStage,
    /// Interface bytes still owed in the ATR group currently being read,
    /// front-to-back in TA/TB/TC/TD order.
    pending_interface: VecDeque<InterfaceKind>,
    /// Protocol context the *current* interface-byte group's TA/TB/TC
    /// describe: `None` for the first (global) group, `Some(T)` once a
    /// TDi has announced which protocol the next group qualifies.
    group_protocol: Option<u8>,
    pps_bytes: Vec<u8>,
    pps_remaining: u8,
    t0_header: Vec<u8>,
    t1_block: Vec<u8>,
    sample_clock: u64,
}

impl Default for Iso7816Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Iso7816Decoder {
    pub fn new() -> Self {
        Self {
            state: State::Cold,
            atr: AtrParams::default(),
            atr_bytes: Vec::new(),
            atr_stage: AtrStage::Ts,
            pending_interface: VecDeque::new(),
            group_protocol: None,
            pps_bytes: Vec::new(),
            pps_remaining: 0,
            t0_header: Vec::new(),
            t1_block: Vec::new(),
            sample_clock: 0,
        }
    }

    /// Feed one card-level event, returning a frame if this event
    /// completed one (a carrier/VCC transition, the ATR, a PPS exchange,
    /// a T=0 TPDU, or a T=1 block).
    pub fn on_event(&mut self, event: CardEvent) -> Option<RawFrame> {
        self.sample_clock += 1;
        match event {
            CardEvent::VccHigh => self.emit_line_event(FrameType::VccHigh, true),
            CardEvent::VccLow => {
                self.reset();
                self.emit_line_event(FrameType::VccLow, false)
            }
            CardEvent::RstHigh => {
                self.state = State::Atr;
                self.atr_bytes.clear();
                self.atr_stage = AtrStage::Ts;
                self.pending_interface.clear();
                self.group_protocol = None;
                self.emit_line_event(FrameType::RstHigh, true)
            }
            CardEvent::RstLow => self.emit_line_event(FrameType::RstLow, false),
            CardEvent::Byte(byte) => self.on_byte(byte),
        }
    }

    fn reset(&mut self) {
        self.state = State::Cold;
        self.atr = AtrParams::default();
        self.atr_bytes.clear();
        self.atr_stage = AtrStage::Ts;
        self.pending_interface.clear();
        self.group_protocol = None;
        self.pps_bytes.clear();
        self.pps_remaining = 0;
        self.t0_header.clear();
        self.t1_block.clear();
    }

    fn emit_line_event(&mut self, frame_type: FrameType, high: bool) -> Option<RawFrame> {
        let now = Utc::now();
        Some(RawFrame {
            tech: TechType::Iso7816,
            frame_type,
            phase: FramePhase::Carrier,
            sample_start: self.sample_clock,
            sample_end: self.sample_clock,
            time_start: now,
            time_end: now,
            bitrate: 0,
            flags: FrameFlags::none(),
            data: vec![if high { 1 } else { 0 }],
        })
    }

    fn on_byte(&mut self, byte: u8) -> Option<RawFrame> {
        match self.state {
            State::Cold => None,
            State::Atr => self.on_atr_byte(byte),
            State::Pps => {
                if !self.pps_bytes.is_empty() || byte == 0xFF {
                    self.on_pps_byte(byte)
                } else {
                    // No PPS request: this byte already belongs to the
                    // protocol negotiated (or defaulted) by the ATR.
                    self.state = match self.atr.protocol {
                        Protocol::T0 => State::T0Header,
                        Protocol::T1 => State::T1Block,
                    };
                    self.on_byte(byte)
                }
            }
            State::T0Header | State::T0Procedure => self.on_t0_byte(byte),
            State::T1Block => self.on_t1_byte(byte),
        }
    }

    /// Begin a new ATR interface-byte group from a presence nibble
    /// (`Y(i)`: bit0=TA, bit1=TB, bit2=TC, bit3=TD), tagged with the
    /// protocol these bytes describe (`None` for the first, global
    /// group).
    fn begin_interface_group(&mut self, presence: u8, protocol_context: Option<u8>) {
        self.pending_interface.clear();
        if presence & 0x1 != 0 {
            self.pending_interface.push_back(InterfaceKind::Ta);
        }
        if presence & 0x2 != 0 {
            self.pending_interface.push_back(InterfaceKind::Tb);
        }
        if presence & 0x4 != 0 {
            self.pending_interface.push_back(InterfaceKind::Tc);
        }
        if presence & 0x8 != 0 {
            self.pending_interface.push_back(InterfaceKind::Td);
        }
        self.group_protocol = protocol_context;
    }

    /// Move to whatever the ATR walk expects next: another queued
    /// interface byte, the historical bytes, the TCK checksum (only if
    /// T=1 was ever announced), or completion.
    fn advance_atr(&mut self) -> Option<RawFrame> {
        if let Some(kind) = self.pending_interface.pop_front() {
            self.atr_stage = AtrStage::Interface(kind);
            None
        } else if self.atr.historical_bytes > 0 {
            self.atr_stage = AtrStage::Historical;
            None
        } else if self.atr.protocol == Protocol::T1 {
            self.atr_stage = AtrStage::Tck;
            None
        } else {
            self.finish_atr()
        }
    }

    fn apply_interface_byte(&mut self, kind: InterfaceKind, byte: u8) {
        match (kind, self.group_protocol) {
            (InterfaceKind::Ta, None) => {
                self.atr.fi = byte >> 4;
                self.atr.di = byte & 0x0F;
            }
            (InterfaceKind::Tb, Some(1)) => {
                self.atr.bwi = byte >> 4;
                self.atr.cwi = byte & 0x0F;
            }
            (InterfaceKind::Tc, Some(1)) => {
                self.atr.checksum_is_crc = byte & 0x01 != 0;
            }
            _ => {}
        }
    }

    fn on_atr_byte(&mut self, byte: u8) -> Option<RawFrame> {
        self.atr_bytes.push(byte);

        match self.atr_stage {
            AtrStage::Ts => {
                // TS: initial character, ignored beyond framing.
                self.atr_stage = AtrStage::T0;
                None
            }
            AtrStage::T0 => {
                // T0: high nibble Y(1) = presence of TA1/TB1/TC1/TD1,
                // low nibble = number of historical bytes.
                self.atr.historical_bytes = byte & 0x0F;
                self.begin_interface_group(byte >> 4, None);
                self.advance_atr()
            }
            AtrStage::Interface(kind) => {
                self.apply_interface_byte(kind, byte);
                if kind == InterfaceKind::Td {
                    let protocol = byte & 0x0F;
                    if protocol == 1 {
                        self.atr.protocol = Protocol::T1;
                    }
                    self.begin_interface_group(byte >> 4, Some(protocol));
                }
                self.advance_atr()
            }
            AtrStage::Historical => {
                self.atr.historical_bytes -= 1;
                if self.atr.historical_bytes == 0 {
                    if self.atr.protocol == Protocol::T1 {
                        self.atr_stage = AtrStage::Tck;
                        None
                    } else {
                        self.finish_atr()
                    }
                } else {
                    None
                }
            }
            AtrStage::Tck => self.finish_atr(),
        }
    }

    fn finish_atr(&mut self) -> Option<RawFrame> {
        self.state = State::Pps;
        self.pps_bytes.clear();
        self.pps_remaining = 0;
        let now = Utc::now();
        Some(RawFrame {
            tech: TechType::Iso7816,
            frame_type: FrameType::Atr,
            phase: FramePhase::Sense,
            sample_start: self.sample_clock,
            sample_end: self.sample_clock,
            time_start: now,
            time_end: now,
            bitrate: 0,
            flags: FrameFlags::none(),
            data: std::mem::take(&mut self.atr_bytes),
        })
    }

    /// Walk a PPSS/PPS0/[PPS1][PPS2][PPS3]/PCK exchange. Only entered
    /// when the byte following the ATR is `0xFF` (PPSS); anything else
    /// means the card skipped PPS and the reader proceeds with the
    /// protocol the ATR announced.
    fn on_pps_byte(&mut self, byte: u8) -> Option<RawFrame> {
        self.pps_bytes.push(byte);
        match self.pps_bytes.len() {
            1 => None, // PPSS
            2 => {
                // PPS0: low nibble requests a protocol, high-nibble bits
                // 4..6 flag PPS1/PPS2/PPS3 presence.
                match byte & 0x0F {
                    0 => self.atr.protocol = Protocol::T0,
                    1 => self.atr.protocol = Protocol::T1,
                    _ => {}
                }
                let optional = (byte >> 4) & 0x07;
                self.pps_remaining = optional.count_ones() as u8 + 1; // + PCK
                None
            }
            _ => {
                self.pps_remaining -= 1;
                if self.pps_remaining == 0 {
                    let data = std::mem::take(&mut self.pps_bytes);
                    self.state = match self.atr.protocol {
                        Protocol::T0 => State::T0Header,
                        Protocol::T1 => State::T1Block,
                    };
                    let now = Utc::now();
                    Some(RawFrame {
                        tech: TechType::Iso7816,
                        frame_type: FrameType::Exchange,
                        phase: FramePhase::Selection,
                        sample_start: self.sample_clock,
                        sample_end: self.sample_clock,
                        time_start: now,
                        time_end: now,
                        bitrate: 0,
                        flags: FrameFlags::none(),
                        data,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn on_t0_byte(&mut self, byte: u8) -> Option<RawFrame> {
        self.t0_header.push(byte);

        if self.t0_header.len() < 5 {
            self.state = State::T0Header;
            return None;
        }

        self.state = State::T0Procedure;

        let ins = self.t0_header[1];
        if byte == 0x60 {
            // NULL/wait procedure byte: no data transferred yet.
            return None;
        }
        if byte == ins || byte == (ins ^ 0xFF) {
            // Acknowledged: transmit remaining (or one) data bytes;
            // the caller continues feeding `Byte` events for the data
            // phase and the trailing SW1/SW2, which this simplified
            // event model treats as part of the same TPDU frame.
            return None;
        }
        if (0x60..=0x6F).contains(&byte) || (0x90..=0x9F).contains(&byte) {
            let now = Utc::now();
            let data = std::mem::take(&mut self.t0_header);
            self.state = State::T0Header;
            return Some(RawFrame {
                tech: TechType::Iso7816,
                frame_type: FrameType::Exchange,
                phase: FramePhase::Application,
                sample_start: self.sample_clock,
                sample_end: self.sample_clock,
                time_start: now,
                time_end: now,
                bitrate: 0,
                flags: FrameFlags::none(),
                data,
            });
        }
        None
    }

    /// Assemble one T=1 block: `[PCB, LEN, ...INF, EDC...]`. `EDC` is
    /// one LRC byte or two CRC bytes depending on the TC byte the ATR's
    /// protocol-1 interface-byte group announced (`checksum_is_crc`).
    fn on_t1_byte(&mut self, byte: u8) -> Option<RawFrame> {
        self.t1_block.push(byte);

        if self.t1_block.len() < 3 {
            return None;
        }

        let len = self.t1_block[2] as usize;
        let trailer_len = if self.atr.checksum_is_crc { 2 } else { 1 };
        let expected_total = 3 + len + trailer_len;

        if self.t1_block.len() < expected_total {
            return None;
        }

        let pcb = self.t1_block[1];
        let kind = classify_pcb(pcb);
        let phase = match kind {
            T1BlockKind::Supervisory => FramePhase::Selection,
            T1BlockKind::Information | T1BlockKind::Receive => FramePhase::Application,
        };

        let now = Utc::now();
        let data = std::mem::take(&mut self.t1_block);
        Some(RawFrame {
            tech: TechType::Iso7816,
            frame_type: FrameType::Exchange,
            phase,
            sample_start: self.sample_clock,
            sample_end: self.sample_clock,
            time_start: now,
            time_end: now,
            bitrate: 0,
            flags: FrameFlags::none(),
            data,
        })
    }
}

/// Classify a T=1 PCB (Protocol Control Byte) into its block kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum T1BlockKind {
    Information,
    Receive,
    Supervisory,
}

pub fn classify_pcb(pcb: u8) -> T1BlockKind {
    if pcb & 0x80 == 0 {
        T1BlockKind::Information
    } else if pcb & 0xC0 == 0x80 {
        T1BlockKind::Receive
    } else {
        T1BlockKind::Supervisory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_reset_produces_no_frame_for_bytes() {
        let mut decoder = Iso7816Decoder::new();
        assert!(decoder.on_event(CardEvent::Byte(0x3B)).is_none());
    }

    #[test]
    fn vcc_high_emits_line_event() {
        let mut decoder = Iso7816Decoder::new();
        let frame = decoder.on_event(CardEvent::VccHigh).unwrap();
        assert_eq!(frame.tech, TechType::Iso7816);
        assert_eq!(frame.frame_type, FrameType::VccHigh);
        assert_eq!(frame.data, vec![1]);
    }

    #[test]
    fn vcc_and_rst_transitions_are_distinguishable() {
        let mut decoder = Iso7816Decoder::new();
        let vcc_high = decoder.on_event(CardEvent::VccHigh).unwrap();
        let rst_high = decoder.on_event(CardEvent::RstHigh).unwrap();
        assert_ne!(vcc_high.frame_type, rst_high.frame_type);

        let mut decoder = Iso7816Decoder::new();
        let vcc_low = decoder.on_event(CardEvent::VccLow).unwrap();
        let rst_low = decoder.on_event(CardEvent::RstLow).unwrap();
        assert_ne!(vcc_low.frame_type, rst_low.frame_type);
        assert_eq!(vcc_low.data, rst_low.data);
    }

    #[test]
    fn pcb_classification() {
        assert_eq!(classify_pcb(0x00), T1BlockKind::Information);
        assert_eq!(classify_pcb(0x80), T1BlockKind::Receive);
        assert_eq!(classify_pcb(0xC0), T1BlockKind::Supervisory);
    }

    #[test]
    fn atr_with_no_interface_or_historical_bytes_completes_immediately() {
        let mut decoder = Iso7816Decoder::new();
        decoder.on_event(CardEvent::RstHigh);
        decoder.on_event(CardEvent::Byte(0x3B)); // TS
        let frame = decoder.on_event(CardEvent::Byte(0x00)).unwrap(); // T0: no interface/historical bytes
        assert_eq!(frame.data, vec![0x3B, 0x00]);
    }

    #[test]
    fn ta1_sets_fi_di_and_atr_still_completes() {
        let mut decoder = Iso7816Decoder::new();
        decoder.on_event(CardEvent::RstHigh);
        decoder.on_event(CardEvent::Byte(0x3B)); // TS
        decoder.on_event(CardEvent::Byte(0x10)); // T0: Y1 = TA1 only, 0 historical
        let frame = decoder.on_event(CardEvent::Byte(0x96)).unwrap(); // TA1: FI=9, DI=6
        assert_eq!(decoder.atr.fi, 9);
        assert_eq!(decoder.atr.di, 6);
        assert_eq!(frame.data, vec![0x3B, 0x10, 0x96]);
    }

    /// TD1 announcing protocol 1 (T=1), with a second group supplying
    /// TA2 (IFSC, ignored here) and a TB2 carrying BWI/CWI, must route
    /// the decoder into `State::T1Block` once the ATR (and the
    /// PPS-skip byte) are consumed — exercising the previously dead
    /// T=1 path end to end.
    #[test]
    fn td1_announcing_t1_enables_t1_block_parsing() {
        let mut decoder = Iso7816Decoder::new();
        decoder.on_event(CardEvent::RstHigh);
        decoder.on_event(CardEvent::Byte(0x3B)); // TS
        decoder.on_event(CardEvent::Byte(0x80)); // T0: Y1 = TD1 only, 0 historical
        decoder.on_event(CardEvent::Byte(0x11)); // TD1: Y2 = TA2 only, protocol = 1
        decoder.on_event(CardEvent::Byte(0x95)); // TA2 (IFSC, unused)
        let atr = decoder.on_event(CardEvent::Byte(0x00)).unwrap(); // TCK, mandatory once T=1 is offered
        assert_eq!(atr.frame_type, FrameType::Atr);
        assert_eq!(decoder.atr.protocol, Protocol::T1);

        // Not 0xFF: no PPS, byte belongs straight to the first T=1 block.
        let none = decoder.on_event(CardEvent::Byte(0x00)); // NAD
        assert!(none.is_none());
        assert_eq!(decoder.state, State::T1Block);
        decoder.on_event(CardEvent::Byte(0x00)); // PCB: I-block
        decoder.on_event(CardEvent::Byte(0x01)); // LEN = 1
        decoder.on_event(CardEvent::Byte(0xAA)); // INF byte
        let block = decoder.on_event(CardEvent::Byte(0x00)).unwrap(); // 1-byte LRC
        assert_eq!(block.frame_type, FrameType::Exchange);
        assert_eq!(block.data, vec![0x00, 0x00, 0x01, 0xAA, 0x00]);
    }

    #[test]
    fn pps_exchange_is_parsed_before_t0_traffic() {
        let mut decoder = Iso7816Decoder::new();
        decoder.on_event(CardEvent::RstHigh);
        decoder.on_event(CardEvent::Byte(0x3B)); // TS
        decoder.on_event(CardEvent::Byte(0x00)); // T0: no interface/historical bytes, defaults to T=0
        decoder.on_event(CardEvent::Byte(0xFF)); // PPSS
        decoder.on_event(CardEvent::Byte(0x00)); // PPS0: protocol 0, no optional bytes
        let pps = decoder.on_event(CardEvent::Byte(0x00)).unwrap(); // PCK
        assert_eq!(pps.frame_type, FrameType::Exchange);
        assert_eq!(pps.data, vec![0xFF, 0x00, 0x00]);
        assert_eq!(decoder.state, State::T0Header);
    }
}
