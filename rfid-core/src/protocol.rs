//! Protocol Tracker: inspects each emitted frame's leading bytes and
//! updates the sticky timing/sizing state that gates the *next* frame.

use crate::types::{FramePhase, TechType};

/// Frame Waiting Time while awaiting ATQA, in carrier cycles, before any
/// RATS exchange has refined it (ISO 14443-3 default).
pub const FWT_ACTIVATION: u32 = 71_680 / 2;
/// Default Frame Waiting Time prior to any FWI negotiation.
pub const NFCB_FWT_DEF: u32 = 71_680;
/// Default Frame Guard Time between frames.
pub const NFCB_FGT_DEF: u32 = 7_000;
/// Default Startup Frame Guard Time.
pub const NFCB_SFGT_DEF: u32 = 7_000;
/// Default Request Guard Time between consecutive REQA/REQB.
pub const NFCB_RGT_DEF: u32 = 7_000;
/// Frame Waiting Time while awaiting an NFC-F ATQC.
pub const FWT_ATQC: u32 = 71_680;

/// A response this tech is waiting on, set by the command that solicited
/// it and consumed by whichever frame arrives next on that tech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    None,
    /// RATS was just seen; the next NFC-A frame is its ATS.
    Ats,
    /// REQB was just seen; the next NFC-B frame is its ATQB.
    Atqb,
}

/// Sticky protocol-level state, updated by the tracker after every
/// emitted frame and read by the symbol state machines to gate the next
/// detection window. Lives for the whole decoding session; reset on
/// REQA/REQB/REQC.
#[derive(Debug, Clone)]
pub struct ProtocolStatus {
    pub max_frame_size: usize,
    pub frame_guard_time: u32,
    pub frame_waiting_time: u32,
    pub start_up_guard_time: u32,
    pub request_guard_time: u32,

    /// NFC-B SOF timing window bounds, refined by ATQB.
    pub sof_s1_min_time: u32,
    pub sof_s1_max_time: u32,
    pub sof_s2_min_time: u32,
    pub sof_s2_max_time: u32,

    /// ISO 14443-4 chaining flags carried forward into the next frame.
    pub chained_flags: u32,

    /// Phase the *next* frame should be tagged with, absent other
    /// evidence; overridden per-command below.
    pub next_phase: FramePhase,

    /// Response this tech's next frame is expected to satisfy, if any.
    pub pending: Expectation,
}

impl Default for ProtocolStatus {
    fn default() -> Self {
        Self {
            max_frame_size: 256,
            frame_guard_time: NFCB_FGT_DEF,
            frame_waiting_time: NFCB_FWT_DEF,
            start_up_guard_time: NFCB_SFGT_DEF,
            request_guard_time: NFCB_RGT_DEF,
            sof_s1_min_time: 0,
            sof_s1_max_time: 0,
            sof_s2_min_time: 0,
            sof_s2_max_time: 0,
            chained_flags: 0,
            next_phase: FramePhase::Carrier,
            pending: Expectation::None,
        }
    }
}

impl ProtocolStatus {
    pub fn reset_defaults(&mut self) {
        *self = Self::default();
    }
}

/// Convert a carrier-cycle duration (as FWT/FGT/SFGT/RGT are expressed)
/// into a sample count at `sample_rate`, so the worker can use these
/// timing fields to gate its own sample-clocked detection window.
pub fn carrier_cycles_to_samples(cycles: u32, sample_rate: u32) -> u64 {
    ((f64::from(cycles) * f64::from(sample_rate)) / crate::bitrate::NFC_FC).round() as u64
}

/// Decode FWI (frame waiting integer) into a sample-agnostic carrier-cycle
/// count: `FWT = (256 * 16 / fc) * 2^FWI`, expressed here in carrier
/// cycles (`256 * 16 * 2^FWI`) so callers scale by sample rate / fc.
pub fn fwt_from_fwi(fwi: u8) -> u32 {
    (256u32 * 16) << fwi.min(14)
}

/// Decode SFGI into `SFGT = (256 * 16 / fc) * 2^SFGI` carrier cycles,
/// same convention as [`fwt_from_fwi`].
pub fn sfgt_from_sfgi(sfgi: u8) -> u32 {
    if sfgi == 0 {
        return NFCB_SFGT_DEF;
    }
    (256u32 * 16) << sfgi.min(14)
}

/// Decode FSCI (frame size card integer) into FSC, the max response frame
/// size in bytes, per the ISO 14443-3 lookup table.
pub fn fsc_from_fsci(fsci: u8) -> usize {
    const TABLE: [usize; 9] = [16, 24, 32, 40, 48, 64, 96, 128, 256];
    TABLE[(fsci as usize).min(8)]
}

/// Mirrors `fsc_from_fsci` for the reader-to-card direction (FSDI).
pub fn fsd_from_fsdi(fsdi: u8) -> usize {
    fsc_from_fsci(fsdi)
}

/// Applies command-classification rules to a just-emitted frame and
/// updates `status` accordingly. `data` is the frame payload (CRC
/// trailer included where applicable is irrelevant here; callers pass
/// the full decoded byte sequence).
pub fn track_frame(status: &mut ProtocolStatus, tech: TechType, data: &[u8]) -> FramePhase {
    let Some(&cmd) = data.first() else {
        return status.next_phase;
    };

    match (status.pending, tech) {
        (Expectation::Ats, TechType::NfcA) => {
            status.pending = Expectation::None;
            apply_ats(status, data);
            return FramePhase::Selection;
        }
        (Expectation::Atqb, TechType::NfcB) => {
            status.pending = Expectation::None;
            apply_atqb(status, data);
            return FramePhase::Selection;
        }
        _ => {}
    }

    match tech {
        TechType::NfcA => classify_nfca(status, cmd, data),
        TechType::NfcB => classify_nfcb(status, cmd, data),
        TechType::NfcF => classify_nfcf(status, data),
        TechType::NfcV => classify_nfcv(status, cmd),
        TechType::Iso7816 => FramePhase::Application,
    }
}

fn classify_nfca(status: &mut ProtocolStatus, cmd: u8, data: &[u8]) -> FramePhase {
    match cmd {
        0x26 | 0x52 => {
            status.reset_defaults();
            status.frame_waiting_time = FWT_ACTIVATION;
            FramePhase::Sense
        }
        0x93 | 0x95 | 0x97 => FramePhase::Selection,
        0xE0 => {
            // RATS: the next NFC-A frame observed is its ATS, parsed by
            // track_frame's pending check above.
            status.pending = Expectation::Ats;
            FramePhase::Selection
        }
        0x50 => FramePhase::Sense,
        _ if data.len() >= 2 && is_pcb_block(cmd) => {
            status.chained_flags = pcb_chaining_flags(cmd);
            FramePhase::Application
        }
        _ => FramePhase::Application,
    }
}

/// Parse an ATS payload's TL/TA/TB/TC fields into the protocol status,
/// following ISO 14443-3 §8.3. Called by the caller once an ATS response
/// to a prior RATS is observed.
pub fn apply_ats(status: &mut ProtocolStatus, ats: &[u8]) {
    let Some(&tl) = ats.first() else { return };
    if tl == 0 {
        return;
    }
    let mut idx = 1usize;
    let t0 = ats.get(idx).copied().unwrap_or(0);
    idx += 1;

    let fsci = t0 & 0x0F;
    status.max_frame_size = fsc_from_fsci(fsci);

    if t0 & 0x10 != 0 {
        idx += 1; // TA(1)
    }
    if t0 & 0x20 != 0 {
        idx += 1; // TB(1): FWI/SFGI
        if let Some(&tb1) = ats.get(idx.wrapping_sub(1)) {
            let fwi = (tb1 >> 4) & 0x0F;
            let sfgi = tb1 & 0x0F;
            status.frame_waiting_time = fwt_from_fwi(fwi);
            status.start_up_guard_time = sfgt_from_sfgi(sfgi);
        }
    }
    if t0 & 0x40 != 0 {
        idx += 1; // TC(1)
    }
    let _ = idx;
}

fn classify_nfcb(status: &mut ProtocolStatus, cmd: u8, data: &[u8]) -> FramePhase {
    match cmd {
        0x05 => {
            status.reset_defaults();
            status.pending = Expectation::Atqb;
            FramePhase::Sense
        }
        0x1D => {
            // ATTRIB: param1 = TR0, param2 encodes rates + FSDI.
            if let Some(&param2) = data.get(2) {
                status.max_frame_size = fsd_from_fsdi(param2 & 0x0F);
            }
            FramePhase::Selection
        }
        0x50 => FramePhase::Sense,
        _ => FramePhase::Application,
    }
}

/// Parse an ATQB response (bytes 10/11 carry FSDI/FWI) into the protocol
/// status, called by the caller after a REQB round-trip completes.
pub fn apply_atqb(status: &mut ProtocolStatus, atqb: &[u8]) {
    if atqb.len() < 12 {
        return;
    }
    let protocol_info = atqb[10];
    let fsci = (protocol_info >> 4) & 0x0F;
    let fwi = atqb[11] >> 4;
    status.max_frame_size = fsc_from_fsci(fsci);
    status.frame_waiting_time = fwt_from_fwi(fwi);
}

fn classify_nfcf(status: &mut ProtocolStatus, data: &[u8]) -> FramePhase {
    if data.len() >= 4 && data[3] == 0x00 {
        status.reset_defaults();
        status.frame_waiting_time = FWT_ATQC;
        return FramePhase::Sense;
    }
    FramePhase::Application
}

fn classify_nfcv(status: &mut ProtocolStatus, cmd: u8) -> FramePhase {
    match cmd {
        0x01 => {
            status.reset_defaults();
            FramePhase::Sense
        }
        _ => FramePhase::Application,
    }
}

fn is_pcb_block(cmd: u8) -> bool {
    cmd & 0xC0 == 0x00 || cmd & 0xC0 == 0x80 || cmd & 0xC0 == 0xC0
}

/// Extract the chaining bit from an ISO 14443-4 PCB byte for I-blocks
/// (bit 5), propagated into the next frame's flags by the caller.
fn pcb_chaining_flags(pcb: u8) -> u32 {
    if pcb & 0xC0 == 0x00 {
        u32::from((pcb >> 4) & 1)
    } else {
        0
    }
}
