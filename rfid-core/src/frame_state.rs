//! In-progress frame tracking: the per-frame timing window and
//! classification, created on SOF detect and destroyed on emission.

use serde::{Deserialize, Serialize};

use crate::types::FramePhase;

/// What kind of event this frame represents. Contactless RF events and
/// contact VCC/RST transitions share the same enum so the Protocol
/// Tracker can treat both uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Poll,
    Listen,
    CarrierOn,
    CarrierOff,
    Atr,
    Request,
    Response,
    Exchange,
    VccLow,
    VccHigh,
    RstLow,
    RstHigh,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameStatus {
    pub frame_type: FrameType,
    pub phase: FramePhase,
    pub symbol_rate: u32,
    pub frame_start: u64,
    pub frame_end: u64,
    pub guard_end: u64,
    pub waiting_end: u64,
    pub last_command: u8,

    /// Timing parameters copied from `ProtocolStatus` at frame start;
    /// mutated here only for the duration of this frame.
    pub start_up_guard_time: u32,
    pub frame_waiting_time: u32,
    pub frame_guard_time: u32,
    pub request_guard_time: u32,
}

impl Default for FrameStatus {
    fn default() -> Self {
        Self {
            frame_type: FrameType::Poll,
            phase: FramePhase::Carrier,
            symbol_rate: 0,
            frame_start: 0,
            frame_end: 0,
            guard_end: 0,
            waiting_end: 0,
            last_command: 0,
            start_up_guard_time: 0,
            frame_waiting_time: 0,
            frame_guard_time: 0,
            request_guard_time: 0,
        }
    }
}

impl FrameStatus {
    pub fn begin(&mut self, frame_type: FrameType, phase: FramePhase, symbol_rate: u32, start: u64) {
        self.frame_type = frame_type;
        self.phase = phase;
        self.symbol_rate = symbol_rate;
        self.frame_start = start;
        self.frame_end = start;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
