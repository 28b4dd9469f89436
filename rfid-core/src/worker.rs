//! The decoder worker: a single cooperative thread owning the ring
//! window, every modulation status, and the protocol status, driven by
//! a bounded input queue and publishing to bounded output queues.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::bitrate::{build_bitrate_table, build_nfcv_bitrate};
use crate::config::DecoderConfig;
use crate::debug_taps::{DebugTaps, TapChannel};
use crate::errors::Result;
use crate::logging::SignalLogger;
use crate::modulation::{Correlator, SearchWindow};
use crate::protocol::{carrier_cycles_to_samples, ProtocolStatus};
use crate::ring::RingWindow;
use crate::sample::EnvelopeTracker;
use crate::tech::a::NfcADecoder;
use crate::tech::b::NfcBDecoder;
use crate::tech::f::NfcFDecoder;
use crate::tech::v::NfcVDecoder;
use crate::tech::{SampleTick, TechDecoder};
use crate::types::{DecoderStatus, RawFrame, SampleBlock, TechType};

/// Poll timeout for the bounded input queue, matching the reference
/// decoder's cooperative scheduling loop.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Ring window capacity, sized well above 2x the longest symbol at the
/// lowest enabled bitrate (NFC-V's ~26 kbps).
const RING_CAPACITY: usize = 1 << 16;

/// Staging capacity for frames not yet accepted by the caller-supplied
/// sink channel. Bounded independently of that channel's own capacity so
/// the worker can apply its own "oldest dropped" eviction (§5) rather
/// than depend on the channel rejecting the newest send on `Full`.
const FRAME_SINK_STAGING_CAPACITY: usize = 64;

/// Commands accepted on the worker's control channel.
pub enum WorkerCommand {
    Start,
    Stop,
    Configure(DecoderConfig),
}

struct TechCandidate {
    tech: TechType,
    decoder: Box<dyn TechDecoder + Send>,
    search: SearchWindow,
    /// Produces the genuine signed correlation factor this candidate's
    /// symbol classifier keys on (§4.C), in place of the envelope
    /// smoother's always-nonnegative magnitude.
    correlator: Correlator,
}

/// Owns all per-session state; never shared outside the worker thread.
pub struct DecoderWorker {
    config: DecoderConfig,
    logger: SignalLogger,
    ring: RingWindow,
    envelope: EnvelopeTracker,
    protocol: ProtocolStatus,
    candidates: Vec<TechCandidate>,
    locked: Option<usize>,
    sample_clock: u64,
    /// Sample clock before which the detector bank stays suppressed,
    /// armed from [`ProtocolStatus::frame_guard_time`] after each
    /// emitted frame so trailing ringing isn't mistaken for a new
    /// preamble inside the mandatory inter-frame guard time.
    suppress_detect_until: u64,
    running: bool,
    debug_taps: DebugTaps,
    /// Frames accepted by `publish` but not yet handed off to
    /// `frame_sink`, FIFO-ordered; evicted from the front (oldest first)
    /// when `FRAME_SINK_STAGING_CAPACITY` is exceeded.
    pending_frames: VecDeque<RawFrame>,
    /// Running count of frames evicted by the oldest-dropped staging
    /// policy above, surfaced via [`DecoderStatus::dropped_frames`].
    dropped_frames: u64,
}

impl DecoderWorker {
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;

        let ring = RingWindow::new(RING_CAPACITY);
        let envelope = EnvelopeTracker::new(128);
        let protocol = ProtocolStatus::default();
        let candidates = Self::build_candidates(&config);
        let debug_taps = DebugTaps::new(config.debug_channels_enabled);

        Ok(Self {
            config,
            logger: SignalLogger::default(),
            ring,
            envelope,
            protocol,
            candidates,
            locked: None,
            sample_clock: 0,
            suppress_detect_until: 0,
            running: false,
            debug_taps,
            pending_frames: VecDeque::new(),
            dropped_frames: 0,
        })
    }

    /// The optional multi-channel float recorder mirroring the inner
    /// integrator/correlation/modulation-depth signals (§4.I). Empty
    /// channels when `debug_channels_enabled` was `false` at construction.
    pub fn debug_taps(&self) -> &DebugTaps {
        &self.debug_taps
    }

    fn build_candidates(config: &DecoderConfig) -> Vec<TechCandidate> {
        let max_frame_size = config.max_frame_size();
        let mut candidates: Vec<TechCandidate> = Vec::new();

        if config.nfca.enabled {
            let params = build_bitrate_table(TechType::NfcA, config.sample_rate, RING_CAPACITY as u32)[0];
            candidates.push(TechCandidate {
                tech: TechType::NfcA,
                decoder: Box::new(NfcADecoder::new(config.sample_rate, max_frame_size)),
                search: SearchWindow::default(),
                correlator: Correlator::new(&params),
            });
        }
        if config.nfcb.enabled {
            let params = build_bitrate_table(TechType::NfcB, config.sample_rate, RING_CAPACITY as u32)[0];
            candidates.push(TechCandidate {
                tech: TechType::NfcB,
                decoder: Box::new(NfcBDecoder::new(config.sample_rate, max_frame_size)),
                search: SearchWindow::default(),
                correlator: Correlator::new(&params),
            });
        }
        if config.nfcf.enabled {
            let params = build_bitrate_table(TechType::NfcF, config.sample_rate, RING_CAPACITY as u32)[1];
            candidates.push(TechCandidate {
                tech: TechType::NfcF,
                decoder: Box::new(NfcFDecoder::new(config.sample_rate, max_frame_size)),
                search: SearchWindow::default(),
                correlator: Correlator::new(&params),
            });
        }
        if config.nfcv.enabled {
            let params = build_nfcv_bitrate(config.sample_rate, RING_CAPACITY as u32);
            candidates.push(TechCandidate {
                tech: TechType::NfcV,
                decoder: Box::new(NfcVDecoder::new(max_frame_size, u64::from(params.period0_symbol_samples))),
                search: SearchWindow::default(),
                correlator: Correlator::new(&params),
            });
        }

        candidates
    }

    /// Reconfigure the worker; only valid to call between frames.
    pub fn configure(&mut self, config: DecoderConfig) -> Result<()> {
        config.validate()?;
        self.candidates = Self::build_candidates(&config);
        self.locked = None;
        self.suppress_detect_until = 0;
        self.protocol.reset_defaults();
        self.debug_taps = DebugTaps::new(config.debug_channels_enabled);
        self.config = config;
        Ok(())
    }

    /// Process one sample block, pushing any completed frames into
    /// `frame_sink`. An empty block signals EOF: any in-flight frame is
    /// flushed as `Truncated` and all state resets.
    pub fn process_block(&mut self, block: &SampleBlock, frame_sink: &Sender<RawFrame>) {
        if block.is_empty() {
            self.flush_truncated(frame_sink);
            return;
        }

        for &raw in &block.samples {
            let record = self.envelope.push(raw);
            self.sample_clock += 1;
            self.ring.push(raw);

            self.debug_taps.set(TapChannel::Integrator, record.filtered_value);
            self.debug_taps.set(TapChannel::ModulationDepth, record.modulate_depth);
            self.debug_taps.set(TapChannel::Correlation, record.filtered_value - record.mean_deviation);
            self.debug_taps.set(TapChannel::SyncMarker, if self.locked.is_some() { 1.0 } else { 0.0 });

            if let Some(index) = self.locked {
                let candidate = &mut self.candidates[index];
                let correlation = candidate.correlator.push(self.sample_clock, record.filtered_value);
                let tick = SampleTick {
                    sample_clock: self.sample_clock,
                    correlation,
                    modulation_depth: record.modulate_depth,
                    envelope_peak: record.envelope.max(1e-6),
                };
                let tech_config = self.config.tech_config(candidate.tech).expect("locked tech has config");

                match candidate.decoder.tick(tick, tech_config) {
                    crate::tech::TickOutcome::Continue => {}
                    crate::tech::TickOutcome::Frame(mut frame) => {
                        let phase = crate::protocol::track_frame(&mut self.protocol, frame.tech, &frame.data);
                        frame.phase = phase;
                        self.suppress_detect_until = self.sample_clock.saturating_add(carrier_cycles_to_samples(
                            self.protocol.frame_guard_time,
                            self.config.sample_rate,
                        ));
                        self.publish(frame, frame_sink);
                        candidate.correlator.reset();
                        self.locked = None;
                    }
                    crate::tech::TickOutcome::Reset => {
                        candidate.correlator.reset();
                        self.locked = None;
                    }
                }
                continue;
            }

            // No tech locked: run the detector bank in parallel across
            // all enabled candidates, electing the first to qualify.
            if self.sample_clock < self.suppress_detect_until {
                continue;
            }
            if record.envelope < self.config.power_level_threshold {
                continue;
            }

            for (index, candidate) in self.candidates.iter_mut().enumerate() {
                let Some(tech_config) = self.config.tech_config(candidate.tech) else {
                    continue;
                };
                let correlation = candidate.correlator.push(self.sample_clock, record.filtered_value);
                candidate.search.observe(correlation, record.modulate_depth);

                if candidate.search.qualifies(
                    tech_config.correlation_threshold,
                    record.envelope.max(1e-6),
                    tech_config.min_modulation_deep,
                    tech_config.max_modulation_deep,
                ) {
                    self.locked = Some(index);
                    candidate.search.reset();
                    break;
                }
            }
        }
    }

    /// Stage `frame` for delivery and flush as much of the staging queue
    /// as `frame_sink` currently has room for. If the sink stays full for
    /// long enough that staging itself would overflow
    /// `FRAME_SINK_STAGING_CAPACITY`, the *oldest* staged frame is
    /// evicted to make room — matching §5's "oldest entries are dropped
    /// when full" sink semantics — and `dropped_frames` is incremented so
    /// the drop count is reported via [`DecoderStatus`].
    fn publish(&mut self, frame: RawFrame, frame_sink: &Sender<RawFrame>) {
        self.pending_frames.push_back(frame);
        if self.pending_frames.len() > FRAME_SINK_STAGING_CAPACITY {
            self.pending_frames.pop_front();
            self.dropped_frames += 1;
            self.logger.warn("FRAME", "sink queue full, dropped oldest frame");
        }

        while let Some(next) = self.pending_frames.pop_front() {
            match frame_sink.try_send(next) {
                Ok(()) => {}
                Err(TrySendError::Full(returned)) => {
                    self.pending_frames.push_front(returned);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.logger.error("FRAME", "frame sink disconnected");
                    break;
                }
            }
        }
    }

    fn flush_truncated(&mut self, frame_sink: &Sender<RawFrame>) {
        if let Some(index) = self.locked.take() {
            if let Some(frame) = self.candidates[index].decoder.abort() {
                self.publish(frame, frame_sink);
            }
        }
        for candidate in &mut self.candidates {
            candidate.correlator.reset();
            candidate.search.reset();
        }
        self.envelope.reset();
        self.protocol.reset_defaults();
        self.suppress_detect_until = 0;
    }

    pub fn status(&self, queue_size: usize) -> DecoderStatus {
        DecoderStatus {
            queue_size,
            sample_rate: self.config.sample_rate,
            stream_time: self.sample_clock as f64 / f64::from(self.config.sample_rate.max(1)),
            nfca_enabled: self.config.nfca.enabled,
            nfcb_enabled: self.config.nfcb.enabled,
            nfcf_enabled: self.config.nfcf.enabled,
            nfcv_enabled: self.config.nfcv.enabled,
            dropped_frames: self.dropped_frames,
        }
    }

    fn is_idle(&self) -> bool {
        self.locked.is_none()
    }
}

/// Runs the worker's cooperative loop until the command channel closes.
/// This is the only place in the crate that blocks on I/O; everything it
/// calls is non-blocking and allocation-free after `DecoderWorker::new`.
pub fn run(
    mut worker: DecoderWorker,
    commands: Receiver<WorkerCommand>,
    samples: Receiver<SampleBlock>,
    frames: Sender<RawFrame>,
    status: Sender<DecoderStatus>,
) {
    loop {
        match commands.try_recv() {
            Ok(WorkerCommand::Start) => worker.running = true,
            Ok(WorkerCommand::Stop) => {
                worker.running = false;
                worker.flush_truncated(&frames);
            }
            Ok(WorkerCommand::Configure(config)) => {
                if worker.is_idle() {
                    let _ = worker.configure(config);
                }
            }
            Err(crossbeam_channel::TryRecvError::Empty) => {}
            Err(crossbeam_channel::TryRecvError::Disconnected) => return,
        }

        if !worker.running {
            std::thread::sleep(POLL_TIMEOUT);
            continue;
        }

        match samples.recv_timeout(POLL_TIMEOUT) {
            Ok(block) => {
                worker.process_block(&block, &frames);
                let _ = status.try_send(worker.status(samples.len()));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;

    fn test_config() -> DecoderConfig {
        let mut config = DecoderConfig::default();
        config.nfcb.enabled = false;
        config.nfcf.enabled = false;
        config.nfcv.enabled = false;
        config
    }

    #[test]
    fn new_worker_starts_idle() {
        let worker = DecoderWorker::new(test_config()).unwrap();
        assert!(worker.is_idle());
    }

    #[test]
    fn debug_taps_stay_empty_when_disabled() {
        let mut config = test_config();
        config.debug_channels_enabled = false;
        let mut worker = DecoderWorker::new(config).unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let block = SampleBlock {
            sample_rate: 10_000_000,
            first_sample: 0,
            first_sample_time: chrono::Utc::now(),
            channel_layout: crate::types::ChannelLayout::IQ,
            samples: vec![Complex32::new(1.0, 0.0); 10],
        };
        worker.process_block(&block, &tx);
        assert!(worker.debug_taps().channel(crate::debug_taps::TapChannel::Integrator).is_empty());
    }

    #[test]
    fn debug_taps_record_one_sample_per_tick_when_enabled() {
        let mut config = test_config();
        config.debug_channels_enabled = true;
        let mut worker = DecoderWorker::new(config).unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let block = SampleBlock {
            sample_rate: 10_000_000,
            first_sample: 0,
            first_sample_time: chrono::Utc::now(),
            channel_layout: crate::types::ChannelLayout::IQ,
            samples: vec![Complex32::new(1.0, 0.0); 10],
        };
        worker.process_block(&block, &tx);
        assert_eq!(worker.debug_taps().channel(crate::debug_taps::TapChannel::Integrator).len(), 10);
    }

    #[test]
    fn empty_block_flushes_and_resets() {
        let mut worker = DecoderWorker::new(test_config()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let block = SampleBlock {
            sample_rate: 10_000_000,
            first_sample: 0,
            first_sample_time: chrono::Utc::now(),
            channel_layout: crate::types::ChannelLayout::IQ,
            samples: Vec::new(),
        };
        worker.process_block(&block, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_drops_oldest_staged_frame_once_staging_overflows() {
        let mut worker = DecoderWorker::new(test_config()).unwrap();
        // Zero-capacity channel with no receiver draining it: every
        // `try_send` returns `Full`, so every published frame stays staged.
        let (tx, _rx) = crossbeam_channel::bounded(0);

        for i in 0..(FRAME_SINK_STAGING_CAPACITY + 3) {
            let mut frame = sample_frame();
            frame.sample_start = i as u64;
            worker.publish(frame, &tx);
        }

        assert_eq!(worker.dropped_frames, 3);
        assert_eq!(worker.pending_frames.len(), FRAME_SINK_STAGING_CAPACITY);
        // The oldest three (sample_start 0, 1, 2) were evicted; the staging
        // queue now starts at 3.
        assert_eq!(worker.pending_frames.front().unwrap().sample_start, 3);
        assert_eq!(worker.status(0).dropped_frames, 3);
    }

    #[test]
    fn publish_flushes_staged_frames_once_the_sink_has_room() {
        let mut worker = DecoderWorker::new(test_config()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        // Fill the channel so the next publish has nowhere to go and stays
        // staged.
        tx.try_send(sample_frame()).unwrap();
        let mut pending = sample_frame();
        pending.sample_start = 1;
        worker.publish(pending, &tx);
        assert_eq!(worker.pending_frames.len(), 1);
        assert_eq!(worker.dropped_frames, 0);

        // Draining one slot gives `publish` room to flush the staged frame
        // on its next call.
        assert_eq!(rx.recv().unwrap().sample_start, 0);
        let mut next = sample_frame();
        next.sample_start = 2;
        worker.publish(next, &tx);
        assert!(worker.pending_frames.is_empty());
        assert_eq!(rx.recv().unwrap().sample_start, 1);
        assert_eq!(rx.recv().unwrap().sample_start, 2);
    }

    fn sample_frame() -> RawFrame {
        RawFrame {
            tech: crate::types::TechType::NfcA,
            frame_type: crate::frame_state::FrameType::Poll,
            phase: crate::types::FramePhase::Sense,
            sample_start: 0,
            sample_end: 10,
            time_start: chrono::Utc::now(),
            time_end: chrono::Utc::now(),
            bitrate: 106_000,
            flags: crate::types::FrameFlags::none(),
            data: vec![0x26],
        }
    }

    #[test]
    fn low_power_samples_never_lock_a_candidate() {
        let mut worker = DecoderWorker::new(test_config()).unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let block = SampleBlock {
            sample_rate: 10_000_000,
            first_sample: 0,
            first_sample_time: chrono::Utc::now(),
            channel_layout: crate::types::ChannelLayout::IQ,
            samples: vec![Complex32::new(0.0, 0.0); 100],
        };
        worker.process_block(&block, &tx);
        assert!(worker.is_idle());
    }
}
