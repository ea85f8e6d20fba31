//! The segmented packet loop.
//!
//! Single-threaded and synchronous: demux, lowest-pts-first selection,
//! remux or decode/encode, and file rotation all happen in program order.
//! The only blocking point is the ack gate at each rotation.
//!
//! Every muxed timestamp is rewritten into [`OUTPUT_TIME_BASE`] relative to
//! the first packet of the session. A packet whose pts reaches the end of the
//! current segment closes it before being written, so each finalized file
//! covers at most one segment length.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::SegmentConfig;
use crate::stats::SessionStats;

use super::ack::AckGate;
use super::core::{
    MediaKind, OUTPUT_TIME_BASE, Rational, SchedulerState, SegmentNaming, SegmentState,
    StreamDecision, TranscodeError, TranscodeResult,
};
use super::media::{InputHandle, MediaEngine, OutputHandle, OutputStream, Packet};
use super::progress::{LogProgressSink, ProgressReporter, ProgressSink};
use super::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Copied,
    Encoded,
    Filler,
}

pub struct SegmentScheduler<'s> {
    session: &'s Session,
    config: SegmentConfig,
    naming: SegmentNaming,
    segment: SegmentState,
    state: SchedulerState,
    ack: AckGate,
    sink: Box<dyn ProgressSink>,
    throttle: Duration,
    stats: SessionStats,

    input: Option<InputHandle>,
    output: Option<OutputHandle>,

    /// Demuxed packets waiting per output stream
    queues: Vec<VecDeque<Packet>>,
    /// Streams that demuxed a packet at or past the output duration
    exhausted: Vec<bool>,
    /// End of the last written packet per output stream, relative output ticks
    next_pts: Vec<i64>,
    /// Absolute output ticks of the first packet
    origin: Option<i64>,
    duration_ticks: i64,
    /// Next relative pts at which an encoded video frame must be a keyframe
    next_keyframe_at: i64,
    real_end_ticks: i64,
    real_packets: u64,
}

impl<'s> SegmentScheduler<'s> {
    pub fn new(session: &'s Session, config: &SegmentConfig, ack: AckGate) -> Self {
        let naming = session.naming(&config.extension);
        let segment = SegmentState::new(
            session.options.initial_segment,
            config.segment_seconds,
            &naming,
        );
        let duration_secs = session.output_duration_secs();
        let duration_ticks = if duration_secs > 0.0 {
            OUTPUT_TIME_BASE.ticks_from_secs(duration_secs)
        } else {
            i64::MAX
        };
        let streams = session.outputs.len();

        Self {
            session,
            config: config.clone(),
            naming,
            segment,
            state: SchedulerState::Idle,
            ack,
            sink: Box::new(LogProgressSink),
            throttle: Duration::from_millis(config.throttle_ms),
            stats: SessionStats::new(session.id),
            input: None,
            output: None,
            queues: vec![VecDeque::new(); streams],
            exhausted: vec![false; streams],
            next_pts: vec![0; streams],
            origin: None,
            duration_ticks,
            next_keyframe_at: 0,
            real_end_ticks: 0,
            real_packets: 0,
        }
    }

    pub fn with_progress_sink(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn segment(&self) -> &SegmentState {
        &self.segment
    }

    /// Run the session to completion.
    ///
    /// On failure the open handles are closed but temp files stay on disk.
    pub fn run<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<SessionStats> {
        let started = Instant::now();
        tracing::info!(
            session = %self.session.id,
            location = %self.session.probe.location,
            segment = self.segment.segment_index,
            segment_seconds = self.config.segment_seconds,
            ack_paced = self.ack.is_enabled(),
            "starting segmented transcode"
        );

        let result = self.drive(engine, started);
        self.stats.wall_time_secs = started.elapsed().as_secs_f64();
        self.stats.ack_failed_open = self.ack.is_failed_open();

        match result {
            Ok(()) => {
                self.state = SchedulerState::Finished;
                tracing::info!(session = %self.session.id, "{}", self.stats.summary());
                Ok(self.stats.clone())
            }
            Err(e) => {
                self.state = SchedulerState::Failed;
                self.release(engine);
                tracing::error!(
                    session = %self.session.id,
                    segment = self.segment.segment_index,
                    pts = ?self.segment.last_mux_pts,
                    "transcode failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    fn drive<E: MediaEngine>(&mut self, engine: &mut E, started: Instant) -> TranscodeResult<()> {
        self.state = SchedulerState::Priming;
        let input = engine
            .open_input(&self.session.probe.location)
            .map_err(|e| TranscodeError::SourceProbe(format!("{:#}", e)))?;
        self.input = Some(input);
        self.open_segment(engine)?;
        self.state = SchedulerState::Streaming;

        let mut reporter = ProgressReporter::new(
            self.session.output_duration_secs(),
            Duration::from_millis(self.config.progress_interval_ms),
            started,
        );

        let mut eof = false;
        loop {
            if !eof {
                eof = self.fill_queues(engine, input)?;
            }
            let Some(index) = self.select_next() else {
                if eof {
                    break;
                }
                continue;
            };
            let Some(packet) = self.queues[index].pop_front() else {
                continue;
            };
            self.process(engine, index, packet)?;

            self.report_progress(&mut reporter);
            if !self.throttle.is_zero() {
                thread::sleep(self.throttle);
            }
        }

        self.state = SchedulerState::Draining;
        self.drain_encoders(engine)?;
        self.stats.real_output_secs = OUTPUT_TIME_BASE.secs_from_ticks(self.real_end_ticks);
        self.check_produced_duration()?;

        self.fill_tail(engine)?;
        self.finish_last_segment(engine)?;

        if let Some(input) = self.input.take() {
            if let Err(e) = engine.close_input(input) {
                tracing::warn!("closing input failed: {:#}", e);
            }
        }

        self.stats.output_secs =
            OUTPUT_TIME_BASE.secs_from_ticks(self.next_pts.iter().copied().max().unwrap_or(0));
        Ok(())
    }

    /// Read until every live output stream has a packet queued, one queue is
    /// full, or the input ends. Returns true at end of input, or once every
    /// output stream has reached the output duration.
    fn fill_queues<E: MediaEngine>(
        &mut self,
        engine: &mut E,
        input: InputHandle,
    ) -> TranscodeResult<bool> {
        let cap = self.config.max_queued_packets.max(1);
        loop {
            let starving = self
                .queues
                .iter()
                .zip(&self.exhausted)
                .any(|(q, done)| q.is_empty() && !done);
            let full = self.queues.iter().any(|q| q.len() >= cap);
            if !starving || full {
                return Ok(false);
            }

            let packet = engine.demux(input).map_err(|e| TranscodeError::Encode {
                segment: self.segment.segment_index,
                stream: 0,
                pts: self.segment.last_mux_pts,
                detail: format!("demux: {:#}", e),
            })?;

            let Some(packet) = packet else {
                tracing::debug!(segment = self.segment.segment_index, "end of input");
                return Ok(true);
            };

            let Some(stream) = self.session.output_for_source(packet.stream_index) else {
                self.stats.packets_dropped += 1;
                continue;
            };
            let index = stream.output_index;

            if self.past_duration(&packet) {
                self.stats.packets_dropped += 1;
                self.exhausted[index] = true;
                if self.exhausted.iter().all(|done| *done) {
                    tracing::debug!(
                        segment = self.segment.segment_index,
                        "reached output duration"
                    );
                    return Ok(true);
                }
                continue;
            }
            self.queues[index].push_back(packet);
        }
    }

    /// True when a demuxed packet starts at or after the output duration.
    /// Before the origin is known the packet is taken as the origin.
    fn past_duration(&self, packet: &Packet) -> bool {
        if self.duration_ticks == i64::MAX {
            return false;
        }
        match packet.timestamp_in(OUTPUT_TIME_BASE) {
            Some(absolute) => absolute - self.origin.unwrap_or(absolute) >= self.duration_ticks,
            None => false,
        }
    }

    /// Output stream whose head packet has the lowest normalized pts
    fn select_next(&self) -> Option<usize> {
        self.queues
            .iter()
            .enumerate()
            .filter_map(|(i, q)| {
                q.front().map(|p| {
                    let key = p.timestamp_in(OUTPUT_TIME_BASE).unwrap_or(i64::MIN);
                    (key, i)
                })
            })
            .min()
            .map(|(_, i)| i)
    }

    fn process<E: MediaEngine>(
        &mut self,
        engine: &mut E,
        index: usize,
        packet: Packet,
    ) -> TranscodeResult<()> {
        let session = self.session;
        let stream = &session.outputs[index];

        match &stream.decision {
            StreamDecision::Copy(plan) => {
                let filtered = engine
                    .filter(packet, &plan.filters)
                    .map_err(|e| self.mux_error(index, e))?;
                self.write_packet(engine, stream, filtered, WriteKind::Copied)
            }
            StreamDecision::Encode(_) => {
                let frames = engine
                    .decode(&packet)
                    .map_err(|e| self.encode_error(index, e))?;

                for frame in frames {
                    let rel = self.relative_ticks(frame.pts, frame.time_base, index);
                    if rel >= self.duration_ticks {
                        self.stats.packets_dropped += 1;
                        continue;
                    }

                    let force = stream.kind == MediaKind::Video && rel >= self.next_keyframe_at;
                    if force {
                        let length = self.segment.segment_length_ticks;
                        self.next_keyframe_at = (rel / length + 1) * length;
                    }

                    let packets = engine
                        .encode(stream, Some(&frame), force)
                        .map_err(|e| self.encode_error(index, e))?;
                    for packet in packets {
                        self.write_packet(engine, stream, packet, WriteKind::Encoded)?;
                    }
                }
                Ok(())
            }
            StreamDecision::Suppressed => {
                self.stats.packets_dropped += 1;
                Ok(())
            }
        }
    }

    fn relative_ticks(&mut self, pts: Option<i64>, time_base: Rational, index: usize) -> i64 {
        match pts {
            Some(pts) => {
                let absolute = Rational::rescale(pts, time_base, OUTPUT_TIME_BASE);
                let origin = *self.origin.get_or_insert(absolute);
                (absolute - origin).max(0)
            }
            None => self.next_pts[index],
        }
    }

    /// Rebase a source or encoder packet and write it, dropping anything at
    /// or past the output duration
    fn write_packet<E: MediaEngine>(
        &mut self,
        engine: &mut E,
        stream: &OutputStream,
        mut packet: Packet,
        kind: WriteKind,
    ) -> TranscodeResult<()> {
        let index = stream.output_index;
        let rel = self.relative_ticks(packet.pts.or(packet.dts), packet.time_base, index);
        if rel >= self.duration_ticks {
            self.stats.packets_dropped += 1;
            return Ok(());
        }

        let origin = self.origin.unwrap_or(0);
        let time_base = packet.time_base;
        packet.dts = packet
            .dts
            .map(|d| Rational::rescale(d, time_base, OUTPUT_TIME_BASE) - origin);
        packet.duration = Rational::rescale(packet.duration, time_base, OUTPUT_TIME_BASE).max(0);
        packet.time_base = OUTPUT_TIME_BASE;

        self.emit(engine, stream, packet, rel, kind)
    }

    /// Rotate as needed, then mux a packet already in relative output ticks
    fn emit<E: MediaEngine>(
        &mut self,
        engine: &mut E,
        stream: &OutputStream,
        mut packet: Packet,
        rel: i64,
        kind: WriteKind,
    ) -> TranscodeResult<()> {
        while self.segment.reached_boundary(rel, self.duration_ticks) {
            self.rotate(engine)?;
        }

        let index = stream.output_index;
        packet.stream_index = index;
        packet.pts = Some(rel);
        if packet.dts.is_none() {
            packet.dts = Some(rel);
        }

        if stream.kind == MediaKind::Video && self.segment.force_next_keyframe {
            if !packet.keyframe && kind != WriteKind::Filler {
                tracing::debug!(
                    segment = self.segment.segment_index,
                    stream = index,
                    pts = rel,
                    "segment starts on a non-keyframe"
                );
            }
            self.segment.force_next_keyframe = false;
        }

        let output = self.current_output(index)?;
        engine
            .mux(output, &packet)
            .map_err(|e| self.mux_error(index, e))?;

        self.segment.record_write(rel);
        let end = rel + packet.duration;
        self.next_pts[index] = self.next_pts[index].max(end);
        self.stats.bytes_written += packet.data.len() as u64;
        match kind {
            WriteKind::Copied => self.stats.packets_copied += 1,
            WriteKind::Encoded => self.stats.packets_encoded += 1,
            WriteKind::Filler => self.stats.packets_filled += 1,
        }
        if kind != WriteKind::Filler {
            self.real_end_ticks = self.real_end_ticks.max(end);
            self.real_packets += 1;
        }
        Ok(())
    }

    fn current_output(&self, stream: usize) -> TranscodeResult<OutputHandle> {
        self.output.ok_or_else(|| TranscodeError::MuxWrite {
            segment: self.segment.segment_index,
            stream,
            pts: self.segment.last_mux_pts,
            detail: "no open output".to_string(),
        })
    }

    fn open_segment<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<()> {
        let path = self.segment.output_path.clone();
        let output = engine
            .open_output(&path, &self.session.outputs)
            .map_err(|e| self.mux_error(0, e))?;
        self.output = Some(output);
        engine
            .write_header(output)
            .map_err(|e| self.mux_error(0, e))?;
        tracing::debug!(
            segment = self.segment.segment_index,
            path = %path.display(),
            "segment opened"
        );
        Ok(())
    }

    fn close_segment<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<()> {
        let output = self.current_output(0)?;
        engine.flush(output).map_err(|e| self.mux_error(0, e))?;
        self.output = None;
        engine
            .close_output(output)
            .map_err(|e| self.mux_error(0, e))
    }

    fn finalize_segment(&mut self) -> TranscodeResult<()> {
        let index = self.segment.segment_index;
        let final_path = self.naming.final_path(index);
        fs::rename(&self.segment.output_path, &final_path)
            .map_err(|e| TranscodeError::io(&final_path, e))?;

        tracing::info!(
            segment = index,
            packets = self.segment.packets_in_segment,
            path = %final_path.display(),
            "segment finalized"
        );
        self.stats.record_segment(index, final_path);
        Ok(())
    }

    fn rotate<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<()> {
        self.state = SchedulerState::Rotating;
        self.close_segment(engine)?;
        self.finalize_segment()?;

        let finished = self.segment.segment_index;
        if self.ack.would_block(finished) {
            tracing::debug!(segment = finished, "waiting for consumer ack");
        }
        self.ack.wait_for(finished);

        self.segment.advance(&self.naming);
        self.open_segment(engine)?;
        self.state = SchedulerState::Streaming;
        Ok(())
    }

    fn drain_encoders<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<()> {
        let session = self.session;
        for stream in &session.outputs {
            if !matches!(stream.decision, StreamDecision::Encode(_)) {
                continue;
            }
            let index = stream.output_index;
            let packets = engine
                .encode(stream, None, false)
                .map_err(|e| self.encode_error(index, e))?;
            tracing::debug!(stream = index, delayed = packets.len(), "encoder drained");
            for packet in packets {
                self.write_packet(engine, stream, packet, WriteKind::Encoded)?;
            }
        }
        Ok(())
    }

    /// Pad every stream up to the output duration with filler packets
    fn fill_tail<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<()> {
        if self.duration_ticks == i64::MAX {
            return Ok(());
        }

        let session = self.session;
        let divisions = i64::from(self.config.tail_fill_divisions.max(1));
        let step = (self.segment.segment_length_ticks / divisions).max(1);

        loop {
            let mut progressed = false;
            for stream in &session.outputs {
                let index = stream.output_index;
                let at = self.next_pts[index];
                if at >= self.duration_ticks {
                    continue;
                }
                let duration = step.min(self.duration_ticks - at);

                let filler = engine
                    .filler(stream, at, duration, OUTPUT_TIME_BASE)
                    .map_err(|e| self.encode_error(index, e))?;
                if let Some(mut packet) = filler {
                    packet.duration = duration;
                    packet.dts = None;
                    packet.time_base = OUTPUT_TIME_BASE;
                    self.emit(engine, stream, packet, at, WriteKind::Filler)?;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        if self.stats.packets_filled > 0 {
            tracing::info!(
                packets = self.stats.packets_filled,
                real_secs = OUTPUT_TIME_BASE.secs_from_ticks(self.real_end_ticks),
                "padded tail to output duration"
            );
        }
        Ok(())
    }

    fn finish_last_segment<E: MediaEngine>(&mut self, engine: &mut E) -> TranscodeResult<()> {
        self.close_segment(engine)?;

        if self.segment.packets_in_segment > 0 {
            self.finalize_segment()
        } else {
            match fs::remove_file(&self.segment.output_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(TranscodeError::io(&self.segment.output_path, e)),
            }
        }
    }

    fn check_produced_duration(&self) -> TranscodeResult<()> {
        let segment_secs = OUTPUT_TIME_BASE.secs_from_ticks(self.segment.segment_length_ticks);
        let required_secs = if self.duration_ticks == i64::MAX {
            segment_secs
        } else {
            segment_secs.min(OUTPUT_TIME_BASE.secs_from_ticks(self.duration_ticks))
        };
        let produced_secs = OUTPUT_TIME_BASE.secs_from_ticks(self.real_end_ticks);

        if self.real_packets == 0 || produced_secs + 1.0 < required_secs {
            return Err(TranscodeError::DurationInsufficient {
                produced_secs,
                required_secs,
            });
        }
        Ok(())
    }

    fn report_progress(&mut self, reporter: &mut ProgressReporter) {
        let now_secs = OUTPUT_TIME_BASE.secs_from_ticks(self.segment.last_output_pts.unwrap_or(0));
        let Some(sample) = reporter.sample(now_secs, Instant::now()) else {
            return;
        };

        match self.sink.report(&sample) {
            Ok(hint) => {
                reporter.set_throttle_hint(hint);
                self.throttle = Duration::from_millis(self.config.throttle_ms) + hint.delay();
            }
            Err(e) => tracing::warn!("progress report failed: {:#}", e),
        }
    }

    /// Best-effort close after a failure; temp files are left in place
    fn release<E: MediaEngine>(&mut self, engine: &mut E) {
        if let Some(output) = self.output.take() {
            if let Err(e) = engine.close_output(output) {
                tracing::warn!("closing output after failure: {:#}", e);
            }
        }
        if let Some(input) = self.input.take() {
            if let Err(e) = engine.close_input(input) {
                tracing::warn!("closing input after failure: {:#}", e);
            }
        }
    }

    fn mux_error(&self, stream: usize, e: anyhow::Error) -> TranscodeError {
        TranscodeError::MuxWrite {
            segment: self.segment.segment_index,
            stream,
            pts: self.segment.last_mux_pts,
            detail: format!("{:#}", e),
        }
    }

    fn encode_error(&self, stream: usize, e: anyhow::Error) -> TranscodeError {
        TranscodeError::Encode {
            segment: self.segment.segment_index,
            stream,
            pts: self.segment.last_mux_pts,
            detail: format!("{:#}", e),
        }
    }
}
