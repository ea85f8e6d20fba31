//! Deterministic in-process [`MediaEngine`].
//!
//! Packets are generated from a [`SourceProbe`] instead of read from a file:
//! video at the probed frame rate, audio in 1024-sample blocks, subtitles
//! every few seconds. Outputs are plain text, one line per muxed packet, so a
//! session can be run and inspected without ffmpeg.
//!
//! The encoder holds one frame back like a real encoder with lookahead, which
//! makes end-of-stream draining observable.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::core::{BitstreamFilter, MediaKind, Rational, SourceProbe, StreamDetail};
use super::media::{Frame, InputHandle, MediaEngine, OutputHandle, OutputStream, Packet};

pub const HEADER_LINE: &str = "#ffseg-synthetic";
pub const TRAILER_LINE: &str = "#end";

const AUDIO_BLOCK_SAMPLES: f64 = 1024.0;
const SUBTITLE_INTERVAL_SECS: f64 = 5.0;
const FALLBACK_FPS: f64 = 25.0;
const FALLBACK_SAMPLE_RATE: f64 = 48_000.0;

#[derive(Debug, Clone)]
struct StreamCursor {
    stream_index: usize,
    kind: MediaKind,
    time_base: Rational,
    step: i64,
    next_pts: i64,
    end_pts: i64,
    count: u64,
    gop: u64,
}

impl StreamCursor {
    fn next_secs(&self) -> f64 {
        self.time_base.secs_from_ticks(self.next_pts)
    }

    fn exhausted(&self) -> bool {
        self.next_pts >= self.end_pts
    }
}

struct SyntheticOutput {
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct SyntheticEngine {
    probe: SourceProbe,
    real_duration_secs: f64,
    start_offset_secs: f64,
    keyframe_interval_secs: f64,
    fail_write_at: Option<u64>,
    cursors: Vec<StreamCursor>,
    /// Frame held back per output stream, with its forced-keyframe flag
    pending: HashMap<usize, (Frame, bool)>,
    outputs: Vec<Option<SyntheticOutput>>,
    input_open: bool,
    writes: u64,
}

impl SyntheticEngine {
    pub fn new(probe: SourceProbe) -> Self {
        let real_duration_secs = probe.duration_secs;
        Self {
            probe,
            real_duration_secs,
            start_offset_secs: 0.0,
            keyframe_interval_secs: 2.0,
            fail_write_at: None,
            cursors: Vec::new(),
            pending: HashMap::new(),
            outputs: Vec::new(),
            input_open: false,
            writes: 0,
        }
    }

    /// Stop generating packets after `secs`, regardless of the probed duration
    pub fn with_real_duration(mut self, secs: f64) -> Self {
        self.real_duration_secs = secs.max(0.0);
        self
    }

    /// First packet timestamps start here instead of zero
    pub fn with_start_offset(mut self, secs: f64) -> Self {
        self.start_offset_secs = secs.max(0.0);
        self
    }

    pub fn with_keyframe_interval(mut self, secs: f64) -> Self {
        self.keyframe_interval_secs = secs.max(0.0);
        self
    }

    /// Fail the `n`th mux call (1-based)
    pub fn with_fail_write_at(mut self, n: u64) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn build_cursors(&self) -> Vec<StreamCursor> {
        self.probe
            .streams
            .iter()
            .filter_map(|stream| {
                let step_secs = match &stream.detail {
                    StreamDetail::Video(v) => {
                        let fps = v.measured_fps();
                        1.0 / if fps > 0.0 { fps } else { FALLBACK_FPS }
                    }
                    StreamDetail::Audio(a) => {
                        let rate = if a.sample_rate > 0 {
                            f64::from(a.sample_rate)
                        } else {
                            FALLBACK_SAMPLE_RATE
                        };
                        AUDIO_BLOCK_SAMPLES / rate
                    }
                    StreamDetail::Subtitle => SUBTITLE_INTERVAL_SECS,
                    StreamDetail::Data => return None,
                };

                let time_base = stream.time_base;
                let step = time_base.ticks_from_secs(step_secs).max(1);
                let start = time_base.ticks_from_secs(self.start_offset_secs);
                let end = time_base.ticks_from_secs(self.start_offset_secs + self.real_duration_secs);
                let gop = ((self.keyframe_interval_secs / step_secs).round() as u64).max(1);

                Some(StreamCursor {
                    stream_index: stream.index,
                    kind: stream.kind(),
                    time_base,
                    step,
                    next_pts: start,
                    end_pts: end,
                    count: 0,
                    gop,
                })
            })
            .collect()
    }

    fn output_mut(&mut self, output: OutputHandle) -> Result<&mut SyntheticOutput> {
        self.outputs
            .get_mut(output.0)
            .and_then(Option::as_mut)
            .with_context(|| format!("output {} is not open", output.0))
    }

    fn encoded_packet(stream: &OutputStream, frame: Frame, keyframe: bool) -> Packet {
        let mut data = b"enc:".to_vec();
        data.extend_from_slice(&frame.data);
        Packet {
            stream_index: stream.source_index,
            pts: frame.pts,
            dts: frame.pts,
            duration: frame.duration,
            time_base: frame.time_base,
            keyframe,
            data,
        }
    }
}

impl MediaEngine for SyntheticEngine {
    fn open_input(&mut self, location: &str) -> Result<InputHandle> {
        if location != self.probe.location {
            bail!("synthetic engine was built for {}, not {}", self.probe.location, location);
        }
        self.cursors = self.build_cursors();
        self.input_open = true;
        Ok(InputHandle(0))
    }

    fn demux(&mut self, _input: InputHandle) -> Result<Option<Packet>> {
        if !self.input_open {
            bail!("input is not open");
        }

        let next = self
            .cursors
            .iter_mut()
            .filter(|c| !c.exhausted())
            .min_by(|a, b| a.next_secs().total_cmp(&b.next_secs()));
        let Some(cursor) = next else {
            return Ok(None);
        };

        let keyframe = match cursor.kind {
            MediaKind::Video => cursor.count % cursor.gop == 0,
            _ => true,
        };
        let packet = Packet {
            stream_index: cursor.stream_index,
            pts: Some(cursor.next_pts),
            dts: Some(cursor.next_pts),
            duration: cursor.step,
            time_base: cursor.time_base,
            keyframe,
            data: format!("src:{}:{}", cursor.stream_index, cursor.count).into_bytes(),
        };
        cursor.next_pts += cursor.step;
        cursor.count += 1;
        Ok(Some(packet))
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<Frame>> {
        Ok(vec![Frame {
            stream_index: packet.stream_index,
            pts: packet.pts,
            duration: packet.duration,
            time_base: packet.time_base,
            data: packet.data.clone(),
        }])
    }

    fn encode(
        &mut self,
        stream: &OutputStream,
        frame: Option<&Frame>,
        force_keyframe: bool,
    ) -> Result<Vec<Packet>> {
        let key = stream.output_index;
        let held = match frame {
            Some(frame) => self.pending.insert(key, (frame.clone(), force_keyframe)),
            None => self.pending.remove(&key),
        };
        Ok(held
            .map(|(frame, keyframe)| Self::encoded_packet(stream, frame, keyframe))
            .into_iter()
            .collect())
    }

    fn filter(&mut self, packet: Packet, filters: &[BitstreamFilter]) -> Result<Packet> {
        if !filters.is_empty() {
            tracing::trace!(
                stream = packet.stream_index,
                filters = filters.len(),
                "bitstream filters pass through"
            );
        }
        Ok(packet)
    }

    fn filler(
        &mut self,
        stream: &OutputStream,
        pts: i64,
        duration: i64,
        time_base: Rational,
    ) -> Result<Option<Packet>> {
        if !matches!(stream.kind, MediaKind::Video | MediaKind::Audio) {
            return Ok(None);
        }
        Ok(Some(Packet {
            stream_index: stream.source_index,
            pts: Some(pts),
            dts: Some(pts),
            duration,
            time_base,
            keyframe: stream.kind == MediaKind::Audio,
            data: b"fill".to_vec(),
        }))
    }

    fn open_output(&mut self, path: &Path, streams: &[OutputStream]) -> Result<OutputHandle> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        tracing::trace!(path = %path.display(), streams = streams.len(), "synthetic output opened");
        self.outputs.push(Some(SyntheticOutput {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        }));
        Ok(OutputHandle(self.outputs.len() - 1))
    }

    fn write_header(&mut self, output: OutputHandle) -> Result<()> {
        let out = self.output_mut(output)?;
        writeln!(out.writer, "{}", HEADER_LINE)?;
        Ok(())
    }

    fn mux(&mut self, output: OutputHandle, packet: &Packet) -> Result<()> {
        self.writes += 1;
        if self.fail_write_at == Some(self.writes) {
            bail!("simulated write failure at packet {}", self.writes);
        }

        let out = self.output_mut(output)?;
        writeln!(
            out.writer,
            "{} {} {} {} {}",
            packet.stream_index,
            packet.pts.unwrap_or(0),
            packet.duration,
            if packet.keyframe { "K" } else { "-" },
            String::from_utf8_lossy(&packet.data)
        )
        .with_context(|| format!("Failed to write to {}", out.path.display()))?;
        Ok(())
    }

    fn flush(&mut self, output: OutputHandle) -> Result<()> {
        self.output_mut(output)?.writer.flush()?;
        Ok(())
    }

    fn close_output(&mut self, output: OutputHandle) -> Result<()> {
        let mut out = self
            .outputs
            .get_mut(output.0)
            .and_then(Option::take)
            .with_context(|| format!("output {} is not open", output.0))?;
        writeln!(out.writer, "{}", TRAILER_LINE)?;
        out.writer
            .flush()
            .with_context(|| format!("Failed to close {}", out.path.display()))?;
        Ok(())
    }

    fn close_input(&mut self, _input: InputHandle) -> Result<()> {
        self.input_open = false;
        self.cursors.clear();
        Ok(())
    }
}

/// One packet line of a synthetic output file
#[derive(Debug, Clone, PartialEq)]
pub struct MuxedRecord {
    pub stream: usize,
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub payload: String,
}

impl MuxedRecord {
    pub fn is_filler(&self) -> bool {
        self.payload == "fill"
    }
}

/// Parse a file written by [`SyntheticEngine`]; fails on a missing header or trailer
pub fn read_segment(path: &Path) -> Result<Vec<MuxedRecord>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read segment: {}", path.display()))?;
    let mut lines = contents.lines();

    if lines.next() != Some(HEADER_LINE) {
        bail!("{} has no header", path.display());
    }

    let mut records = Vec::new();
    let mut closed = false;
    for line in lines {
        if line == TRAILER_LINE {
            closed = true;
            break;
        }
        let fields: Vec<&str> = line.splitn(5, ' ').collect();
        let [stream, pts, duration, key, payload] = fields[..] else {
            bail!("malformed record in {}: {:?}", path.display(), line);
        };
        records.push(MuxedRecord {
            stream: stream.parse().context("stream index")?,
            pts: pts.parse().context("pts")?,
            duration: duration.parse().context("duration")?,
            keyframe: key == "K",
            payload: payload.to_string(),
        });
    }

    if !closed {
        bail!("{} has no trailer", path.display());
    }
    Ok(records)
}
