//! ffmpeg video conversion: argument construction, progress parsing and a
//! streaming runner that reports progress and honours cancellation.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use dc_core::config::{ConversionConfig, HardwareAccelerator, VideoQuality};
use dc_core::{ConversionContext, Error, Result};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Lines of stderr kept for error reports.
const STDERR_TAIL: usize = 20;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d+):(\d{2}):(\d{2})\.(\d+)").expect("valid regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2})\.(\d+)").expect("valid regex"));
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*([\d.]+)x").expect("valid regex"));

struct QualityPreset {
    bitrate: &'static str,
    max_bitrate: &'static str,
    buf_size: &'static str,
    amd_quality: &'static str,
    nvidia_preset: &'static str,
}

fn preset(quality: VideoQuality) -> QualityPreset {
    match quality {
        VideoQuality::Low => QualityPreset {
            bitrate: "1M",
            max_bitrate: "2M",
            buf_size: "2M",
            amd_quality: "speed",
            nvidia_preset: "fast",
        },
        VideoQuality::Medium => QualityPreset {
            bitrate: "2.5M",
            max_bitrate: "5M",
            buf_size: "5M",
            amd_quality: "balanced",
            nvidia_preset: "medium",
        },
        VideoQuality::High => QualityPreset {
            bitrate: "5M",
            max_bitrate: "10M",
            buf_size: "10M",
            amd_quality: "quality",
            nvidia_preset: "slow",
        },
    }
}

/// Build the full ffmpeg argument list for converting `input` to an H.264/AAC
/// MP4 at `output`, bounded to `max_size` on the longest edge.
pub fn build_args(config: &ConversionConfig, input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy().to_string();
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "info", "-stats", "-y"]
        .into_iter()
        .map(String::from)
        .collect();

    let scale = format!(
        "scale='w={0}:h={0}:force_original_aspect_ratio=decrease'",
        config.max_size
    );
    let amf_scale = scale.replacen("scale", "vpp_amf", 1);
    let p = preset(config.video_quality);

    match config.accelerator() {
        HardwareAccelerator::Amd => {
            tracing::debug!("using amd hardware encoder (h264_amf)");
            args.extend(
                [
                    "-i",
                    input.as_str(),
                    "-c:v",
                    "h264_amf",
                    "-b:v",
                    p.bitrate,
                    "-quality",
                    p.amd_quality,
                    "-vf",
                    amf_scale.as_str(),
                ]
                .map(String::from),
            );
            if config.video_quality != VideoQuality::Low {
                args.extend(
                    [
                        "-rc",
                        "vbr_peak",
                        "-maxrate",
                        p.max_bitrate,
                        "-bufsize",
                        p.buf_size,
                        "-vbaq",
                        "true",
                        "-preencode",
                        "true",
                        "-high_motion_quality_boost_enable",
                        "true",
                        "-bf",
                        "3",
                    ]
                    .map(String::from),
                );
            }
        }
        HardwareAccelerator::Nvidia => {
            tracing::debug!("using nvidia hardware encoder (h264_nvenc)");
            args.extend(
                [
                    "-hwaccel",
                    "cuda",
                    "-i",
                    input.as_str(),
                    "-c:v",
                    "h264_nvenc",
                    "-preset",
                    p.nvidia_preset,
                    "-b:v",
                    p.bitrate,
                    "-vf",
                    scale.as_str(),
                ]
                .map(String::from),
            );
        }
        HardwareAccelerator::None => {
            args.extend(
                ["-i", input.as_str(), "-c:v", "libx264", "-vf", scale.as_str()].map(String::from),
            );
        }
    }

    args.extend(config.ffmpeg_custom_args.split_whitespace().map(String::from));
    args.extend(["-c:a".to_string(), "aac".to_string()]);
    args.push(output.to_string_lossy().to_string());
    args
}

/// A parsed progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Fraction of the input duration encoded so far, clamped to 1.0.
    pub progress: f32,
    /// Encoding speed such as `"2.5x"`.
    pub speed: Option<String>,
}

/// Turns ffmpeg's stderr into [`ProgressUpdate`]s.
///
/// The input duration comes from the first `Duration:` line; every later
/// `time=` line becomes an update. Nothing is reported before the duration
/// is known.
#[derive(Debug, Default)]
pub struct ProgressParser {
    duration: Option<Duration>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        if self.duration.is_none() {
            if let Some(d) = capture_timestamp(&DURATION_RE, line).filter(|d| !d.is_zero()) {
                tracing::debug!(duration = ?d, "detected input duration");
                self.duration = Some(d);
            }
        }

        let total = self.duration?;
        let current = capture_timestamp(&TIME_RE, line)?;
        let progress = (current.as_secs_f64() / total.as_secs_f64()).min(1.0) as f32;
        let speed = SPEED_RE
            .captures(line)
            .map(|c| format!("{}x", &c[1]));
        Some(ProgressUpdate { progress, speed })
    }
}

/// Parse `H+:MM:SS.frac` from the four capture groups of `re`.
fn capture_timestamp(re: &Regex, line: &str) -> Option<Duration> {
    let caps = re.captures(line)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;

    // Fractional digits are right-padded to nanoseconds.
    let mut frac = caps[4].to_string();
    frac.truncate(9);
    while frac.len() < 9 {
        frac.push('0');
    }
    let nanos: u32 = frac.parse().ok()?;

    let secs = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    Some(Duration::new(secs, nanos))
}

/// Splits a byte stream into lines at `\r` or `\n`, which is how ffmpeg
/// separates its in-place `-stats` updates. Empty lines are skipped.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\r' || b == b'\n' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        Some(line)
    }
}

/// Run ffmpeg with `args`, forwarding progress to `ctx`.
///
/// Every progress line is a cancellation checkpoint; cancellation is also
/// observed while ffmpeg is silent. A cancelled run kills the child and
/// returns [`Error::Cancelled`]. A non-zero exit returns a tool error
/// carrying the last lines of stderr.
pub async fn run(program: &Path, args: &[String], ctx: &ConversionContext) -> Result<()> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    crate::process::no_console_window(&mut cmd);

    tracing::debug!(args = ?args, "starting ffmpeg");
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::tool("ffmpeg", format!("failed to start: {e}")))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("ffmpeg stderr was not captured".into()))?;

    let mut parser = ProgressParser::new();
    let mut splitter = LineSplitter::default();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
    let mut buf = [0u8; 4096];

    let mut on_line = |line: String, tail: &mut VecDeque<String>| -> Result<()> {
        let update = parser.feed(&line);
        if update.is_none() {
            tracing::trace!(target: "dc_av::ffmpeg::stderr", "{line}");
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
        match update {
            Some(u) => ctx.report(u.progress, u.speed.as_deref()),
            None => Ok(()),
        }
    };

    let outcome: Result<std::process::ExitStatus> = async {
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(Error::Cancelled),
                read = stderr.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    for line in splitter.push(&buf[..n]) {
                        on_line(line, &mut tail)?;
                    }
                }
            }
        }
        if let Some(line) = splitter.finish() {
            on_line(line, &mut tail)?;
        }
        tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => Err(Error::Cancelled),
            status = child.wait() => Ok(status?),
        }
    }
    .await;

    match outcome {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            let log = tail.into_iter().collect::<Vec<_>>().join("\n");
            Err(Error::tool(
                "ffmpeg",
                format!("exited with status {status}. Log:\n{log}"),
            ))
        }
        Err(e) => {
            if let Err(kill_err) = child.kill().await {
                tracing::warn!(error = %kill_err, "failed to kill ffmpeg");
            }
            Err(e)
        }
    }
}
