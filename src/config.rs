//! Pipeline configuration: the immutable `PipelineOptions` the core is
//! constructed with, and a small parser for the external `--name=value`
//! configuration surface. Nothing here is persisted — the embedder loads
//! configuration however it likes and passes the result in at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::frame_rate::FrameRate;

/// Immutable once constructed. Mirrors the external configuration surface
/// one-for-one; see `RawConfig` for the wire-level `--name=value` names.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub frame_rate: FrameRate,
    pub buffering_enabled: bool,
    pub target_depth: u32,
    pub low_watermark: f64,
    pub high_watermark: u32,
    pub telemetry_interval: Duration,
    pub allow_latency_expansion: bool,
    pub paced_invalidation: bool,
    pub capture_backpressure: bool,
    pub pump_cadence_adaptation: bool,
    pub windowless_frame_rate: Option<FrameRate>,
}

impl PipelineOptions {
    /// The `FrameQueue`'s hard capacity (the point at which enqueue starts
    /// dropping the oldest frame). Deliberately larger than `high_watermark`
    /// by `target_depth` slots of headroom: `high_watermark` is the
    /// back-pressure *signal* threshold the pacer reacts to, not the queue's
    /// drop-from-overflow ceiling — if the two were equal, `count() >
    /// high_watermark` could never observe true (the queue can never hold
    /// more than its own capacity) and capture back-pressure would never
    /// fire. The headroom gives the pacer room to notice and pause the
    /// producer before a burst degrades into pure overflow drops.
    pub fn queue_capacity(&self) -> usize {
        self.high_watermark as usize + self.target_depth as usize
    }

    /// Builds options with the watermarks derived from `target_depth` per
    /// the normative defaults (`low_watermark = target_depth - 0.5`,
    /// `high_watermark = target_depth + 1`).
    pub fn new(frame_rate: FrameRate, target_depth: u32) -> Result<Self> {
        if target_depth == 0 {
            return Err(PipelineError::InvalidBufferDepth(0));
        }
        Ok(Self {
            frame_rate,
            buffering_enabled: true,
            target_depth,
            low_watermark: target_depth as f64 - 0.5,
            high_watermark: target_depth + 1,
            telemetry_interval: Duration::from_secs(5),
            allow_latency_expansion: false,
            paced_invalidation: false,
            capture_backpressure: false,
            pump_cadence_adaptation: false,
            windowless_frame_rate: None,
        })
    }

    /// Parses the raw `--name=value` configuration surface named in the
    /// external interfaces. Unrecognized flags are ignored rather than
    /// rejected, the way the teacher's settings loader tolerates unknown
    /// keys from older config files.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = RawConfig::default();
        for arg in args {
            let arg = arg.as_ref();
            let trimmed = arg.trim_start_matches("--");
            let (key, value) = match trimmed.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (trimmed, None),
            };
            apply_flag(&mut raw, key, value);
        }
        Self::try_from(raw)
    }
}

impl TryFrom<RawConfig> for PipelineOptions {
    type Error = PipelineError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let buffer_depth = raw.buffer_depth.unwrap_or(3);
        if buffer_depth < 1 {
            return Err(PipelineError::InvalidBufferDepth(buffer_depth));
        }
        let target_depth = buffer_depth as u32;

        let fallback_fps = FrameRate::try_new(30, 1)?;
        let frame_rate = match raw.fps {
            Some(fps) => FrameRate::parse(&fps, fallback_fps),
            None => fallback_fps,
        };

        let telemetry_interval_secs = raw.telemetry_interval.unwrap_or(5.0);
        if telemetry_interval_secs <= 0.0 {
            return Err(PipelineError::InvalidTelemetryInterval);
        }

        let windowless_frame_rate = raw
            .windowless_frame_rate
            .map(|fps| FrameRate::parse(&fps, frame_rate));

        Ok(Self {
            frame_rate,
            buffering_enabled: raw.enable_output_buffer.unwrap_or(true),
            target_depth,
            low_watermark: target_depth as f64 - 0.5,
            high_watermark: target_depth + 1,
            telemetry_interval: Duration::from_secs_f64(telemetry_interval_secs),
            allow_latency_expansion: raw.allow_latency_expansion.unwrap_or(false),
            paced_invalidation: raw.paced_invalidation.unwrap_or(false),
            capture_backpressure: raw.capture_backpressure.unwrap_or(false),
            pump_cadence_adaptation: raw.pump_cadence_adaptation.unwrap_or(false),
            windowless_frame_rate,
        })
    }
}

/// Serde-friendly mirror of the external configuration surface, for
/// embedders that want to hand the core a structured blob instead of
/// calling the builder directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    pub buffer_depth: Option<i64>,
    pub enable_output_buffer: Option<bool>,
    pub fps: Option<String>,
    pub telemetry_interval: Option<f64>,
    pub allow_latency_expansion: Option<bool>,
    pub paced_invalidation: Option<bool>,
    pub capture_backpressure: Option<bool>,
    pub pump_cadence_adaptation: Option<bool>,
    pub windowless_frame_rate: Option<String>,
}

fn apply_flag(raw: &mut RawConfig, key: &str, value: Option<&str>) {
    match key {
        "buffer_depth" => raw.buffer_depth = value.and_then(|v| v.parse().ok()),
        "enable_output_buffer" => raw.enable_output_buffer = Some(bool_flag(value)),
        "fps" => raw.fps = value.map(str::to_string),
        "telemetry_interval" => raw.telemetry_interval = value.and_then(|v| v.parse().ok()),
        "allow_latency_expansion" => raw.allow_latency_expansion = Some(bool_flag(value)),
        "paced_invalidation" => raw.paced_invalidation = Some(bool_flag(value)),
        "capture_backpressure" => raw.capture_backpressure = Some(bool_flag(value)),
        "pump_cadence_adaptation" => raw.pump_cadence_adaptation = Some(bool_flag(value)),
        "windowless_frame_rate" => raw.windowless_frame_rate = value.map(str::to_string),
        _ => log::warn!("ignoring unrecognized configuration flag: {key}"),
    }
}

/// A bare `--name` flag means `true`; `--name=value` parses `value` as a
/// bool, defaulting to `true` if it doesn't parse as one.
fn bool_flag(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.parse().unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_capacity_gives_headroom_above_high_watermark() {
        let options = PipelineOptions::new(FrameRate::try_new(60, 1).unwrap(), 3).unwrap();
        assert_eq!(options.high_watermark, 4);
        assert!(options.queue_capacity() > options.high_watermark as usize);
    }

    #[test]
    fn new_derives_watermarks_from_target_depth() {
        let options = PipelineOptions::new(FrameRate::try_new(60, 1).unwrap(), 3).unwrap();
        assert_eq!(options.low_watermark, 2.5);
        assert_eq!(options.high_watermark, 4);
    }

    #[test]
    fn new_rejects_zero_target_depth() {
        let result = PipelineOptions::new(FrameRate::try_new(60, 1).unwrap(), 0);
        assert!(result.is_err());
    }

    #[test]
    fn from_args_parses_bare_and_valued_flags() {
        let options = PipelineOptions::from_args([
            "--buffer_depth=4",
            "--fps=59.94",
            "--paced_invalidation",
            "--capture_backpressure=true",
        ])
        .unwrap();

        assert_eq!(options.target_depth, 4);
        assert_eq!(options.high_watermark, 5);
        assert_eq!((options.frame_rate.numerator(), options.frame_rate.denominator()), (60000, 1001));
        assert!(options.paced_invalidation);
        assert!(options.capture_backpressure);
        assert!(!options.pump_cadence_adaptation);
    }

    #[test]
    fn from_args_ignores_unknown_flags() {
        let options = PipelineOptions::from_args(["--mystery=42", "--buffer_depth=2"]).unwrap();
        assert_eq!(options.target_depth, 2);
    }

    #[test]
    fn from_args_rejects_invalid_buffer_depth() {
        let result = PipelineOptions::from_args(["--buffer_depth=0"]);
        assert!(result.is_err());
    }

    #[test]
    fn raw_config_round_trips_through_json() {
        let raw = RawConfig {
            buffer_depth: Some(3),
            fps: Some("60".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&raw).unwrap();
        let parsed: RawConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.buffer_depth, Some(3));
        assert_eq!(parsed.fps.as_deref(), Some("60"));
    }
}
