//! Shared helpers.

use std::io::Cursor;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Generate a simple unique id based on current time in nanoseconds
/// and the process id. Sufficient for naming short-lived temp files.
#[inline]
pub(crate) fn gen_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}{:x}", std::process::id(), nanos)
}

/// Playback length of a WAV buffer, or `None` if the header can't be parsed.
pub(crate) fn wav_duration(wav: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(wav)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    // duration() counts frames, i.e. samples per channel
    let frames = reader.duration() as f64;
    Some(Duration::from_secs_f64(frames / spec.sample_rate as f64))
}
