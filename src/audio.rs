use crate::consts::{
    MAX_SEGMENT_BYTES, MIN_FRAME_BYTES, MIN_SEGMENT_BYTES, SAMPLE_RATE_HZ, SILENCE_MAD_THRESHOLD,
    WAV_HEADER_SZ,
};
use crate::error::ConversionError;

use std::time::{Duration, Instant};
use tracing::debug;

/// Wrap raw 8kHz mono mu-law samples in a minimal WAV container so the
/// transcription provider will accept them.  Payloads that already carry a
/// RIFF/WAVE tag pass through untouched.  This is pure header arithmetic;
/// no resampling happens here.
pub fn transcode(input: &[u8]) -> Result<Vec<u8>, ConversionError> {
    if input.is_empty() {
        return Err(ConversionError::Empty);
    }
    if input.len() >= 12 && &input[..4] == b"RIFF" && &input[8..12] == b"WAVE" {
        return Ok(input.to_vec());
    }
    if input.len() < MIN_FRAME_BYTES {
        return Err(ConversionError::TooSmall(input.len()));
    }

    let data_len = input.len() as u32;
    let mut out = Vec::with_capacity(WAV_HEADER_SZ + input.len());
    // RIFF chunk
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(data_len + WAV_HEADER_SZ as u32 - 8).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    // fmt chunk: format 7 (mu-law), mono, 8kHz, 8-bit, zero-length extension
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&18u32.to_le_bytes());
    out.extend_from_slice(&7u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE_HZ.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE_HZ.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    // fact chunk, required for compressed formats
    out.extend_from_slice(b"fact");
    out.extend_from_slice(&4u32.to_le_bytes());
    out.extend_from_slice(&data_len.to_le_bytes());
    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(input);

    Ok(out)
}

#[derive(Clone)]
pub struct SegmenterConfig {
    pub silence_timeout: Duration,
    pub min_segment_bytes: usize,
    pub max_segment_bytes: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(2),
            min_segment_bytes: MIN_SEGMENT_BYTES,
            max_segment_bytes: MAX_SEGMENT_BYTES,
        }
    }
}

/// Per-call speech boundary detector.  Voiced frames accumulate in the
/// call's buffer; a segment is emitted once the caller has been silent for
/// the configured window, or unconditionally once the buffer hits the hard
/// ceiling so a continuously talking caller cannot grow it without bound.
pub struct SpeechSegmenter {
    cfg: SegmenterConfig,
    buf: Vec<u8>,
    last_voice: Option<Instant>,
}

impl SpeechSegmenter {
    pub fn new(cfg: SegmenterConfig) -> Self {
        Self {
            cfg,
            buf: Vec::new(),
            last_voice: None,
        }
    }

    /// A frame is silence if it is too short to be meaningful or if the
    /// mean absolute deviation of its mu-law magnitude bits from the codec
    /// zero level falls below the threshold.  Mu-law stores magnitude
    /// complemented, so a byte near 0xFF/0x7F is a near-zero sample.
    pub fn is_silent_frame(frame: &[u8]) -> bool {
        if frame.len() < MIN_FRAME_BYTES {
            return true;
        }
        let total: u64 = frame.iter().map(|b| (0x7F - (b & 0x7F)) as u64).sum();
        let mad = total as f64 / frame.len() as f64;
        mad < SILENCE_MAD_THRESHOLD
    }

    /// Feed one decoded frame.  Returns a completed segment only when the
    /// hard ceiling forces emission.
    pub fn push_frame(&mut self, frame: &[u8], now: Instant) -> Option<Vec<u8>> {
        if Self::is_silent_frame(frame) {
            return None;
        }
        self.buf.extend_from_slice(frame);
        self.last_voice = Some(now);
        if self.buf.len() >= self.cfg.max_segment_bytes {
            debug!(bytes = self.buf.len(), "segment ceiling reached, forcing emission");
            return Some(self.take_buf());
        }
        None
    }

    /// Poll for trailing-silence expiry.  Emits the buffered segment when
    /// the caller has stopped talking, or discards it when it is too short
    /// to be meaningful speech.
    pub fn check_silence(&mut self, now: Instant) -> Option<Vec<u8>> {
        let last = self.last_voice?;
        if self.buf.is_empty() || now.duration_since(last) < self.cfg.silence_timeout {
            return None;
        }
        let segment = self.take_buf();
        if segment.len() >= self.cfg.min_segment_bytes {
            Some(segment)
        } else {
            debug!(bytes = segment.len(), "discarding sub-minimum speech segment");
            None
        }
    }

    fn take_buf(&mut self) -> Vec<u8> {
        self.last_voice = None;
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A 20ms Twilio media frame of near-zero mu-law samples.
    fn silent_frame() -> Vec<u8> {
        vec![0xFF; 160]
    }

    // Loud samples: small magnitude bits mean large deviation.
    fn voiced_frame() -> Vec<u8> {
        vec![0x10; 160]
    }

    fn test_cfg() -> SegmenterConfig {
        SegmenterConfig {
            silence_timeout: Duration::from_secs(2),
            min_segment_bytes: 320,
            max_segment_bytes: 1_600,
        }
    }

    #[test]
    fn transcode_wraps_raw_mulaw() {
        let raw = voiced_frame();
        let wav = transcode(&raw).unwrap();
        assert_eq!(wav.len(), raw.len() + WAV_HEADER_SZ);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[WAV_HEADER_SZ..], &raw[..]);
    }

    #[test]
    fn transcode_passes_through_tagged_input() {
        let raw = voiced_frame();
        let wav = transcode(&raw).unwrap();
        let again = transcode(&wav).unwrap();
        assert_eq!(wav, again);
    }

    #[test]
    fn transcode_rejects_empty_and_tiny_input() {
        assert!(matches!(transcode(&[]), Err(ConversionError::Empty)));
        assert!(matches!(
            transcode(&[0xFFu8; 8]),
            Err(ConversionError::TooSmall(8))
        ));
    }

    #[test]
    fn silence_classification() {
        assert!(SpeechSegmenter::is_silent_frame(&silent_frame()));
        assert!(!SpeechSegmenter::is_silent_frame(&voiced_frame()));
        // Below the minimum byte count counts as silence even if loud.
        assert!(SpeechSegmenter::is_silent_frame(&[0x10; 8]));
    }

    #[test]
    fn all_silence_never_emits() {
        let mut seg = SpeechSegmenter::new(test_cfg());
        let start = Instant::now();
        for _ in 0..100 {
            assert!(seg.push_frame(&silent_frame(), start).is_none());
        }
        assert!(seg.check_silence(start + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn trailing_silence_emits_accumulated_segment() {
        let mut seg = SpeechSegmenter::new(test_cfg());
        let start = Instant::now();
        for i in 0..4 {
            assert!(seg
                .push_frame(&voiced_frame(), start + Duration::from_millis(20 * i))
                .is_none());
        }
        // Window not yet expired.
        assert!(seg.check_silence(start + Duration::from_secs(1)).is_none());
        let segment = seg.check_silence(start + Duration::from_secs(3)).unwrap();
        assert_eq!(segment.len(), 640);
        // Buffer cleared after dispatch.
        assert!(seg.check_silence(start + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn sub_minimum_segment_is_discarded() {
        let mut seg = SpeechSegmenter::new(test_cfg());
        let start = Instant::now();
        seg.push_frame(&voiced_frame(), start);
        assert!(seg.check_silence(start + Duration::from_secs(3)).is_none());
    }

    #[test]
    fn ceiling_forces_exactly_one_emission() {
        let mut seg = SpeechSegmenter::new(test_cfg());
        let start = Instant::now();
        let mut emitted = vec![];
        for i in 0..10 {
            if let Some(s) = seg.push_frame(&voiced_frame(), start + Duration::from_millis(20 * i))
            {
                emitted.push(s);
            }
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), 1_600);
    }

    #[test]
    fn segmenter_survives_arbitrary_bytes() {
        let mut seg = SpeechSegmenter::new(test_cfg());
        let start = Instant::now();
        let junk: Vec<u8> = (0..=255).collect();
        seg.push_frame(&junk, start);
        seg.push_frame(&[], start);
        seg.check_silence(start + Duration::from_secs(5));
    }
}
