//! Timed audio sources and PCM buffers.

use serde::{Deserialize, Serialize};

/// One audio clip placed on the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSource {
    /// URL or path of the media to take audio from.
    pub src: String,

    /// Output time (seconds) at which the clip starts playing.
    pub start: f64,

    /// Output time (seconds) at which the clip stops.
    pub end: f64,

    /// Offset (seconds) into the source where playback begins.
    #[serde(default)]
    pub seek: f64,

    /// Linear gain; defaults to unity.
    #[serde(default)]
    pub volume: Option<f32>,
}

impl AudioSource {
    pub fn gain(&self) -> f32 {
        self.volume.unwrap_or(1.0)
    }

    /// Seconds of output covered by the clip.
    pub fn span_secs(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Decoded PCM as delivered by an audio loader (interleaved f32).
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Sample layout of [`AudioData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Frames stored one after another, channels interleaved.
    F32,
    /// One contiguous block per channel.
    F32Planar,
}

/// Fully rendered audio handed to the audio encoder in one piece.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: usize,

    /// Timestamp of the first frame in microseconds.
    pub timestamp_us: u64,

    pub data: Vec<f32>,
}

impl AudioData {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Copy of the buffer in the other layout.
    pub fn to_format(&self, format: SampleFormat) -> Self {
        if format == self.format {
            return self.clone();
        }
        let channels = usize::from(self.channels);
        let mut data = vec![0.0f32; self.data.len()];
        for frame in 0..self.frames {
            for ch in 0..channels {
                let interleaved = frame * channels + ch;
                let planar = ch * self.frames + frame;
                match format {
                    SampleFormat::F32 => data[interleaved] = self.data[planar],
                    SampleFormat::F32Planar => data[planar] = self.data[interleaved],
                }
            }
        }
        Self {
            format,
            data,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_defaults_to_unity() {
        let source: AudioSource =
            serde_json::from_str(r#"{"src": "a.mp4", "start": 2, "end": 30}"#).unwrap();
        assert_eq!(source.gain(), 1.0);
        assert_eq!(source.seek, 0.0);
        assert_eq!(source.span_secs(), 28.0);
    }

    #[test]
    fn test_layout_conversion() {
        let interleaved = AudioData {
            format: SampleFormat::F32,
            sample_rate: 4,
            channels: 2,
            frames: 3,
            timestamp_us: 0,
            data: vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0],
        };
        let planar = interleaved.to_format(SampleFormat::F32Planar);
        assert_eq!(planar.data, vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0]);
        assert_eq!(planar.to_format(SampleFormat::F32), interleaved);
        assert!((interleaved.duration_secs() - 0.75).abs() < 1e-12);
    }
}
