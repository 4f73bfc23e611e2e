//! Offline audio rendering.
//!
//! Every source is decoded up front, placed on the output timeline and mixed
//! into one stereo buffer at the target rate. The result is handed to the
//! audio encoder in a single piece.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use framecast_common::error::{FramecastError, FramecastResult};
use framecast_media_model::{AudioData, AudioSource, PcmBuffer, SampleFormat};

/// Output channel layout of the mix.
pub const MIX_CHANNELS: u16 = 2;

/// Fetches and decodes the audio of one source.
#[async_trait]
pub trait AudioSourceLoader: Send + Sync {
    async fn load(&self, source: &AudioSource) -> FramecastResult<PcmBuffer>;
}

/// Loader for raw interleaved little-endian f32 files.
pub struct RawPcmLoader {
    root: PathBuf,
    sample_rate: u32,
    channels: u16,
}

impl RawPcmLoader {
    pub fn new(root: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Self {
        Self {
            root: root.into(),
            sample_rate,
            channels,
        }
    }
}

#[async_trait]
impl AudioSourceLoader for RawPcmLoader {
    async fn load(&self, source: &AudioSource) -> FramecastResult<PcmBuffer> {
        let path = self.root.join(&source.src);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FramecastError::audio(format!("read {}: {e}", path.display())))?;
        if bytes.len() % 4 != 0 {
            return Err(FramecastError::audio(format!(
                "{} is not f32 PCM ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(PcmBuffer {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
        })
    }
}

/// Mixes timed audio sources into one stereo buffer.
pub struct AudioRenderer {
    loader: Arc<dyn AudioSourceLoader>,
    sample_rate: u32,
}

impl AudioRenderer {
    pub fn new(loader: Arc<dyn AudioSourceLoader>, sample_rate: u32) -> Self {
        Self {
            loader,
            sample_rate,
        }
    }

    /// Load every source concurrently and mix them.
    ///
    /// The output lasts until the latest source end. Sources that fail to
    /// load are logged and left out.
    pub async fn render(&self, sources: &[AudioSource]) -> FramecastResult<AudioData> {
        if self.sample_rate == 0 {
            return Err(FramecastError::audio("sample rate must be positive"));
        }

        let loads = sources.iter().map(|source| async move {
            match self.loader.load(source).await {
                Ok(pcm) => Some((source, pcm)),
                Err(e) => {
                    tracing::error!(src = %source.src, error = %e, "Skipping audio source");
                    None
                }
            }
        });
        let clips: Vec<(&AudioSource, PcmBuffer)> = futures::future::join_all(loads)
            .await
            .into_iter()
            .flatten()
            .collect();

        let duration = sources.iter().map(|s| s.end).fold(0.0f64, f64::max);
        let frames = (duration * f64::from(self.sample_rate)) as usize;
        let data = mix_sources(&clips, self.sample_rate, frames);

        tracing::info!(
            sources = sources.len(),
            mixed = clips.len(),
            frames,
            sample_rate = self.sample_rate,
            "Audio rendered"
        );

        Ok(AudioData {
            format: SampleFormat::F32,
            sample_rate: self.sample_rate,
            channels: MIX_CHANNELS,
            frames,
            timestamp_us: 0,
            data,
        })
    }
}

/// Mix decoded clips into `frames` interleaved stereo frames.
///
/// Each clip starts at `start` on the output, reads its source from `seek`,
/// and plays for `end - start` seconds at its gain. Sources at another rate
/// are linearly resampled; mono is duplicated to both channels.
pub fn mix_sources(clips: &[(&AudioSource, PcmBuffer)], sample_rate: u32, frames: usize) -> Vec<f32> {
    let channels = usize::from(MIX_CHANNELS);
    let rate = f64::from(sample_rate);
    let mut out = vec![0.0f32; frames * channels];

    for (source, pcm) in clips {
        let src_channels = usize::from(pcm.channels);
        let src_frames = pcm.frames();
        if src_frames == 0 || pcm.sample_rate == 0 {
            continue;
        }
        let src = &pcm.samples;
        let gain = source.gain();

        let first = (source.start.max(0.0) * rate).round() as usize;
        let span = (source.span_secs() * rate).round() as usize;
        let last = first.saturating_add(span).min(frames);

        for dst in first..last {
            let rel_sec = (dst - first) as f64 / rate;
            let src_pos = (source.seek + rel_sec) * f64::from(pcm.sample_rate);
            if !src_pos.is_finite() || src_pos < 0.0 {
                break;
            }
            let frame0 = src_pos.floor() as usize;
            if frame0 >= src_frames {
                break;
            }
            let frame1 = (frame0 + 1).min(src_frames - 1);
            let frac = (src_pos - frame0 as f64) as f32;
            let lerp = |a: f32, b: f32| a + (b - a) * frac;

            let i0 = frame0 * src_channels;
            let i1 = frame1 * src_channels;
            let (l, r) = if src_channels == 1 {
                let v = lerp(src[i0], src[i1]);
                (v, v)
            } else {
                (lerp(src[i0], src[i1]), lerp(src[i0 + 1], src[i1 + 1]))
            };

            out[dst * channels] += l * gain;
            out[dst * channels + 1] += r * gain;
        }
    }

    for sample in &mut out {
        *sample = sample.clamp(-1.0, 1.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn source(src: &str, start: f64, end: f64, seek: f64, volume: Option<f32>) -> AudioSource {
        AudioSource {
            src: src.to_string(),
            start,
            end,
            seek,
            volume,
        }
    }

    struct FixtureLoader(HashMap<String, PcmBuffer>);

    #[async_trait]
    impl AudioSourceLoader for FixtureLoader {
        async fn load(&self, source: &AudioSource) -> FramecastResult<PcmBuffer> {
            self.0
                .get(&source.src)
                .cloned()
                .ok_or_else(|| FramecastError::audio(format!("404 {}", source.src)))
        }
    }

    fn constant(sample_rate: u32, channels: u16, frames: usize, value: f32) -> PcmBuffer {
        PcmBuffer {
            sample_rate,
            channels,
            samples: vec![value; frames * usize::from(channels)],
        }
    }

    #[test]
    fn test_mono_source_is_placed_and_scaled() {
        let clip = source("a", 1.0, 2.0, 0.0, Some(0.5));
        let pcm = constant(4, 1, 8, 0.8);
        let out = mix_sources(&[(&clip, pcm)], 4, 12);

        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        let right: Vec<f32> = out.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(left, right);
        assert!(left[..4].iter().all(|&s| s == 0.0));
        assert!(left[4..8].iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert!(left[8..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_seek_and_resample() {
        // Source ramps 0,1,2,... at 2 Hz; output at 4 Hz starting 1s in.
        let ramp = PcmBuffer {
            sample_rate: 2,
            channels: 1,
            samples: (0..10).map(|i| i as f32 / 10.0).collect(),
        };
        let clip = source("ramp", 0.0, 1.0, 1.0, None);
        let out = mix_sources(&[(&clip, ramp)], 4, 4);
        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        let expected = [0.2, 0.25, 0.3, 0.35];
        for (got, want) in left.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn test_overlapping_sources_sum_and_clamp() {
        let a = source("a", 0.0, 1.0, 0.0, None);
        let b = source("b", 0.0, 1.0, 0.0, None);
        let out = mix_sources(
            &[(&a, constant(4, 2, 4, 0.7)), (&b, constant(4, 2, 4, 0.7))],
            4,
            4,
        );
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[tokio::test]
    async fn test_failed_source_is_skipped() {
        let mut fixtures = HashMap::new();
        fixtures.insert("music".to_string(), constant(8, 2, 16, 0.25));
        let renderer = AudioRenderer::new(Arc::new(FixtureLoader(fixtures)), 8);

        let data = renderer
            .render(&[
                source("music", 0.0, 1.0, 0.0, None),
                source("missing", 0.5, 3.0, 0.0, Some(2.0)),
            ])
            .await
            .unwrap();

        assert_eq!(data.frames, 24);
        assert_eq!(data.channels, 2);
        assert_eq!(data.timestamp_us, 0);
        assert_eq!(data.data.len(), 48);
        assert!(data.data[..16].iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(data.data[16..].iter().all(|&s| s == 0.0));
    }

    #[tokio::test]
    async fn test_raw_pcm_loader_reads_f32le() {
        let dir = std::env::temp_dir().join(format!("framecast-pcm-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let bytes: Vec<u8> = [0.5f32, -0.5, 0.25, -0.25]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        tokio::fs::write(dir.join("tone.f32"), bytes).await.unwrap();

        let loader = RawPcmLoader::new(&dir, 44_100, 2);
        let pcm = loader
            .load(&source("tone.f32", 0.0, 1.0, 0.0, None))
            .await
            .unwrap();
        assert_eq!(pcm.frames(), 2);
        assert_eq!(pcm.samples, vec![0.5, -0.5, 0.25, -0.25]);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
