//! Render job description.

use serde::{Deserialize, Serialize};

use crate::{AudioSource, ModelError};

/// Output parameters of a render job.
///
/// The composition callback is supplied separately by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJobConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Length of the output in seconds.
    pub duration_secs: f64,

    /// Audio clips mixed into the single output audio track.
    #[serde(default)]
    pub audio: Vec<AudioSource>,
}

impl RenderJobConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.width == 0 || self.height == 0 {
            return Err(ModelError::invalid(
                "dimensions",
                format!("{}x{} is empty", self.width, self.height),
            ));
        }
        if self.fps == 0 {
            return Err(ModelError::invalid("fps", "must be positive"));
        }
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(ModelError::invalid(
                "duration",
                format!("must be positive, got {}", self.duration_secs),
            ));
        }
        for source in &self.audio {
            if source.end < source.start {
                return Err(ModelError::invalid(
                    "audio",
                    format!("{} ends before it starts", source.src),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RenderJobConfig {
        RenderJobConfig {
            width: 1920,
            height: 1080,
            fps: 24,
            duration_secs: 30.0,
            audio: vec![],
        }
    }

    #[test]
    fn test_valid_job() {
        assert!(job().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_fps_and_inverted_audio() {
        let mut bad = job();
        bad.fps = 0;
        assert!(bad.validate().is_err());

        let mut bad = job();
        bad.audio.push(AudioSource {
            src: "a.mp4".into(),
            start: 5.0,
            end: 2.0,
            seek: 0.0,
            volume: None,
        });
        assert!(bad.validate().is_err());
    }
}
