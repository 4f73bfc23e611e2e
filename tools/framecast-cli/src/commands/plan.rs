//! Print the tick and keyframe plan of a render.

use framecast_common::clock::FrameClock;
use framecast_common::config::AppConfig;

pub fn run(config: &AppConfig, duration: f64, fps: Option<u32>, ticks: bool) -> anyhow::Result<()> {
    if !duration.is_finite() || duration <= 0.0 {
        anyhow::bail!("duration must be positive, got {duration}");
    }
    let clock = FrameClock::new(fps.unwrap_or(config.render.fps));
    let interval = config.render.keyframe_interval_secs;
    let total = clock.total_frames(duration);
    let keyframes = keyframe_ticks(&clock, total, interval);

    println!("Timeline: {duration}s @ {}fps", clock.fps());
    println!("  Ticks: {} (0..={total})", total + 1);
    println!("  Frame duration: {}us", clock.frame_duration_us());
    println!("  Keyframe interval: {interval}s");
    println!("  Keyframes: {}", keyframes.len());
    println!(
        "  Encoder queue ceiling: {}",
        config.render.encoder_queue_ceiling
    );

    if ticks {
        println!();
        for i in 0..=total {
            println!(
                "{i:>6}  {:>10.4}s  {:>12}us{}",
                clock.tick_secs(i),
                clock.tick_timestamp_us(i),
                if clock.is_keyframe(i, interval) { "  key" } else { "" }
            );
        }
    }
    Ok(())
}

/// Tick indices that are encoded as keyframes.
pub fn keyframe_ticks(clock: &FrameClock, total: u64, interval_secs: u32) -> Vec<u64> {
    (0..=total)
        .filter(|&i| clock.is_keyframe(i, interval_secs))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_ticks() {
        let clock = FrameClock::new(30);
        let total = clock.total_frames(20.0);
        assert_eq!(keyframe_ticks(&clock, total, 8), vec![0, 240, 480]);
        assert_eq!(keyframe_ticks(&FrameClock::new(10), 10, 8), vec![0]);
    }
}
