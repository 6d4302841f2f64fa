use serde::Serialize;

/// One progress snapshot, emitted each time ffmpeg finishes a `progress=` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscodeProgress {
    pub fps: f64,
    /// Encode speed as a multiple of real time.
    pub speed: f64,
    /// Seconds of output written so far.
    pub current_time: f64,
    pub total_duration: f64,
    /// Fraction complete in `0.0..=1.0`.
    pub progress: f64,
    pub eta_seconds: f64,
}

/// Accumulates ffmpeg's `-progress` key/value stream.
///
/// ffmpeg prints a block of `key=value` lines followed by
/// `progress=continue` (or `progress=end`). Fields persist across blocks,
/// since ffmpeg sometimes reports `N/A` for a value it reported earlier.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    total_duration: f64,
    fps: f64,
    speed: f64,
    out_time: f64,
}

impl ProgressParser {
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            fps: 0.0,
            speed: 0.0,
            out_time: 0.0,
        }
    }

    /// Feed one line; returns a snapshot when the line closes a block.
    pub fn feed_line(&mut self, line: &str) -> Option<TranscodeProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            "fps" => {
                if let Ok(v) = value.parse() {
                    self.fps = v;
                }
            }
            "speed" => {
                if let Ok(v) = value.trim_end_matches('x').trim().parse() {
                    self.speed = v;
                }
            }
            // Both are microseconds; the `_ms` name is an old ffmpeg misnomer.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time = us.max(0) as f64 / 1_000_000.0;
                }
            }
            "out_time" => {
                if let Some(secs) = parse_timestamp(value) {
                    self.out_time = secs;
                }
            }
            "progress" => return Some(self.snapshot()),
            _ => {}
        }
        None
    }

    pub fn snapshot(&self) -> TranscodeProgress {
        let mut snap = TranscodeProgress {
            fps: self.fps,
            speed: self.speed,
            current_time: self.out_time,
            total_duration: self.total_duration,
            progress: 0.0,
            eta_seconds: 0.0,
        };
        if self.total_duration > 0.0 {
            snap.progress = (self.out_time / self.total_duration).clamp(0.0, 1.0);
            if self.speed > 0.0 {
                snap.eta_seconds = ((self.total_duration - self.out_time) / self.speed).max(0.0);
            }
        }
        snap
    }
}

/// Parse `HH:MM:SS.micro` as printed by ffmpeg.
fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let sec: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut ProgressParser, block: &str) -> Vec<TranscodeProgress> {
        block.lines().filter_map(|l| parser.feed_line(l)).collect()
    }

    #[test]
    fn emits_only_on_progress_marker() {
        let mut p = ProgressParser::new(100.0);
        let snaps = feed(
            &mut p,
            "frame=240\nfps=24.5\nout_time_us=25000000\nspeed=2.0x\nprogress=continue\n",
        );
        assert_eq!(snaps.len(), 1);
        let s = &snaps[0];
        assert_eq!(s.fps, 24.5);
        assert_eq!(s.speed, 2.0);
        assert_eq!(s.current_time, 25.0);
        assert!((s.progress - 0.25).abs() < 1e-9);
        assert!((s.eta_seconds - 37.5).abs() < 1e-9);
    }

    #[test]
    fn fraction_is_capped_at_one() {
        let mut p = ProgressParser::new(10.0);
        let snaps = feed(&mut p, "out_time_ms=12000000\nspeed=1x\nprogress=end\n");
        assert_eq!(snaps[0].progress, 1.0);
        assert_eq!(snaps[0].eta_seconds, 0.0);
    }

    #[test]
    fn unknown_duration_and_na_values() {
        let mut p = ProgressParser::new(0.0);
        let snaps = feed(
            &mut p,
            "fps=30\nspeed=N/A\nout_time=00:01:30.500000\nprogress=continue\n",
        );
        let s = &snaps[0];
        assert_eq!(s.progress, 0.0);
        assert_eq!(s.eta_seconds, 0.0);
        assert_eq!(s.speed, 0.0);
        assert!((s.current_time - 90.5).abs() < 1e-9);
    }

    #[test]
    fn values_carry_over_between_blocks() {
        let mut p = ProgressParser::new(60.0);
        feed(&mut p, "fps=25\nspeed=1.5x\nout_time_us=6000000\nprogress=continue\n");
        let snaps = feed(&mut p, "fps=N/A\nout_time_us=12000000\nprogress=continue\n");
        assert_eq!(snaps[0].fps, 25.0);
        assert_eq!(snaps[0].speed, 1.5);
        assert!((snaps[0].progress - 0.2).abs() < 1e-9);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let mut p = ProgressParser::new(60.0);
        assert!(p.feed_line("").is_none());
        assert!(p.feed_line("no equals sign").is_none());
        assert!(p.feed_line("out_time_us=bogus").is_none());
        assert_eq!(p.snapshot().current_time, 0.0);
    }
}
