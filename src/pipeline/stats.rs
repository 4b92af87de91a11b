use std::time::Duration;

/// Cycles between two stats log lines
const LOG_INTERVAL: u64 = 30;

/// Running totals for the detection loop
#[derive(Debug, Default, Clone)]
pub struct LoopStats {
    cycles: u64,
    frames_dropped: u64,
    last_sequence: Option<u64>,
    total_detect_time: Duration,
    total_draw_time: Duration,
    total_present_time: Duration,
}

impl LoopStats {
    /// Count frames that were published but never detected on
    pub fn record_frame(&mut self, sequence: u64) {
        if let Some(last) = self.last_sequence {
            if sequence > last + 1 {
                self.frames_dropped += sequence - last - 1;
            }
        }
        self.last_sequence = Some(sequence);
    }

    pub fn record_cycle(&mut self, detect: Duration, draw: Duration, present: Duration) {
        self.cycles += 1;
        self.total_detect_time += detect;
        self.total_draw_time += draw;
        self.total_present_time += present;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn log_if_due(&self) {
        if self.cycles == 0 || self.cycles % LOG_INTERVAL != 0 {
            return;
        }

        let per_cycle = |total: Duration| total.as_secs_f64() * 1000.0 / self.cycles as f64;
        let avg_detect_ms = per_cycle(self.total_detect_time);
        let avg_draw_ms = per_cycle(self.total_draw_time);
        let avg_present_ms = per_cycle(self.total_present_time);
        let total_ms = avg_detect_ms + avg_draw_ms + avg_present_ms;
        let actual_fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

        tracing::info!(
            "Cycle {}: detect={:.1}ms, draw={:.1}ms, present={:.1}ms, total={:.1}ms, fps={:.1}, dropped={}",
            self.cycles,
            avg_detect_ms,
            avg_draw_ms,
            avg_present_ms,
            total_ms,
            actual_fps,
            self.frames_dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_skipped_sequence_numbers() {
        let mut stats = LoopStats::default();
        stats.record_frame(0);
        stats.record_frame(1);
        stats.record_frame(5);
        // the same frame detected twice is not a drop
        stats.record_frame(5);
        assert_eq!(stats.frames_dropped(), 3);
    }

    #[test]
    fn accumulates_cycles() {
        let mut stats = LoopStats::default();
        for _ in 0..3 {
            stats.record_cycle(
                Duration::from_millis(20),
                Duration::from_millis(2),
                Duration::ZERO,
            );
        }
        assert_eq!(stats.cycles(), 3);
        assert_eq!(stats.total_detect_time, Duration::from_millis(60));
    }
}
