//! Run-length blink automaton.
//!
//! Counts runs of consecutive below-threshold EAR frames. A run whose length
//! falls inside `[min_frames, max_frames]` is a blink. Shorter runs are
//! landmark jitter; longer runs are sustained closure (a photo with closed
//! eyes, a mask), and neither counts.

/// Automaton thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkConfig {
    /// EAR strictly below this marks a closed-eye frame.
    pub ear_threshold: f32,
    /// Shortest closed run counted as a blink.
    pub min_frames: usize,
    /// Longest closed run counted as a blink.
    pub max_frames: usize,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.20,
            min_frames: 2,
            max_frames: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlinkAutomaton {
    config: BlinkConfig,
    consecutive_low_frames: usize,
    blink_count: u32,
}

impl BlinkAutomaton {
    pub fn new(config: BlinkConfig) -> Self {
        Self {
            config,
            consecutive_low_frames: 0,
            blink_count: 0,
        }
    }

    /// Feed one frame's averaged EAR. Returns true when this frame closed a blink.
    pub fn push(&mut self, ear: f32) -> bool {
        if ear < self.config.ear_threshold {
            self.consecutive_low_frames += 1;
            return false;
        }

        let completed = self.run_is_blink();
        if completed {
            self.blink_count += 1;
        }
        self.consecutive_low_frames = 0;
        completed
    }

    /// End of stream. A stream that stops mid-blink still counts that blink.
    pub fn finish(mut self) -> u32 {
        if self.run_is_blink() {
            self.blink_count += 1;
        }
        self.blink_count
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    pub fn consecutive_low_frames(&self) -> usize {
        self.consecutive_low_frames
    }

    fn run_is_blink(&self) -> bool {
        (self.config.min_frames..=self.config.max_frames).contains(&self.consecutive_low_frames)
    }
}

/// Run a whole EAR sequence through a fresh automaton.
pub fn count_blinks(ears: &[f32], config: BlinkConfig) -> u32 {
    let mut automaton = BlinkAutomaton::new(config);
    for &ear in ears {
        automaton.push(ear);
    }
    automaton.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(ears: &[f32]) -> u32 {
        count_blinks(ears, BlinkConfig::default())
    }

    #[test]
    fn test_two_frame_run_is_one_blink() {
        assert_eq!(count(&[0.30, 0.15, 0.15, 0.30]), 1);
    }

    #[test]
    fn test_single_frame_run_is_noise() {
        assert_eq!(count(&[0.30, 0.15, 0.30]), 0);
    }

    #[test]
    fn test_overlong_run_is_not_a_blink() {
        let mut ears = vec![0.30];
        ears.extend([0.10; 6]);
        ears.push(0.30);
        assert_eq!(count(&ears), 0);
    }

    #[test]
    fn test_max_length_run_counts() {
        let mut ears = vec![0.30];
        ears.extend([0.10; 5]);
        ears.push(0.30);
        assert_eq!(count(&ears), 1);
    }

    #[test]
    fn test_stream_ending_mid_blink_counts() {
        assert_eq!(count(&[0.30, 0.30, 0.12, 0.12, 0.12]), 1);
        assert_eq!(count(&[0.30, 0.12]), 0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Exactly at threshold reads as open.
        assert_eq!(count(&[0.30, 0.20, 0.20, 0.30]), 0);
    }

    #[test]
    fn test_multiple_blinks_accumulate() {
        let ears = [
            0.30, 0.10, 0.10, 0.30, 0.31, 0.12, 0.12, 0.12, 0.29, 0.15, 0.30,
        ];
        assert_eq!(count(&ears), 2);
    }

    #[test]
    fn test_push_reports_completion_and_resets() {
        let mut automaton = BlinkAutomaton::new(BlinkConfig::default());
        assert!(!automaton.push(0.1));
        assert!(!automaton.push(0.1));
        assert_eq!(automaton.consecutive_low_frames(), 2);
        assert!(automaton.push(0.3));
        assert_eq!(automaton.consecutive_low_frames(), 0);
        assert_eq!(automaton.blink_count(), 1);
        assert_eq!(automaton.finish(), 1);
    }

    #[test]
    fn test_empty_stream() {
        assert_eq!(count(&[]), 0);
    }
}
