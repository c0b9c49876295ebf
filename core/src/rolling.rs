/// Fixed-capacity ring of the most recent raw samples.
///
/// `head` is the next write position; once full, new samples overwrite the
/// oldest ones.
#[derive(Debug, Clone)]
pub struct RollingAudioBuffer {
    data: Vec<f32>,
    head: usize,
    filled: usize,
}

impl RollingAudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            head: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn push(&mut self, samples: &[f32]) {
        let capacity = self.data.len();
        // Only the tail of an oversized block survives
        let samples = &samples[samples.len().saturating_sub(capacity)..];
        for &sample in samples {
            self.data[self.head] = sample;
            self.head = (self.head + 1) % capacity;
        }
        self.filled = (self.filled + samples.len()).min(capacity);
    }

    /// The newest `count` samples, oldest first.
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let count = count.min(self.filled);
        let capacity = self.data.len();
        let start = (self.head + capacity - count) % capacity;
        (0..count).map(|i| self.data[(start + i) % capacity]).collect()
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|s| *s = 0.0);
        self.head = 0;
        self.filled = 0;
    }
}

/// Noise floor tracked as the average block RMS over recent ingestions.
///
/// Empty history slots are ignored; until the first non-silent block arrives
/// the estimate stays at its initial value.
#[derive(Debug, Clone)]
pub struct NoiseEstimate {
    history: Vec<f32>,
    head: usize,
    initial: f32,
    level: f32,
}

impl NoiseEstimate {
    pub fn new(history_len: usize, initial: f32) -> Self {
        Self {
            history: vec![0.0; history_len.max(1)],
            head: 0,
            initial,
            level: initial,
        }
    }

    pub fn update(&mut self, block_rms: f32) -> f32 {
        self.history[self.head] = block_rms;
        self.head = (self.head + 1) % self.history.len();

        let (sum, count) = self
            .history
            .iter()
            .filter(|&&v| v > 0.0)
            .fold((0.0f32, 0usize), |(s, c), &v| (s + v, c + 1));
        if count > 0 {
            self.level = sum / count as f32;
        }
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|v| *v = 0.0);
        self.head = 0;
        self.level = self.initial;
    }
}
