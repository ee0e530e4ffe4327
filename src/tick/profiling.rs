use std::time::Duration;

/// Weight of a new sample in the running average
const SAMPLE_WEIGHT: f64 = 0.1;

/// Exponentially windowed cost of a recurring pass, in milliseconds
#[derive(Debug, Default, Clone, Copy)]
pub struct ComputeTimer {
    average_ms: Option<f64>,
}

impl ComputeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.average_ms = Some(match self.average_ms {
            Some(average) => average * (1.0 - SAMPLE_WEIGHT) + sample * SAMPLE_WEIGHT,
            None => sample,
        });
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_sets_average() {
        let mut timer = ComputeTimer::new();
        assert_eq!(timer.average_ms(), 0.0);
        timer.record(Duration::from_millis(4));
        assert!((timer.average_ms() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_smooths_spikes() {
        let mut timer = ComputeTimer::new();
        timer.record(Duration::from_millis(2));
        timer.record(Duration::from_millis(12));
        assert!((timer.average_ms() - 3.0).abs() < 1e-9);
    }
}
