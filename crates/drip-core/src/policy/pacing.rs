//! Inter-send pacing.

use rand::Rng;
use std::time::Duration;

use crate::domain::DripError;

/// Random delay between consecutive sends in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacer {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Pacer {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Result<Self, DripError> {
        if min_delay > max_delay {
            return Err(DripError::Config(format!(
                "min delay {min_delay:?} exceeds max delay {max_delay:?}"
            )));
        }
        Ok(Self {
            min_delay,
            max_delay,
        })
    }

    /// No pacing at all.
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// 3 to 9 seconds.
    pub fn default_v1() -> Self {
        Self {
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(9),
        }
    }

    /// Uniform in `[min_delay, max_delay]`.
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let secs = rng.gen_range(self.min_delay.as_secs_f64()..=self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn delays_stay_in_bounds() {
        let pacer = Pacer::new(Duration::from_secs(3), Duration::from_secs(9)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = pacer.next_delay(&mut rng);
            assert!(d >= Duration::from_secs(3) && d <= Duration::from_secs(9), "{d:?}");
        }
    }

    #[test]
    fn equal_bounds_are_fixed() {
        let pacer = Pacer::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        assert_eq!(pacer.next_delay(&mut rand::thread_rng()), Duration::from_secs(2));
        assert_eq!(Pacer::none().next_delay(&mut rand::thread_rng()), Duration::ZERO);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(Pacer::new(Duration::from_secs(10), Duration::from_secs(1)).is_err());
    }
}
