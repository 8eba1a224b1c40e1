use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 30,
            max_seconds: 60 * 60,
            jitter_pct: 0.20,
        }
    }
}

/// Delay before the next try, given how many failed attempts the job now has.
pub fn next_delay_seconds(attempts: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempts = attempts.max(1) as u32;

    let exp = attempts.saturating_sub(1);

    // 2^exp; a huge exponent saturates and the cap below takes over
    let pow2 = if exp >= 62 { i64::MAX } else { 1_i64 << exp };

    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    // NaN or infinite jitter would make gen_range panic
    if !cfg.jitter_pct.is_finite() || cfg.jitter_pct <= 0.0 || delay == 0 {
        return delay.clamp(0, cfg.max_seconds);
    }

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = (delay as f64) * cfg.jitter_pct.min(1.0);
    let jitter = rng.gen_range(-jitter_range..=jitter_range);

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            base_seconds: 2,
            max_seconds: 60,
            jitter_pct: 0.0,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = no_jitter();
        let delays: Vec<i64> = (1..=5)
            .map(|n| next_delay_seconds(n, &cfg, &mut rng))
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
    }

    #[test]
    fn delay_is_capped() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = no_jitter();
        assert_eq!(next_delay_seconds(6, &cfg, &mut rng), 60);
        assert_eq!(next_delay_seconds(500, &cfg, &mut rng), 60);
    }

    #[test]
    fn zero_attempts_is_treated_as_first() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(next_delay_seconds(0, &no_jitter(), &mut rng), 2);
    }

    #[test]
    fn jitter_stays_within_band_and_cap() {
        let mut rng = StdRng::seed_from_u64(42);
        let cfg = RetryConfig {
            base_seconds: 100,
            max_seconds: 1_000,
            jitter_pct: 0.2,
        };
        for _ in 0..200 {
            let d = next_delay_seconds(1, &cfg, &mut rng);
            assert!((80..=120).contains(&d), "delay {d} outside jitter band");
        }
        for _ in 0..200 {
            let d = next_delay_seconds(10, &cfg, &mut rng);
            assert!(d <= 1_000);
        }
    }

    #[test]
    fn non_finite_jitter_falls_back_to_plain_delay() {
        let mut rng = StdRng::seed_from_u64(1);
        for pct in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let cfg = RetryConfig {
                base_seconds: 10,
                max_seconds: 600,
                jitter_pct: pct,
            };
            assert_eq!(next_delay_seconds(3, &cfg, &mut rng), 40);
        }
    }
}
