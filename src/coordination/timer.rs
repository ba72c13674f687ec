use rand::Rng;
use std::time::Duration;

/// Random delay in `[base / 2, base * 3 / 2]` so campaigning nodes do not
/// retry in lockstep.
pub fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms < 2 {
        return base;
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(base_ms / 2..=base_ms + base_ms / 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        let base = Duration::from_millis(200);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn tiny_base_is_unchanged() {
        assert_eq!(jittered(Duration::from_millis(1)), Duration::from_millis(1));
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
