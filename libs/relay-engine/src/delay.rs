use relay_api::{DelayStrategy, Message};

/// xorshift64 generator. Not cryptographic, only needs to be cheap and
/// reproducible from a seed.
#[derive(Debug, Clone)]
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in `[0, n)`.
    fn next_below(&mut self, n: u32) -> u32 {
        (self.next_u64() % n as u64) as u32
    }
}

/// Uniform delays in `[min, max)` time units from a seeded generator.
///
/// A seed of `0` seeds from the clock.
#[derive(Debug, Clone)]
pub struct SeededDelays {
    rng: Rng,
    min: u32,
    max: u32,
}

impl SeededDelays {
    /// `max` is exclusive; a range narrower than one unit collapses to `min`.
    pub fn new(seed: u64, min: u32, max: u32) -> Self {
        Self {
            rng: Rng::new(seed),
            min,
            max: max.max(min.saturating_add(1)),
        }
    }
}

impl DelayStrategy for SeededDelays {
    fn next_delay(&mut self, _message: &Message) -> u32 {
        self.min + self.rng.next_below((self.max - self.min).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_half_open_range() {
        let mut delays = SeededDelays::new(42, 1, 10);
        let msg = Message::of(0);
        let mut seen = [false; 10];
        for _ in 0..10_000 {
            let d = delays.next_delay(&msg);
            assert!((1..10).contains(&d), "delay {d} out of range");
            seen[d as usize] = true;
        }
        assert!(seen[1..].iter().all(|s| *s), "every value in [1, 10) should appear");
    }

    #[test]
    fn same_seed_same_sequence() {
        let msg = Message::of(0);
        let mut a = SeededDelays::new(7, 1, 10);
        let mut b = SeededDelays::new(7, 1, 10);
        let xs: Vec<u32> = (0..32).map(|_| a.next_delay(&msg)).collect();
        let ys: Vec<u32> = (0..32).map(|_| b.next_delay(&msg)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn empty_range_collapses_to_min() {
        let mut delays = SeededDelays::new(3, 5, 5);
        assert_eq!(delays.next_delay(&Message::of(0)), 5);
    }
}
