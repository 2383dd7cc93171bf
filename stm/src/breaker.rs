// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

const MAX_WAIT_UNITS: usize = 7;

/// Escalating busy-wait for short delays on contended retries.
///
/// Each call to [`BusyBreaker::spin`] doubles the number of spin-loop
/// hints, up to `2^MAX_WAIT_UNITS`. When the budget is exhausted `spin`
/// returns `false` and the caller is expected to yield the thread and
/// [`reset`](BusyBreaker::reset).
#[derive(Default)]
pub(crate) struct BusyBreaker {
    unit: AtomicUsize,
}

impl BusyBreaker {
    /// Keeps the CPU busy while hinting the core that it sits in a spin
    /// loop. Returns `false` once the spin budget is used up.
    pub(crate) fn spin(&self) -> bool {
        match self.unit.load(Ordering::Acquire) {
            unit if unit <= MAX_WAIT_UNITS => {
                for _ in 0..(1usize << unit) {
                    core::hint::spin_loop();
                }
                self.unit.store(unit + 1, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Resets the breaker to the shortest delay.
    pub(crate) fn reset(&self) {
        self.unit.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_and_reset() {
        let breaker = BusyBreaker::default();
        let mut spins = 0;
        while breaker.spin() {
            spins += 1;
        }
        assert_eq!(spins, MAX_WAIT_UNITS + 1);

        breaker.reset();
        assert!(breaker.spin());
    }
}
