//! Atomic float cells.
//!
//! The node statistics are plain floats updated from many workers; the
//! standard library has no atomic floats, so these wrap the bit pattern in
//! an atomic integer and add via a compare-exchange loop. All operations are
//! relaxed: correctness relies only on eventual consistency.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> AtomicF32 {
        AtomicF32 {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f32) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> AtomicF64 {
        AtomicF64 {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates() {
        let cell = AtomicF64::new(1.5);
        cell.add(2.25);
        cell.add(-0.75);
        assert_eq!(cell.load(), 3.0);
    }

    #[test]
    fn concurrent_adds_do_not_lose_updates() {
        let cell = std::sync::Arc::new(AtomicF64::new(0.0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let cell = std::sync::Arc::clone(&cell);
                scope.spawn(move || {
                    for _ in 0..1000 {
                        cell.add(1.0);
                    }
                });
            }
        });
        assert_eq!(cell.load(), 4000.0);
    }

    #[test]
    fn f32_store_and_load() {
        let cell = AtomicF32::new(0.0);
        cell.store(0.25);
        assert_eq!(cell.load(), 0.25);
        cell.add(0.5);
        assert_eq!(cell.load(), 0.75);
    }
}
