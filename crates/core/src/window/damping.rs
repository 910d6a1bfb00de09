use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of the uniform draw in `[0, 1)` that damps the aggregate signal path.
pub trait RandomDraw: Send + Sync {
    fn draw(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngDraw;

impl RandomDraw for ThreadRngDraw {
    fn draw(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[derive(Debug)]
pub struct SeededDraw {
    rng: Mutex<StdRng>,
}

impl SeededDraw {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl RandomDraw for SeededDraw {
    fn draw(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen::<f64>()
    }
}

/// Always returns the same value. `FixedDraw(0.0)` always passes the damping check,
/// `FixedDraw(1.0)` never does.
#[derive(Clone, Copy, Debug)]
pub struct FixedDraw(pub f64);

impl RandomDraw for FixedDraw {
    fn draw(&self) -> f64 {
        self.0
    }
}
