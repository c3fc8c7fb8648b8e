mod penalty;
mod powell;
mod quadratic;

use crate::ObjectiveFunction;
use nalgebra::DMatrix;
use std::cell::Cell;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .format_module_path(false)
        .format_timestamp(None)
        .format_target(false)
        .is_test(true)
        .init();
}

/// Objective wrapper that counts how often it is evaluated.
pub(crate) struct Counted<F> {
    pub f: F,
    pub calls: Cell<usize>,
}

impl<F> Counted<F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            calls: Cell::new(0),
        }
    }
}

impl<F> ObjectiveFunction for Counted<F>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    fn f(&self, x: &[f64]) -> Vec<f64> {
        self.calls.set(self.calls.get() + 1);
        (self.f)(x)
    }
}

pub(crate) fn max_asymmetry(h: &DMatrix<f64>) -> f64 {
    (h - h.transpose()).amax()
}
