mod common;
mod error;
mod linsol;
mod math;
mod problem;
mod solnp;
mod subnp;
#[cfg(test)]
mod tests;
mod traits;

pub use crate::solnp::solnp;
pub use common::*;
pub use error::SolnpError;
pub use traits::*;
