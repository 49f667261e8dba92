//! General utilities.

#[macro_use]
mod macros;

mod dense_map;

pub use dense_map::DenseMap;

#[doc(hidden)]
pub use log;
