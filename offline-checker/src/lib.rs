pub mod checker;
pub mod config;
pub mod delta;
pub mod email;
pub mod ident;
pub mod model;
pub mod report;
pub mod snapshot;
pub mod state;

#[cfg(test)]
mod testing;

mod error;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
