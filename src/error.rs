//! Library error type (§7). Only `init`/`change` are fallible; steady-state
//! operations (`enqueue`, `dequeue`, `peek`, `reset`, `drop_one`) never
//! return an error — queue-full and overflow are handled silently and
//! reported only through statistics.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CakeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("out of memory allocating scheduler state")]
    OutOfMemory,
}
