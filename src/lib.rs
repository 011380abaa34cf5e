//! A fault-tolerant MapReduce runtime.
//!
//! The master drives a job through a map phase and a reduce phase, handing
//! tasks to whichever workers have registered and retrying tasks whose worker
//! failed. Workers talk gRPC over Unix domain sockets and share a directory
//! for intermediate files.

pub mod mr;
pub mod mrapps;
pub mod mrrt;
mod util;

#[cfg(test)]
mod test_mr;
