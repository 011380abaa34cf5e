use std::pin::Pin;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod common;
pub mod map;
pub mod master;
pub mod reduce;
pub mod rpc;
pub mod schedule;
pub mod worker;

/// The unit exchanged between map and reduce, and the shape of reduce output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue { key: key.into(), value: value.into() }
    }
}

pub type AppFuture<T> = Pin<Box<dyn Future<Output=Result<T, anyhow::Error>> + Send + 'static>>;

/// A MapReduce application.
///
/// `map` receives the input split name and its contents. `reduce` is called
/// once per distinct key with every value emitted for it, in no particular
/// order.
pub trait MRApp: Send + Sync {
    fn map(&self, key: String, value: String) -> AppFuture<Vec<KeyValue>>;
    fn reduce(&self, key: String, values: Vec<String>) -> AppFuture<String>;
}
