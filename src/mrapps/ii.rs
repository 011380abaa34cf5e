use std::collections::BTreeSet;

use crate::mr::{AppFuture, KeyValue, MRApp};
use super::wc::words;

/// Inverted index: for each word, the number of documents it appears in and
/// their names, as `"n doc1,doc2,..."`.
pub struct InvertedIndex;

impl MRApp for InvertedIndex {
    fn map(&self, key: String, value: String) -> AppFuture<Vec<KeyValue>> {
        Box::pin(async move {
            let distinct: BTreeSet<String> = words(&value).into_iter().collect();
            Ok(distinct.into_iter()
                .map(|word| KeyValue { key: word, value: key.clone() })
                .collect())
        })
    }

    fn reduce(&self, _key: String, values: Vec<String>) -> AppFuture<String> {
        Box::pin(async move {
            let docs: BTreeSet<String> = values.into_iter().collect();
            let names: Vec<String> = docs.into_iter().collect();
            Ok(format!("{} {}", names.len(), names.join(",")))
        })
    }
}
