use crate::mr::{AppFuture, KeyValue, MRApp};

/// Word count: every maximal run of letters is a word.
pub struct WC;

pub(crate) fn words(text: &str) -> Vec<String> {
    // regular expression is an order of magnitude slower
    let mut res = vec![];
    let mut buf = String::new();
    for c in text.chars() {
        if c.is_alphabetic() {
            buf.push(c);
        } else if !buf.is_empty() {
            res.push(std::mem::take(&mut buf));
        }
    }
    if !buf.is_empty() {
        res.push(buf);
    }
    res
}

impl MRApp for WC {
    fn map(&self, _key: String, value: String) -> AppFuture<Vec<KeyValue>> {
        Box::pin(async move {
            Ok(words(&value).into_iter()
                .map(|word| KeyValue { key: word, value: "1".to_string() })
                .collect())
        })
    }

    fn reduce(&self, _key: String, values: Vec<String>) -> AppFuture<String> {
        Box::pin(async move {
            Ok(values.len().to_string())
        })
    }
}
