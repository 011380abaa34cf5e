use std::path::Path;

use anyhow::{bail, Context as _};

use super::codec::AtomicRecordFile;
use super::common::reduce_name;
use super::{KeyValue, MRApp};
use crate::util::ihash;

/// Runs map task `map_task` over `in_file` and leaves its output split into
/// `n_reduce` partitions, one file each.
///
/// Every partition file is written, empty or not, and each one appears
/// atomically.
pub async fn do_map(
    dir: &Path,
    job_name: &str,
    map_task: usize,
    in_file: &str,
    n_reduce: usize,
    app: &dyn MRApp,
) -> Result<(), anyhow::Error> {
    if n_reduce == 0 {
        bail!("map task {} of job {}: no reduce partitions", map_task, job_name);
    }
    log::info!("job {} map task {}: {} into {} partitions", job_name, map_task, in_file, n_reduce);

    let contents = tokio::fs::read_to_string(in_file).await
        .with_context(|| format!("read input {}", in_file))?;
    let kvs = app.map(in_file.to_string(), contents).await?;

    let mut partitions: Vec<Vec<KeyValue>> = vec![Vec::new(); n_reduce];
    for kv in kvs {
        let r = ihash(&kv.key) as usize % n_reduce;
        partitions[r].push(kv);
    }

    for (reduce_task, records) in partitions.iter().enumerate() {
        let path = reduce_name(dir, job_name, map_task, reduce_task);
        let mut out = AtomicRecordFile::create(&path).await?;
        for kv in records {
            out.write(kv).await?;
        }
        out.commit().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mr::codec::read_records;
    use crate::mrapps::wc::WC;

    #[tokio::test]
    async fn partitions_by_key_hash() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        tokio::fs::write(&input, "apple banana apple\ncherry").await.unwrap();
        let input = input.to_str().unwrap();

        do_map(dir.path(), "job", 4, input, 3, &WC).await.unwrap();

        let mut total = 0;
        for r in 0..3 {
            let decoded = read_records(&reduce_name(dir.path(), "job", 4, r)).await.unwrap();
            for kv in &decoded.records {
                assert_eq!(ihash(&kv.key) as usize % 3, r);
                assert_eq!(kv.value, "1");
            }
            total += decoded.records.len();
        }
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn writes_empty_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.txt");
        tokio::fs::write(&input, "").await.unwrap();

        do_map(dir.path(), "job", 0, input.to_str().unwrap(), 5, &WC).await.unwrap();

        for r in 0..5 {
            assert!(reduce_name(dir.path(), "job", 0, r).exists());
        }
    }

    #[tokio::test]
    async fn missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.txt");
        assert!(do_map(dir.path(), "job", 0, input.to_str().unwrap(), 2, &WC).await.is_err());
        assert!(!reduce_name(dir.path(), "job", 0, 0).exists());
    }
}
