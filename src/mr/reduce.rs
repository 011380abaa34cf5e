use std::collections::HashMap;
use std::path::Path;

use super::codec::{self, AtomicRecordFile};
use super::common::reduce_name;
use super::{KeyValue, MRApp};

/// Runs reduce task `reduce_task`: gathers partition `reduce_task` from all
/// `n_map` map outputs, calls the application's reduce once per key and
/// writes one record per key to `out_file`.
///
/// An intermediate file that cannot be read is logged and skipped, and so is
/// a malformed record inside one. Failing to write `out_file`, or a reduce
/// function error, fails the task.
pub async fn do_reduce(
    dir: &Path,
    job_name: &str,
    reduce_task: usize,
    out_file: &Path,
    n_map: usize,
    app: &dyn MRApp,
) -> Result<(), anyhow::Error> {
    log::info!("job {} reduce task {} over {} map outputs -> {}",
               job_name, reduce_task, n_map, out_file.display());

    let groups = collect_groups(dir, job_name, reduce_task, n_map).await;

    let mut out = AtomicRecordFile::create(out_file).await?;
    for (key, values) in groups {
        let value = app.reduce(key.clone(), values).await?;
        out.write(&KeyValue { key, value }).await?;
    }
    out.commit().await
}

async fn collect_groups(
    dir: &Path,
    job_name: &str,
    reduce_task: usize,
    n_map: usize,
) -> HashMap<String, Vec<String>> {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for map_task in 0..n_map {
        let file = reduce_name(dir, job_name, map_task, reduce_task);
        let decoded = match codec::read_records(&file).await {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("skipping intermediate file {}: {:#}", file.display(), e);
                continue;
            }
        };
        if decoded.skipped > 0 {
            log::warn!("skipped {} malformed records in {}", decoded.skipped, file.display());
        }
        for kv in decoded.records {
            groups.entry(kv.key).or_default().push(kv.value);
        }
    }
    groups
}
