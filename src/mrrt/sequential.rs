//! Runs a whole job in the calling task, one map and one reduce at a time.
//! Useful as a reference for what the distributed run must produce.

use std::path::{Path, PathBuf};

use crate::mr::MRApp;
use crate::mr::common::merge_name;
use crate::mr::map::do_map;
use crate::mr::master::merge;
use crate::mr::reduce::do_reduce;

pub async fn run(
    dir: &Path,
    job_name: &str,
    files: &[String],
    n_reduce: usize,
    app: &dyn MRApp,
) -> Result<PathBuf, anyhow::Error> {
    log::info!("job {}: {} inputs, {} reduce tasks, sequential", job_name, files.len(), n_reduce);
    for (map_task, file) in files.iter().enumerate() {
        do_map(dir, job_name, map_task, file, n_reduce, app).await?;
    }
    for reduce_task in 0..n_reduce {
        let out_file = merge_name(dir, job_name, reduce_task);
        do_reduce(dir, job_name, reduce_task, &out_file, files.len(), app).await?;
    }
    merge(dir, job_name, n_reduce).await
}
