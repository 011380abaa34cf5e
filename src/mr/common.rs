use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use super::rpc::proto;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    Map,
    Reduce,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Map => write!(f, "map"),
            JobPhase::Reduce => write!(f, "reduce"),
        }
    }
}

/// One task assignment, as sent to a worker.
///
/// Built fresh for every attempt; nothing about a previous attempt is carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskArgs {
    pub job_name: String,
    /// Input split for a map task, empty for a reduce task.
    pub file: String,
    pub phase: JobPhase,
    pub task_number: usize,
    /// Number of reduce tasks for a map task, number of map tasks for a reduce task.
    pub num_other_phase: usize,
}

impl From<TaskArgs> for proto::DoTaskArgs {
    fn from(args: TaskArgs) -> Self {
        let phase = match args.phase {
            JobPhase::Map => proto::JobPhase::Map,
            JobPhase::Reduce => proto::JobPhase::Reduce,
        };
        proto::DoTaskArgs {
            job_name: args.job_name,
            file: args.file,
            phase: phase as i32,
            task_number: args.task_number as u64,
            num_other_phase: args.num_other_phase as u64,
        }
    }
}

impl TryFrom<proto::DoTaskArgs> for TaskArgs {
    type Error = anyhow::Error;

    fn try_from(args: proto::DoTaskArgs) -> Result<Self, Self::Error> {
        let phase = match proto::JobPhase::try_from(args.phase) {
            Ok(proto::JobPhase::Map) => JobPhase::Map,
            Ok(proto::JobPhase::Reduce) => JobPhase::Reduce,
            Err(_) => return Err(anyhow!("unknown job phase {}", args.phase)),
        };
        Ok(TaskArgs {
            job_name: args.job_name,
            file: args.file,
            phase,
            task_number: usize::try_from(args.task_number)?,
            num_other_phase: usize::try_from(args.num_other_phase)?,
        })
    }
}

/// Where map task `map_task` leaves its records for reduce task `reduce_task`.
///
/// Both sides of the shuffle resolve files through this function only.
pub fn reduce_name(dir: &Path, job_name: &str, map_task: usize, reduce_task: usize) -> PathBuf {
    dir.join(format!("mrtmp.{}-{}-{}", job_name, map_task, reduce_task))
}

/// Output of reduce task `reduce_task`.
pub fn merge_name(dir: &Path, job_name: &str, reduce_task: usize) -> PathBuf {
    dir.join(format!("mrtmp.{}-res-{}", job_name, reduce_task))
}

/// The merged result of the whole job.
pub fn result_name(dir: &Path, job_name: &str) -> PathBuf {
    dir.join(format!("mrtmp.{}", job_name))
}
