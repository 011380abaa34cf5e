use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context as _};
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{async_trait, transport::Server, Request, Response, Status};

use super::codec;
use super::common::{merge_name, reduce_name, result_name};
use super::rpc::{self, proto, RpcCaller};
use super::schedule::{schedule, IdleWorkers, PhasePlan, PhaseReport, Registrar, TaskCaller};

/// Reduce tasks per job when the caller does not say.
pub const DEFAULT_N_REDUCE: usize = 10;

/// Accepts worker registrations and feeds them to the scheduler.
#[derive(Clone)]
struct MasterService {
    registrar: Registrar,
    workers: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl proto::master_server::Master for MasterService {
    async fn register(&self, request: Request<proto::RegisterArgs>) -> Result<Response<()>, Status> {
        let worker = request.into_inner().worker;
        if worker.is_empty() {
            return Err(Status::invalid_argument("empty worker address"));
        }
        log::info!("Register: worker {}", worker);
        {
            let mut workers = self.workers.lock().unwrap();
            if !workers.contains(&worker) {
                workers.push(worker.clone());
            }
        }
        self.registrar.register(worker);
        Ok(Response::new(()))
    }
}

impl MasterService {
    fn registered(&self) -> Vec<String> {
        self.workers.lock().unwrap().clone()
    }

    /// Tells every worker that ever registered to exit. Workers that are
    /// already gone are skipped.
    async fn kill_workers(&self) -> Vec<(String, u64)> {
        let mut stats = Vec::new();
        for worker in self.registered() {
            log::debug!("Master: shutdown worker {}", worker);
            match rpc::shutdown(Path::new(&worker)).await {
                Ok(n_tasks) => stats.push((worker, n_tasks)),
                Err(e) => log::debug!("worker {} did not take shutdown: {:#}", worker, e),
            }
        }
        stats
    }
}

/// What a finished job looked like.
#[derive(Debug, Clone)]
pub struct JobStats {
    pub map: PhaseReport,
    pub reduce: PhaseReport,
    pub result: PathBuf,
    /// Tasks run by each worker that was still alive at the end.
    pub worker_tasks: Vec<(String, u64)>,
}

/// The job driver: accepts worker registrations on its socket, schedules
/// the map phase and then the reduce phase, and merges the reduce outputs.
pub struct Master {
    dir: PathBuf,
    sock: PathBuf,
}

impl Master {
    pub fn new(dir: impl Into<PathBuf>, sock: impl Into<PathBuf>) -> Self {
        Master { dir: dir.into(), sock: sock.into() }
    }

    pub async fn run(&self, job_name: &str, files: &[String], n_reduce: usize) -> Result<JobStats, anyhow::Error> {
        if n_reduce == 0 {
            bail!("job {} needs at least one reduce task", job_name);
        }
        log::info!("Master starting on {}", self.sock.display());

        let mut idle = IdleWorkers::new();
        let service = MasterService {
            registrar: idle.registrar(),
            workers: Arc::new(Mutex::new(Vec::new())),
        };

        // delete master socket if exists
        let _ = std::fs::remove_file(&self.sock);
        let listener = UnixListener::bind(&self.sock)
            .with_context(|| format!("bind {}", self.sock.display()))?;
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let serve = Server::builder()
            .add_service(proto::master_server::MasterServer::new(service.clone()))
            .serve_with_incoming_shutdown(
                UnixListenerStream::new(listener),
                async move { shutdown_receiver.await.unwrap_or(()) },
            );

        let drive = async {
            let stats = self.drive(job_name, files, n_reduce, &mut idle).await;
            let worker_tasks = service.kill_workers().await;
            let _ = shutdown_sender.send(());
            stats.map(|stats| JobStats { worker_tasks, ..stats })
        };

        let (served, stats) = tokio::join!(serve, drive);
        let _ = std::fs::remove_file(&self.sock);
        served?;
        log::info!("Master exiting");
        stats
    }

    async fn drive(
        &self,
        job_name: &str,
        files: &[String],
        n_reduce: usize,
        idle: &mut IdleWorkers,
    ) -> Result<JobStats, anyhow::Error> {
        let caller: Arc<dyn TaskCaller> = Arc::new(RpcCaller);

        log::info!("running map tasks");
        let map = schedule(&PhasePlan::map(job_name, files, n_reduce), idle, caller.clone()).await;
        log::info!("running reduce tasks");
        let reduce = schedule(&PhasePlan::reduce(job_name, files.len(), n_reduce), idle, caller).await;

        let result = merge(&self.dir, job_name, n_reduce).await?;
        log::info!("result file: {}", result.display());
        Ok(JobStats { map, reduce, result, worker_tasks: Vec::new() })
    }
}

/// Combines the outputs of all reduce tasks into one file of
/// `key: value` lines sorted by key.
pub async fn merge(dir: &Path, job_name: &str, n_reduce: usize) -> Result<PathBuf, anyhow::Error> {
    log::debug!("Merge phase");
    let mut kvs = BTreeMap::new();
    for reduce_task in 0..n_reduce {
        let path = merge_name(dir, job_name, reduce_task);
        let decoded = codec::read_records(&path).await?;
        if decoded.skipped > 0 {
            log::warn!("skipped {} malformed records in {}", decoded.skipped, path.display());
        }
        for kv in decoded.records {
            kvs.insert(kv.key, kv.value);
        }
    }

    let mut out = String::new();
    for (key, value) in &kvs {
        writeln!(out, "{}: {}", key, value)?;
    }
    let result = result_name(dir, job_name);
    tokio::fs::write(&result, out).await
        .with_context(|| format!("write {}", result.display()))?;
    Ok(result)
}

/// Removes the intermediate files and reduce outputs of a job, keeping the
/// merged result.
pub async fn clean_intermediate(dir: &Path, job_name: &str, n_map: usize, n_reduce: usize) -> Result<(), anyhow::Error> {
    let mut paths = Vec::with_capacity(n_map * n_reduce + n_reduce);
    for reduce_task in 0..n_reduce {
        for map_task in 0..n_map {
            paths.push(reduce_name(dir, job_name, map_task, reduce_task));
        }
        paths.push(merge_name(dir, job_name, reduce_task));
    }
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
    Ok(())
}
