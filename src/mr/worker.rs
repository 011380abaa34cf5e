use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{async_trait, transport::Server, Request, Response, Status};

use super::common::{merge_name, JobPhase, TaskArgs};
use super::map::do_map;
use super::reduce::do_reduce;
use super::rpc::{self, proto};
use super::MRApp;

/// A worker process: serves `Worker.DoTask` on its own socket and runs the
/// application's map or reduce for each task it is given.
pub struct Worker {
    dir: PathBuf,
    app: Arc<dyn MRApp>,
    max_tasks: Option<usize>,
}

struct WorkerState {
    dir: PathBuf,
    app: Arc<dyn MRApp>,
    max_tasks: Option<usize>,
    n_tasks: AtomicUsize,
    n_concurrent: AtomicUsize,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

#[derive(Clone)]
struct WorkerService {
    inner: Arc<WorkerState>,
}

impl Worker {
    /// `dir` is where intermediate and output files live; it must be the
    /// same directory the rest of the job uses.
    pub fn new(dir: impl Into<PathBuf>, app: Arc<dyn MRApp>) -> Self {
        Worker { dir: dir.into(), app, max_tasks: None }
    }

    /// Stop serving after `n` tasks, as if the process died.
    pub fn with_max_tasks(mut self, n: usize) -> Self {
        self.max_tasks = Some(n);
        self
    }

    /// Serves on `sock` and registers with the master at `master`. Returns
    /// the number of tasks received once the worker is shut down.
    pub async fn run(self, master: &Path, sock: &Path) -> Result<usize, anyhow::Error> {
        log::info!("Worker {} starting", sock.display());

        // delete worker socket if exists
        let _ = std::fs::remove_file(sock);
        let listener = UnixListener::bind(sock)?;

        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
        let service = WorkerService {
            inner: Arc::new(WorkerState {
                dir: self.dir,
                app: self.app,
                max_tasks: self.max_tasks,
                n_tasks: AtomicUsize::new(0),
                n_concurrent: AtomicUsize::new(0),
                shutdown: Mutex::new(Some(shutdown_sender)),
            }),
        };

        let grpc = proto::worker_server::WorkerServer::new(service.clone());
        let serve = async move {
            Server::builder()
                .add_service(grpc)
                .serve_with_incoming_shutdown(
                    UnixListenerStream::new(listener),
                    async move { shutdown_receiver.await.unwrap_or(()) },
                )
                .await?;
            Ok::<_, anyhow::Error>(())
        };
        let announce = async {
            rpc::register(master, sock).await?;
            log::info!("Worker {} registered with {}", sock.display(), master.display());
            Ok::<_, anyhow::Error>(())
        };
        let result = tokio::try_join!(serve, announce);

        let _ = std::fs::remove_file(sock);
        result?;
        let n_tasks = service.tasks_run();
        log::info!("Worker {} exiting after {} tasks", sock.display(), n_tasks);
        Ok(n_tasks)
    }
}

impl WorkerService {
    /// Tasks accepted, not counting calls refused after the budget ran out.
    fn tasks_run(&self) -> usize {
        let n = self.inner.n_tasks.load(Ordering::SeqCst);
        self.inner.max_tasks.map_or(n, |max| n.min(max))
    }

    fn stop(&self) {
        if let Some(sender) = self.inner.shutdown.lock().unwrap().take() {
            let _ = sender.send(());
        }
    }

    async fn run_task(&self, args: &TaskArgs) -> Result<(), anyhow::Error> {
        let state = &self.inner;
        match args.phase {
            JobPhase::Map => do_map(
                &state.dir, &args.job_name, args.task_number,
                &args.file, args.num_other_phase, state.app.as_ref(),
            ).await,
            JobPhase::Reduce => {
                let out_file = merge_name(&state.dir, &args.job_name, args.task_number);
                do_reduce(
                    &state.dir, &args.job_name, args.task_number,
                    &out_file, args.num_other_phase, state.app.as_ref(),
                ).await
            }
        }
    }
}

#[async_trait]
impl proto::worker_server::Worker for WorkerService {
    async fn do_task(&self, request: Request<proto::DoTaskArgs>) -> Result<Response<()>, Status> {
        let args = TaskArgs::try_from(request.into_inner())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let n = self.inner.n_tasks.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.inner.max_tasks {
            if n > max {
                self.stop();
                return Err(Status::unavailable("worker is going away"));
            }
        }

        log::debug!("{} task#{} of job {} received", args.phase, args.task_number, args.job_name);
        let concurrent = self.inner.n_concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        if concurrent > 1 {
            log::warn!("{} tasks running at once on one worker", concurrent);
        }
        let result = self.run_task(&args).await;
        self.inner.n_concurrent.fetch_sub(1, Ordering::SeqCst);

        if self.inner.max_tasks == Some(n) {
            log::info!("task budget of {} spent, stopping", n);
            self.stop();
        }

        match result {
            Ok(()) => {
                log::debug!("{} task#{} of job {} done", args.phase, args.task_number, args.job_name);
                Ok(Response::new(()))
            }
            Err(e) => {
                log::warn!("{} task#{} of job {} failed: {:#}", args.phase, args.task_number, args.job_name, e);
                Err(Status::internal(format!("{:#}", e)))
            }
        }
    }

    async fn shutdown(&self, _request: Request<()>) -> Result<Response<proto::ShutdownReply>, Status> {
        log::info!("Shutdown requested");
        let n_tasks = self.tasks_run();
        self.stop();
        Ok(Response::new(proto::ShutdownReply { n_tasks: n_tasks as u64 }))
    }
}
