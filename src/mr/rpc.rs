use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tonic::async_trait;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use super::common::TaskArgs;
use super::schedule::TaskCaller;

pub mod proto {
    tonic::include_proto!("mr");
}

#[link(name = "c")]
unsafe extern "C" {
    fn geteuid() -> u32;
}

fn uid() -> u32 {
    unsafe { geteuid() }
}

/// Default address of the master.
pub fn master_sock() -> PathBuf {
    PathBuf::from(format!("/tmp/824-mr-{}", uid()))
}

/// Default address of a worker called `name`.
pub fn worker_sock(name: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/824-mr-{}-{}", uid(), name))
}

/// Opens a gRPC channel to whatever listens on the Unix socket `sock`.
pub async fn connect(sock: &Path) -> Result<Channel, anyhow::Error> {
    let sock = sock.to_path_buf();
    // the URI is required by tonic but never resolved
    let channel = Endpoint::from_static("http://[::1]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let sock = sock.clone();
            async move {
                let stream = UnixStream::connect(sock).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
            }
        }))
        .await?;
    Ok(channel)
}

/// Tells the master at `master` that the worker at `worker` is ready.
pub async fn register(master: &Path, worker: &Path) -> Result<(), anyhow::Error> {
    let mut client = proto::master_client::MasterClient::new(connect(master).await?);
    client.register(proto::RegisterArgs {
        worker: worker.to_string_lossy().into_owned(),
    }).await?;
    Ok(())
}

/// Asks the worker at `worker` to stop; returns how many tasks it ran.
pub async fn shutdown(worker: &Path) -> Result<u64, anyhow::Error> {
    let mut client = proto::worker_client::WorkerClient::new(connect(worker).await?);
    let reply = client.shutdown(()).await?.into_inner();
    Ok(reply.n_tasks)
}

/// [`TaskCaller`] that reaches workers through their `Worker.DoTask` RPC.
///
/// A fresh connection is made for every call; any transport error or
/// non-OK status counts as a failed call.
pub struct RpcCaller;

#[async_trait]
impl TaskCaller for RpcCaller {
    async fn do_task(&self, worker: &str, args: TaskArgs) -> Result<(), anyhow::Error> {
        let mut client = proto::worker_client::WorkerClient::new(connect(Path::new(worker)).await?);
        client.do_task(proto::DoTaskArgs::from(args)).await?;
        Ok(())
    }
}
