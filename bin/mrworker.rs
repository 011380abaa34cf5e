use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mrsched::mr;

#[derive(Parser)]
#[command(name = "mrworker")]
struct Args {
    app: String,
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    /// Master socket to register with
    #[arg(long)]
    master: Option<PathBuf>,
    /// Socket to serve tasks on
    #[arg(long)]
    addr: Option<PathBuf>,
    /// Exit after this many tasks
    #[arg(long)]
    max_tasks: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let app = Arc::from(mrsched::mrapps::get_app(&args.app)?);
    let master = args.master.unwrap_or_else(mr::rpc::master_sock);
    let sock = args.addr
        .unwrap_or_else(|| mr::rpc::worker_sock(&std::process::id().to_string()));

    let mut worker = mr::worker::Worker::new(args.dir, app);
    if let Some(n) = args.max_tasks {
        worker = worker.with_max_tasks(n);
    }
    worker.run(&master, &sock).await?;

    Ok(())
}
