use std::path::PathBuf;

use clap::Parser;
use mrsched::mr::{self, master::DEFAULT_N_REDUCE};

#[derive(Parser)]
#[command(name = "mrmaster")]
struct Args {
    /// Directory holding intermediate and output files
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    #[arg(long, default_value = "mr")]
    job: String,
    #[arg(long, default_value_t = DEFAULT_N_REDUCE)]
    n_reduce: usize,
    /// Socket to listen on for workers
    #[arg(long)]
    addr: Option<PathBuf>,
    /// Keep intermediate files after the job
    #[arg(long)]
    keep: bool,
    #[arg(required = true)]
    input_files: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let sock = args.addr.unwrap_or_else(mr::rpc::master_sock);
    let master = mr::master::Master::new(&args.dir, sock);
    let stats = master.run(&args.job, &args.input_files, args.n_reduce).await?;

    for (worker, n_tasks) in &stats.worker_tasks {
        log::info!("worker {} ran {} tasks", worker, n_tasks);
    }
    if !args.keep {
        mr::master::clean_intermediate(&args.dir, &args.job, args.input_files.len(), args.n_reduce).await?;
    }
    println!("{}", stats.result.display());

    Ok(())
}
