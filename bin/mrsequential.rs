use std::path::PathBuf;

use clap::Parser;
use mrsched::mr::master::{clean_intermediate, DEFAULT_N_REDUCE};

#[derive(Parser)]
#[command(name = "mrsequential")]
struct Args {
    app: String,
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    #[arg(long, default_value = "seq")]
    job: String,
    #[arg(long, default_value_t = DEFAULT_N_REDUCE)]
    n_reduce: usize,
    #[arg(required = true)]
    input_files: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let app = mrsched::mrapps::get_app(&args.app)?;
    let result = mrsched::mrrt::sequential::run(
        &args.dir, &args.job, &args.input_files, args.n_reduce, app.as_ref(),
    ).await?;
    clean_intermediate(&args.dir, &args.job, args.input_files.len(), args.n_reduce).await?;
    println!("{}", result.display());

    Ok(())
}
