#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use canary_router::server;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "canary-router",
    version,
    about = "HTTP reverse proxy that splits traffic between a main and a canary upstream"
)]
struct Cli {
    /// Path to the router config file (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
    }))
}
