use clap::Parser;
use indicatif::MultiProgress;
use tracing_subscriber::{EnvFilter, fmt};
use vmbundle::progress::SpinnerAwareWriter;
use vmbundle::{Cli, WorkflowOutcome, exit_code, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let progress = MultiProgress::new();
    install_tracing(&cli.log, progress.clone());

    let result = run(cli, progress).await;
    match &result {
        Ok(WorkflowOutcome::Completed(images)) => {
            if let Some(kernel_id) = &images.kernel_id {
                println!("kernel: {kernel_id}");
            }
            if let Some(ramdisk_id) = &images.ramdisk_id {
                println!("ramdisk: {ramdisk_id}");
            }
            println!("image: {}", images.filesystem_id);
        }
        Ok(WorkflowOutcome::Declined | WorkflowOutcome::Interrupted) => {}
        Err(err) => tracing::error!("{err}"),
    }
    std::process::exit(exit_code(&result));
}

/// Logs go to stderr so prompts on stdout stay readable, and pause any
/// command spinner drawn through `progress` while they print.
pub fn install_tracing(level: &str, progress: MultiProgress) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(SpinnerAwareWriter::new(progress, std::io::stderr))
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .init();
}
