use anyhow::{Result, bail};
use clap::Parser;
use scribepool::cli::{AssignArgs, dry_run, prepare, read_stdin_project};
use scribepool::logging::init_logging;
use scribepool::marketplace::MockMarketplace;

#[tokio::main]
async fn main() -> Result<()> {
    let args = AssignArgs::parse();
    init_logging(args.verbose)?;

    let stdin_project = read_stdin_project()?;
    let invocation = prepare(&args, stdin_project)?;

    if !args.dry_run {
        bail!(
            "this build links no marketplace client; rerun with --dry-run, \
             or call scribepool::cli::run with your own Marketplace"
        );
    }

    let marketplace = MockMarketplace::new();
    let report = dry_run(invocation, Box::new(marketplace.clone())).await?;

    eprintln!("{report} (dry run; nothing uploaded or recorded)");
    for task in marketplace.tasks() {
        println!("{}\t{}", task.task.id, task.payload);
    }
    Ok(())
}
