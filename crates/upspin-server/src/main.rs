//! Binary entry point: an in-memory Key/Store/Dir server exercising the
//! authenticated remote-service protocol end-to-end (§2.1).

use anyhow::Context;
use upspin_server::{cli, logger, run};

fn main() -> anyhow::Result<()> {
    let args: cli::Args = argh::from_env();
    logger::init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    rt.block_on(run::run(args))
}
