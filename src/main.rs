mod actions;
mod classifier;
mod cli;
mod config;
mod engine;
mod input;
mod ipc;
mod logging;
mod protocol;
mod recognition;
mod replay;
mod sample;
mod segmentation;
mod training;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
