use crate::processes::*;
use clap::{Parser, Subcommand};
use env_logger::Env;
use zoe::data::err::OrFail;

mod processes;

pub(crate) mod args;
pub(crate) mod io;
pub(crate) mod qc;
pub(crate) mod storage;
pub(crate) mod utils;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Quality filters every gzip compressed FastQ file under the input prefix
    /// by mean read quality, and uploads the passing reads with a run log.
    Preprocess(PreprocessArgs),
    /// Aligns one preprocessed FastQ file against a reference genome and
    /// uploads the BAM file.
    Align(AlignArgs),
    /// Aligns every preprocessed FastQ file under a prefix against a reference
    /// genome.
    AlignBatch(AlignBatchArgs),
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Cli::parse();

    match args.command {
        Commands::Preprocess(cmd_args) => preprocess_process(cmd_args).unwrap_or_die("subcommand 'preprocess'"),
        Commands::Align(cmd_args) => align_process(cmd_args).unwrap_or_die("subcommand 'align'"),
        Commands::AlignBatch(cmd_args) => align_batch_process(cmd_args).unwrap_or_die("subcommand 'align-batch'"),
    }
}
