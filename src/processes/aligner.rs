// Description:      Aligns preprocessed FASTQ objects against a reference genome
//                   with external tools (BWA and samtools by default) and
//                   uploads the resulting BAM files.

use crate::{
    args::{DEFAULT_BUCKET, StorageArgs},
    storage::{BucketStore, ObjectRef, ObjectStorage, StorageError, list_with_suffix},
    utils::{
        external::{CommandError, ExternalCommand},
        keys::{READS_SUFFIX, aligned_name, join_key},
        report::{OutcomeStatus, RunReport},
    },
};
use clap::{Args, ValueHint};
use log::{debug, error, info};
use std::{error::Error, ffi::OsStr, fmt, path::PathBuf};

#[derive(Args, Debug)]
pub struct AlignArgs {
    /// Name of the reference genome, stored as `<REFERENCE_PREFIX><REFERENCE>.fasta`.
    reference: String,

    /// Key of the FASTQ file to align in the input bucket.
    input_key: String,

    /// Bucket receiving the BAM file.
    output_bucket: String,

    /// Key prefix for the BAM file, which is saved as
    /// `<OUTPUT_KEY>/<stem>_aligned.bam`.
    output_key: String,

    #[command(flatten)]
    options: AlignOptionArgs,
}

#[derive(Args, Debug)]
pub struct AlignBatchArgs {
    /// Name of the reference genome, stored as `<REFERENCE_PREFIX><REFERENCE>.fasta`.
    reference: String,

    /// Bucket receiving the BAM files.
    output_bucket: String,

    #[arg(long, default_value = "preprocessed/")]
    /// Key prefix of the FASTQ files to align. Only keys ending in `.fastq` are
    /// aligned.
    input_prefix: String,

    #[arg(long, default_value = "align")]
    /// Key prefix for the BAM files.
    output_prefix: String,

    #[command(flatten)]
    options: AlignOptionArgs,
}

/// Options shared by single and batch alignment.
#[derive(Args, Debug)]
pub struct AlignOptionArgs {
    #[arg(long, default_value = DEFAULT_BUCKET)]
    /// Bucket holding the reference genomes.
    reference_bucket: String,

    #[arg(long, default_value = "dataset/")]
    /// Key prefix of the reference genomes.
    reference_prefix: String,

    #[arg(long, default_value = DEFAULT_BUCKET)]
    /// Bucket holding the FASTQ files to align.
    input_bucket: String,

    #[arg(long, default_value = "bwa", value_hint = ValueHint::CommandName)]
    /// The BWA executable, used for `index` and `mem`.
    bwa: PathBuf,

    #[arg(long, default_value = "samtools", value_hint = ValueHint::CommandName)]
    /// The samtools executable, used to convert SAM to BAM.
    samtools: PathBuf,

    #[command(flatten)]
    storage: StorageArgs,
}

/// The external commands of the alignment pipeline. Each receives its file
/// arguments appended after the configured arguments.
#[derive(Debug, Clone)]
pub(crate) struct AlignerTools {
    /// Run as `<indexer> <reference>`.
    pub(crate) indexer:   ExternalCommand,
    /// Run as `<mapper> <reference> <reads>`, writing SAM to stdout.
    pub(crate) mapper:    ExternalCommand,
    /// Reads SAM from stdin and writes BAM to stdout.
    pub(crate) converter: ExternalCommand,
}

impl AlignerTools {
    pub(crate) fn bwa_samtools(bwa: impl AsRef<OsStr>, samtools: impl AsRef<OsStr>) -> Self {
        Self {
            indexer:   ExternalCommand::new(&bwa).arg("index"),
            mapper:    ExternalCommand::new(&bwa).arg("mem"),
            converter: ExternalCommand::new(samtools).args(["view", "-bS", "-"]),
        }
    }
}

#[derive(Debug)]
pub(crate) struct AlignConfig {
    pub(crate) reference_bucket: String,
    pub(crate) reference_prefix: String,
    pub(crate) input_bucket:     String,
    pub(crate) tools:            AlignerTools,
}

impl AlignConfig {
    fn reference_object(&self, reference: &str) -> ObjectRef {
        ObjectRef::new(
            &self.reference_bucket,
            format!("{prefix}{reference}.fasta", prefix = self.reference_prefix),
        )
    }
}

/// A failure aligning a single read file. Nothing is uploaded once one occurs.
#[non_exhaustive]
#[derive(Debug)]
pub(crate) enum AlignError {
    Storage(StorageError),
    Command(CommandError),
    Staging(std::io::Error),
}

impl fmt::Display for AlignError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AlignError::Storage(e) => write!(f, "{e}"),
            AlignError::Command(e) => write!(f, "{e}"),
            AlignError::Staging(e) => write!(f, "Failed to create the staging directory:\n{e}"),
        }
    }
}

impl Error for AlignError {
    #[inline]
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AlignError::Storage(e) => Some(e),
            AlignError::Command(e) => Some(e),
            AlignError::Staging(e) => Some(e),
        }
    }
}

impl From<StorageError> for AlignError {
    #[inline]
    fn from(error: StorageError) -> Self {
        AlignError::Storage(error)
    }
}

impl From<CommandError> for AlignError {
    #[inline]
    fn from(error: CommandError) -> Self {
        AlignError::Command(error)
    }
}

fn parse_align_options(options: AlignOptionArgs) -> std::io::Result<(AlignConfig, BucketStore)> {
    let AlignOptionArgs {
        reference_bucket,
        reference_prefix,
        input_bucket,
        bwa,
        samtools,
        storage,
    } = options;

    let config = AlignConfig {
        reference_bucket,
        reference_prefix,
        input_bucket,
        tools: AlignerTools::bwa_samtools(bwa, samtools),
    };

    Ok((config, storage.open()?))
}

/// Sub-program for aligning a single FASTQ file.
pub fn align_process(args: AlignArgs) -> Result<(), std::io::Error> {
    let AlignArgs {
        reference,
        input_key,
        output_bucket,
        output_key,
        options,
    } = args;
    let (config, storage) = parse_align_options(options)?;

    let mut report = RunReport::new();
    align_and_record(&storage, &config, &reference, &input_key, &output_bucket, &output_key, &mut report);
    report.into_result("align")
}

/// Sub-program for aligning every FASTQ file under a prefix. Every file is
/// attempted even if some fail.
pub fn align_batch_process(args: AlignBatchArgs) -> Result<(), std::io::Error> {
    let AlignBatchArgs {
        reference,
        output_bucket,
        input_prefix,
        output_prefix,
        options,
    } = args;
    let (config, storage) = parse_align_options(options)?;

    let report = align_all(&storage, &config, &reference, &input_prefix, &output_bucket, &output_prefix)?;
    for line in report.render().lines() {
        info!("{line}");
    }
    report.into_result("align-batch")
}

/// Aligns every `.fastq` object under `input_prefix` in the input bucket.
///
/// ## Errors
///
/// Only a failure to list the inputs is returned; failures of single files are
/// recorded in the report.
pub(crate) fn align_all<S>(
    storage: &S, config: &AlignConfig, reference: &str, input_prefix: &str, output_bucket: &str, output_prefix: &str,
) -> Result<RunReport, StorageError>
where
    S: ObjectStorage + ?Sized, {
    let keys = list_with_suffix(storage, &config.input_bucket, input_prefix, READS_SUFFIX)?;
    info!(
        "Found {count} file(s) to align under s3://{bucket}/{input_prefix}",
        count = keys.len(),
        bucket = config.input_bucket
    );

    let mut report = RunReport::new();
    for key in keys {
        align_and_record(storage, config, reference, &key, output_bucket, output_prefix, &mut report);
    }
    Ok(report)
}

fn align_and_record<S>(
    storage: &S, config: &AlignConfig, reference: &str, input_key: &str, output_bucket: &str, output_prefix: &str,
    report: &mut RunReport,
) where
    S: ObjectStorage + ?Sized, {
    let source = ObjectRef::new(&config.input_bucket, input_key);

    match align_reads(storage, config, reference, input_key, output_bucket, output_prefix) {
        Ok(destination) => {
            info!("Alignment of {source} saved to {destination}");
            report.record(source, OutcomeStatus::Aligned { destination });
        }
        Err(e) => {
            error!("Failed to align {source}: {e}");
            report.record(source, OutcomeStatus::Failed { reason: e.to_string() });
        }
    }
}

/// Aligns one read file against `reference` and uploads the BAM file to
/// `<output_prefix>/<stem>_aligned.bam` in `output_bucket`.
///
/// All files are staged in a fresh temporary directory which is removed on
/// return, so concurrent invocations never share paths.
pub(crate) fn align_reads<S>(
    storage: &S, config: &AlignConfig, reference: &str, input_key: &str, output_bucket: &str, output_prefix: &str,
) -> Result<ObjectRef, AlignError>
where
    S: ObjectStorage + ?Sized, {
    let staging = tempfile::Builder::new()
        .prefix("seqstage-align-")
        .tempdir()
        .map_err(AlignError::Staging)?;

    let reference_path = staging.path().join("reference.fasta");
    let reads_path = staging.path().join("reads.fastq");

    storage.download_to_file(&config.reference_object(reference), &reference_path)?;
    storage.download_to_file(&ObjectRef::new(&config.input_bucket, input_key), &reads_path)?;

    let indexed = config.tools.indexer.clone().arg(&reference_path).run()?;
    debug!("Indexing {reference} finished with {status}", status = indexed.status);

    let bam_name = aligned_name(input_key);
    let bam_path = staging.path().join(&bam_name);
    let aligned = config
        .tools
        .mapper
        .clone()
        .arg(&reference_path)
        .arg(&reads_path)
        .run_piped(&config.tools.converter, &bam_path)?;
    if !aligned.stderr.trim().is_empty() {
        debug!("Conversion of {input_key} reported:\n{stderr}", stderr = aligned.stderr.trim());
    }

    let destination = ObjectRef::new(output_bucket, join_key(output_prefix, &bam_name));
    storage.upload_from_file(&destination, &bam_path, None)?;
    Ok(destination)
}
