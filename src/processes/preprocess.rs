// Description:      Quality filters gzip FASTQ objects from storage by mean
//                   read quality, uploads the passing reads, and uploads a
//                   timestamped log of the run.

use crate::{
    args::{DEFAULT_BUCKET, StorageArgs},
    io::{MapFailedWriteExt, WriteRecords, decompress_to_file, parse_fastq},
    qc::{
        fastq::{PartitionedReads, partition_reads},
        fastq_metadata::FastQMetadata,
    },
    storage::{ObjectRef, ObjectStorage, TEXT_PLAIN, list_with_suffix},
    utils::{
        keys::{COMPRESSED_READS_SUFFIX, file_name, preprocessed_key, staging_name},
        report::{OutcomeStatus, RunReport},
    },
};
use clap::Args;
use log::{error, info, warn};
use std::{fs::File, path::Path};
use zoe::data::err::ResultWithErrorContext;

#[derive(Args, Debug)]
pub struct PreprocessArgs {
    #[arg(long, env = "INPUT_BUCKET_NAME", default_value = DEFAULT_BUCKET)]
    /// Bucket holding the raw gzip compressed FASTQ files.
    input_bucket: String,

    #[arg(long, env = "OUTPUT_BUCKET_NAME", default_value = DEFAULT_BUCKET)]
    /// Bucket receiving the preprocessed FASTQ files and the run log.
    output_bucket: String,

    #[arg(long, default_value = "dataset/")]
    /// Key prefix of the raw FASTQ files. Only keys under this prefix and
    /// ending in `.fastq.gz` are processed, and the prefix is replaced by the
    /// output prefix in their output keys. An empty prefix scans the whole
    /// bucket and keeps each full key under the output prefix, so
    /// `dataset/x.fastq.gz` becomes `preprocessed/dataset/x_preprocessed.fastq`.
    input_prefix: String,

    #[arg(long, default_value = "preprocessed/")]
    /// Key prefix replacing the input prefix for the preprocessed files.
    output_prefix: String,

    #[arg(short = 'T', long, default_value_t = 20)]
    /// Minimum mean Phred quality for a read to be kept.
    min_read_quality: u8,

    #[arg(short = 'L', long, default_value = "preprocessing_log.txt")]
    /// Key of the run log in the output bucket.
    log_key: String,

    #[command(flatten)]
    storage: StorageArgs,
}

#[derive(Debug)]
pub(crate) struct PreprocessConfig {
    pub(crate) input_bucket:     String,
    pub(crate) output_bucket:    String,
    pub(crate) input_prefix:     String,
    pub(crate) output_prefix:    String,
    pub(crate) min_read_quality: u8,
    pub(crate) log_key:          String,
}

/// Sub-program for quality filtering every raw FASTQ file in the input bucket.
///
/// Every file is attempted even if some fail. The run log is always uploaded,
/// and the run fails afterwards if any file did.
pub fn preprocess_process(args: PreprocessArgs) -> Result<(), std::io::Error> {
    let PreprocessArgs {
        input_bucket,
        output_bucket,
        input_prefix,
        output_prefix,
        min_read_quality,
        log_key,
        storage,
    } = args;

    let storage = storage.open()?;
    let config = PreprocessConfig {
        input_bucket,
        output_bucket,
        input_prefix,
        output_prefix,
        min_read_quality,
        log_key,
    };

    preprocess_all(&storage, &config)?.into_result("preprocess")
}

/// Preprocesses every matching object and uploads the run log, returning the
/// report of the run.
///
/// ## Errors
///
/// Only failures affecting the whole run are returned: listing the inputs,
/// creating the staging root, or uploading the log. Failures of single files
/// are recorded in the report.
pub(crate) fn preprocess_all<S>(storage: &S, config: &PreprocessConfig) -> std::io::Result<RunReport>
where
    S: ObjectStorage + ?Sized, {
    let keys = list_with_suffix(
        storage,
        &config.input_bucket,
        &config.input_prefix,
        COMPRESSED_READS_SUFFIX,
    )?;
    info!(
        "Found {count} file(s) to preprocess under s3://{bucket}/{prefix}",
        count = keys.len(),
        bucket = config.input_bucket,
        prefix = config.input_prefix
    );

    let staging = tempfile::Builder::new()
        .prefix("seqstage-preprocess-")
        .tempdir()
        .with_context("Failed to create the staging directory")?;

    let mut report = RunReport::new();
    for key in keys {
        let source = ObjectRef::new(&config.input_bucket, key);

        match stage_and_preprocess(storage, config, staging.path(), &source) {
            Ok((destination, metadata)) => {
                info!(
                    "Preprocessed data saved to {destination} ({passed} of {total} reads kept)",
                    passed = metadata.passed_qc_count,
                    total = metadata.total_count
                );
                report.record(source, OutcomeStatus::Preprocessed { destination, metadata });
            }
            Err(e) => {
                error!("Failed to preprocess {source}: {e}");
                report.record(source, OutcomeStatus::Failed { reason: e.to_string() });
            }
        }
    }

    let totals = report.total_metadata();
    info!(
        "Kept {passed} of {total} reads overall ({malformed} with malformed quality)",
        passed = totals.passed_qc_count,
        total = totals.total_count,
        malformed = totals.malformed_count
    );

    let log_object = ObjectRef::new(&config.output_bucket, &config.log_key);
    storage.put(&log_object, report.render().into_bytes(), Some(TEXT_PLAIN))?;
    info!("Run log saved to {log_object}");

    Ok(report)
}

/// Preprocesses one object inside its own directory under `staging_root`. The
/// directory and everything staged in it is removed before returning, whether
/// or not preprocessing succeeded.
fn stage_and_preprocess<S>(
    storage: &S, config: &PreprocessConfig, staging_root: &Path, source: &ObjectRef,
) -> std::io::Result<(ObjectRef, FastQMetadata)>
where
    S: ObjectStorage + ?Sized, {
    let staging = tempfile::Builder::new()
        .prefix("object-")
        .tempdir_in(staging_root)
        .with_context(format!("Failed to create a staging directory for {source}"))?;

    let result = preprocess_object(storage, config, staging.path(), source);
    if let Err(e) = staging.close() {
        warn!("Failed to remove the staged files of {source}: {e}");
    }
    result
}

/// Downloads, decompresses, filters, and uploads one raw FASTQ object,
/// returning where the passing reads were saved.
fn preprocess_object<S>(
    storage: &S, config: &PreprocessConfig, staging_dir: &Path, source: &ObjectRef,
) -> std::io::Result<(ObjectRef, FastQMetadata)>
where
    S: ObjectStorage + ?Sized, {
    let compressed = storage.get(source)?;
    info!("Loaded data from {source}");

    let staged_reads = staging_dir.join(staging_name(&source.key));
    decompress_to_file(compressed.as_slice(), &staged_reads).with_context(format!("Failed to decompress {source}"))?;

    let reader = File::open(&staged_reads).with_context(format!(
        "Failed to open the staged reads at {path:#?}",
        path = staged_reads
    ))?;
    let PartitionedReads { high_quality, metadata } = parse_fastq(reader)
        .and_then(|records| partition_reads(records, config.min_read_quality))
        .with_context(format!("Failed to parse the FASTQ records of {source}"))?;

    if metadata.total_count == 0 {
        warn!("{source} contains no reads");
    }
    if metadata.malformed_count > 0 {
        warn!(
            "{source} has {count} read(s) with malformed quality scores",
            count = metadata.malformed_count
        );
    }

    let mut buffer = Vec::new();
    high_quality.iter().write_records(&mut buffer)?;

    let destination = ObjectRef::new(
        &config.output_bucket,
        preprocessed_key(&source.key, &config.input_prefix, &config.output_prefix),
    );
    let local_output = staging_dir.join(file_name(&destination.key));
    std::fs::write(&local_output, &buffer).map_failed_write(&local_output)?;

    storage.put(&destination, buffer, Some(TEXT_PLAIN))?;
    Ok((destination, metadata))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::BucketStore;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    fn gzip(data: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn config() -> PreprocessConfig {
        PreprocessConfig {
            input_bucket:     "raw".to_string(),
            output_bucket:    "results".to_string(),
            input_prefix:     "dataset/".to_string(),
            output_prefix:    "preprocessed/".to_string(),
            min_read_quality: 20,
            log_key:          "preprocessing_log.txt".to_string(),
        }
    }

    fn ten_reads() -> String {
        let mut fastq = String::new();
        for i in 0..7 {
            fastq.push_str(&format!("@good{i}\nACGTACGT\n+\nIIII5555\n"));
        }
        for i in 0..3 {
            fastq.push_str(&format!("@poor{i}\nACGTACGT\n+\n++++5555\n"));
        }
        fastq
    }

    fn put(store: &BucketStore, bucket: &str, key: &str, data: Vec<u8>) {
        store.put(&ObjectRef::new(bucket, key), data, None).unwrap();
    }

    fn get_text(store: &BucketStore, bucket: &str, key: &str) -> String {
        String::from_utf8(store.get(&ObjectRef::new(bucket, key)).unwrap()).unwrap()
    }

    #[test]
    fn test_preprocess_filters_reads() {
        let root = tempfile::tempdir().unwrap();
        let store = BucketStore::local(root.path()).unwrap();
        put(&store, "raw", "dataset/sample.fastq.gz", gzip(&ten_reads()));
        put(&store, "raw", "dataset/notes.txt", b"not reads".to_vec());

        let report = preprocess_all(&store, &config()).unwrap();
        assert_eq!(report.failures().count(), 0);

        let output = get_text(&store, "results", "preprocessed/sample_preprocessed.fastq");
        let headers = parse_fastq(output.as_bytes())
            .unwrap()
            .map(|r| r.unwrap().header)
            .collect::<Vec<_>>();
        assert_eq!(headers.len(), 7);
        assert!(headers.iter().all(|h| h.starts_with("@good")));

        let log = get_text(&store, "results", "preprocessing_log.txt");
        assert!(log.contains("Preprocessed data saved to s3://results/preprocessed/sample_preprocessed.fastq"));
        assert!(log.contains("High quality sequences: 70.00%"));
        assert!(log.contains("Low quality sequences: 30.00%"));
        assert_eq!(log.lines().count(), 3);

        assert!(report.into_result("preprocess").is_ok());
    }

    #[test]
    fn test_preprocess_no_reads() {
        let root = tempfile::tempdir().unwrap();
        let store = BucketStore::local(root.path()).unwrap();
        put(&store, "raw", "dataset/empty.fastq.gz", gzip(""));

        let report = preprocess_all(&store, &config()).unwrap();
        assert_eq!(report.failures().count(), 0);

        assert_eq!(get_text(&store, "results", "preprocessed/empty_preprocessed.fastq"), "");
        let log = get_text(&store, "results", "preprocessing_log.txt");
        assert!(log.contains("High quality sequences: 0.00%"));
        assert!(log.contains("Low quality sequences: 0.00%"));
    }

    #[test]
    fn test_preprocess_continues_after_failure() {
        let root = tempfile::tempdir().unwrap();
        let store = BucketStore::local(root.path()).unwrap();
        put(&store, "raw", "dataset/a_broken.fastq.gz", b"definitely not gzip".to_vec());
        put(&store, "raw", "dataset/b_sample.fastq.gz", gzip(&ten_reads()));

        let report = preprocess_all(&store, &config()).unwrap();
        assert_eq!(report.failures().count(), 1);

        let output = get_text(&store, "results", "preprocessed/b_sample_preprocessed.fastq");
        assert_eq!(parse_fastq(output.as_bytes()).unwrap().count(), 7);

        let log = get_text(&store, "results", "preprocessing_log.txt");
        let lines = log.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("Failed to process s3://raw/dataset/a_broken.fastq.gz"));
        assert!(lines[2].ends_with("High quality sequences: 70.00%"));

        let error = report.into_result("preprocess").unwrap_err();
        assert!(error.to_string().contains("s3://raw/dataset/a_broken.fastq.gz"));
    }

    #[test]
    fn test_preprocess_missing_input_bucket() {
        let root = tempfile::tempdir().unwrap();
        let store = BucketStore::local(root.path()).unwrap();
        assert!(preprocess_all(&store, &config()).is_err());
    }

    #[test]
    fn test_preprocess_malformed_read_kept_going() {
        let root = tempfile::tempdir().unwrap();
        let store = BucketStore::local(root.path()).unwrap();
        let fastq = "@good1\nACGT\n+\nIIII\n@short_quality\nACGT\n+\nIII\n@good2\nACGT\n+\nIIII\n";
        put(&store, "raw", "dataset/mixed.fastq.gz", gzip(fastq));

        let report = preprocess_all(&store, &config()).unwrap();
        assert_eq!(report.failures().count(), 0);
        assert_eq!(report.total_metadata().malformed_count, 1);

        let output = get_text(&store, "results", "preprocessed/mixed_preprocessed.fastq");
        assert_eq!(parse_fastq(output.as_bytes()).unwrap().count(), 2);
        assert!(get_text(&store, "results", "preprocessing_log.txt").contains("High quality sequences: 66.67%"));
    }

    #[test]
    fn test_staging_removed_after_each_file() {
        let root = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let store = BucketStore::local(root.path()).unwrap();
        put(&store, "raw", "dataset/a_sample.fastq.gz", gzip(&ten_reads()));
        put(&store, "raw", "dataset/b_broken.fastq.gz", b"definitely not gzip".to_vec());

        let staged_entries = || std::fs::read_dir(staging.path()).unwrap().count();

        let good = ObjectRef::new("raw", "dataset/a_sample.fastq.gz");
        assert!(stage_and_preprocess(&store, &config(), staging.path(), &good).is_ok());
        assert_eq!(staged_entries(), 0);

        let broken = ObjectRef::new("raw", "dataset/b_broken.fastq.gz");
        assert!(stage_and_preprocess(&store, &config(), staging.path(), &broken).is_err());
        assert_eq!(staged_entries(), 0);

        let missing = ObjectRef::new("raw", "dataset/c_missing.fastq.gz");
        assert!(stage_and_preprocess(&store, &config(), staging.path(), &missing).is_err());
        assert_eq!(staged_entries(), 0);
    }
}
