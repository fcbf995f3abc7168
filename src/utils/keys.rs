//! Naming rules for storage keys and local staging files.

/// Suffix of the raw, gzip compressed read files consumed by preprocessing.
pub(crate) const COMPRESSED_READS_SUFFIX: &str = ".fastq.gz";
/// Suffix of the read files consumed by alignment.
pub(crate) const READS_SUFFIX: &str = ".fastq";

const PREPROCESSED_SUFFIX: &str = "_preprocessed.fastq";
const ALIGNED_SUFFIX: &str = "_aligned.bam";

/// The last `/`-separated segment of a key.
#[inline]
pub(crate) fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// The local staging filename for a downloaded compressed object: its last
/// segment without the `.gz` extension.
#[inline]
pub(crate) fn staging_name(key: &str) -> &str {
    let name = file_name(key);
    name.strip_suffix(".gz").unwrap_or(name)
}

/// The last segment of a key up to its first `.`.
#[inline]
pub(crate) fn read_stem(key: &str) -> &str {
    file_name(key).split('.').next().unwrap_or_default()
}

/// Joins a key prefix and a name with exactly one `/`. An empty prefix yields
/// the name unchanged.
pub(crate) fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Maps a raw read key to the key of its preprocessed output: the input prefix
/// is swapped for the output prefix and the compressed suffix for
/// `_preprocessed.fastq`.
///
/// Only a leading input prefix and a trailing suffix are replaced; keys lacking
/// either keep that part as-is.
pub(crate) fn preprocessed_key(key: &str, input_prefix: &str, output_prefix: &str) -> String {
    let rest = key.strip_prefix(input_prefix).unwrap_or(key);
    let base = rest.strip_suffix(COMPRESSED_READS_SUFFIX).unwrap_or(rest);
    format!("{output_prefix}{base}{PREPROCESSED_SUFFIX}")
}

/// The filename of the BAM produced for a read file.
#[inline]
pub(crate) fn aligned_name(input_key: &str) -> String {
    format!("{}{ALIGNED_SUFFIX}", read_stem(input_key))
}
