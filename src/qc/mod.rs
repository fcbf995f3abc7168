pub(crate) mod fastq;
pub(crate) mod fastq_metadata;
