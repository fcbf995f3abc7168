use crate::qc::fastq_metadata::FastQMetadata;
use log::warn;
use std::{error::Error, fmt, io::ErrorKind};
use zoe::prelude::FastQ;

/// Offset of the Sanger/Illumina 1.8+ quality encoding.
const PHRED_OFFSET: u8 = b'!';
const PHRED_MAX: u8 = b'~';

/// Reasons a read's quality string cannot be scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityError {
    Empty,
    LengthMismatch { sequence: usize, quality: usize },
    InvalidScore { position: usize, byte: u8 },
}

impl fmt::Display for QualityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QualityError::Empty => write!(f, "the quality string is empty"),
            QualityError::LengthMismatch { sequence, quality } => write!(
                f,
                "the sequence has {sequence} bases but the quality string has {quality} scores"
            ),
            QualityError::InvalidScore { position, byte } => write!(
                f,
                "the quality byte {byte:#04x} at position {position} is not a valid Phred+33 score"
            ),
        }
    }
}

impl Error for QualityError {}

/// The arithmetic mean of a Phred+33 encoded quality string.
///
/// ## Errors
///
/// Empty strings and bytes outside `!`..=`~` are rejected.
pub(crate) fn mean_phred(quality: &[u8]) -> Result<f64, QualityError> {
    if quality.is_empty() {
        return Err(QualityError::Empty);
    }

    let mut total = 0u64;
    for (position, &byte) in quality.iter().enumerate() {
        if !(PHRED_OFFSET..=PHRED_MAX).contains(&byte) {
            return Err(QualityError::InvalidScore { position, byte });
        }
        total += u64::from(byte - PHRED_OFFSET);
    }

    Ok(total as f64 / quality.len() as f64)
}

pub(crate) trait ReadQuality {
    /// The mean Phred score of the read.
    fn mean_quality(&self) -> Result<f64, QualityError>;

    /// Whether the mean Phred score reaches `min_read_quality`.
    #[inline]
    fn is_high_quality(&self, min_read_quality: u8) -> Result<bool, QualityError> {
        self.mean_quality().map(|q| q >= f64::from(min_read_quality))
    }
}

impl ReadQuality for FastQ {
    #[inline]
    fn mean_quality(&self) -> Result<f64, QualityError> {
        let quality = self.quality.as_bytes();
        if quality.len() != self.sequence.len() {
            return Err(QualityError::LengthMismatch {
                sequence: self.sequence.len(),
                quality:  quality.len(),
            });
        }
        mean_phred(quality)
    }
}

/// The reads passing the quality threshold, along with counts for the whole
/// input.
#[derive(Debug)]
pub(crate) struct PartitionedReads {
    pub(crate) high_quality: Vec<FastQ>,
    pub(crate) metadata:     FastQMetadata,
}

/// Splits reads by mean quality, keeping those at or above
/// `min_read_quality`.
///
/// A read that cannot be scored is logged and counted as low quality. This
/// includes records the reader rejects as invalid data, such as a quality line
/// whose length differs from the sequence. Other errors from `records` are
/// propagated, since the remainder of the input cannot be trusted.
pub(crate) fn partition_reads<I, E>(records: I, min_read_quality: u8) -> std::io::Result<PartitionedReads>
where
    I: IntoIterator<Item = Result<FastQ, E>>,
    E: Into<std::io::Error>, {
    let mut high_quality = Vec::new();
    let mut metadata = FastQMetadata::new();

    for (index, record) in records.into_iter().enumerate() {
        let record = match record.map_err(Into::<std::io::Error>::into) {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!("Treating record {number} as low quality: {e}", number = index + 1);
                metadata.record_malformed();
                continue;
            }
            Err(e) => return Err(e),
        };

        match record.is_high_quality(min_read_quality) {
            Ok(true) => {
                metadata.record_pass();
                high_quality.push(record);
            }
            Ok(false) => metadata.record_fail(),
            Err(e) => {
                warn!("Treating read '{header}' as low quality: {e}", header = record.header);
                metadata.record_malformed();
            }
        }
    }

    Ok(PartitionedReads { high_quality, metadata })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::parse_fastq;

    static MEANS: [(&[u8], f64); 5] = [
        (b"IIII", 40.0),
        (b"++++", 10.0),
        (b"5555", 20.0),
        (b"!~", 46.5),
        (b"I+", 25.0),
    ];

    #[test]
    fn test_mean_phred() {
        for (quality, expected) in MEANS {
            assert_eq!(mean_phred(quality), Ok(expected));
        }
    }

    #[test]
    fn test_malformed_quality() {
        assert_eq!(mean_phred(b""), Err(QualityError::Empty));
        assert_eq!(
            mean_phred(b"II II"),
            Err(QualityError::InvalidScore { position: 2, byte: b' ' })
        );
        assert_eq!(
            mean_phred(b"II\x7f"),
            Err(QualityError::InvalidScore { position: 2, byte: 0x7f })
        );
    }

    #[test]
    fn test_partition_threshold() {
        let fastq = "@hq\nACGT\n+\nIIII\n@edge\nACGT\n+\n5555\n@just_below\nACGT\n+\n5554\n@lq\nACGT\n+\n++++\n";
        let reads = parse_fastq(fastq.as_bytes()).unwrap();

        let PartitionedReads { high_quality, metadata } = partition_reads(reads, 20).unwrap();
        let headers = high_quality.iter().map(|r| r.header.as_str()).collect::<Vec<_>>();

        assert_eq!(headers, vec!["@hq", "@edge"]);
        assert_eq!(metadata.total_count, 4);
        assert_eq!(metadata.passed_qc_count, 2);
        assert_eq!(metadata.failed_qc_count(), 2);
    }

    #[test]
    fn test_partition_is_exact() {
        let qualities = ["IIII", "++++", "5555", "####", "IIII", "?+?+", "5+5+", "II##", "!!!!", "~~~~"];
        let mut fastq = String::new();
        for (i, q) in qualities.iter().enumerate() {
            fastq.push_str(&format!("@read{i}\nACGT\n+\n{q}\n"));
        }

        for threshold in [0, 10, 20, 30, 40, 93] {
            let expected = qualities
                .iter()
                .enumerate()
                .filter(|(_, q)| mean_phred(q.as_bytes()).unwrap() >= f64::from(threshold))
                .map(|(i, _)| format!("@read{i}"))
                .collect::<Vec<_>>();

            let partitioned = partition_reads(parse_fastq(fastq.as_bytes()).unwrap(), threshold).unwrap();
            let kept = partitioned.high_quality.iter().map(|r| r.header.clone()).collect::<Vec<_>>();

            assert_eq!(kept, expected, "threshold {threshold}");
            assert_eq!(
                partitioned.metadata.passed_qc_count + partitioned.metadata.failed_qc_count(),
                qualities.len()
            );
        }
    }

    #[test]
    fn test_partition_empty() {
        let partitioned = partition_reads(parse_fastq(&b"\n\n"[..]).unwrap(), 20).unwrap();
        assert!(partitioned.high_quality.is_empty());
        assert_eq!(partitioned.metadata.total_count, 0);
    }

    #[test]
    fn test_partition_skips_malformed_read() {
        let fastq = "@good1\nACGT\n+\nIIII\n@short_quality\nACGT\n+\nIII\n@good2\nACGT\n+\nIIII\n";
        let partitioned = partition_reads(parse_fastq(fastq.as_bytes()).unwrap(), 20).unwrap();

        let headers = partitioned.high_quality.iter().map(|r| r.header.as_str()).collect::<Vec<_>>();
        assert_eq!(headers, vec!["@good1", "@good2"]);
        assert_eq!(partitioned.metadata.total_count, 3);
        assert_eq!(partitioned.metadata.passed_qc_count, 2);
        assert_eq!(partitioned.metadata.malformed_count, 1);
    }

    #[test]
    fn test_partition_rejected_records() {
        let records: Vec<Result<FastQ, std::io::Error>> = vec![
            Err(std::io::Error::new(ErrorKind::InvalidData, "bad quality")),
            Err(std::io::Error::new(ErrorKind::InvalidData, "bad quality")),
        ];
        let partitioned = partition_reads(records, 20).unwrap();
        assert!(partitioned.high_quality.is_empty());
        assert_eq!(partitioned.metadata.total_count, 2);
        assert_eq!(partitioned.metadata.malformed_count, 2);
        assert_eq!(partitioned.metadata.failed_percentage(), 100.0);

        let records: Vec<Result<FastQ, std::io::Error>> = vec![Err(std::io::Error::other("connection reset"))];
        assert!(partition_reads(records, 20).is_err());
    }
}
