/// Read counts from quality filtering a single FASTQ input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FastQMetadata {
    pub(crate) total_count:     usize,
    pub(crate) passed_qc_count: usize,
    pub(crate) malformed_count: usize,
}

impl FastQMetadata {
    pub(crate) fn new() -> Self {
        FastQMetadata {
            total_count:     0,
            passed_qc_count: 0,
            malformed_count: 0,
        }
    }

    #[inline]
    pub(crate) fn record_pass(&mut self) {
        self.total_count += 1;
        self.passed_qc_count += 1;
    }

    #[inline]
    pub(crate) fn record_fail(&mut self) {
        self.total_count += 1;
    }

    /// Malformed reads count towards the failures.
    #[inline]
    pub(crate) fn record_malformed(&mut self) {
        self.total_count += 1;
        self.malformed_count += 1;
    }

    #[inline]
    pub(crate) fn failed_qc_count(&self) -> usize {
        self.total_count - self.passed_qc_count
    }

    /// Percentage of reads passing QC, or `0.0` when there were no reads.
    #[inline]
    pub(crate) fn passed_percentage(&self) -> f64 {
        percentage(self.passed_qc_count, self.total_count)
    }

    /// Percentage of reads failing QC, or `0.0` when there were no reads.
    #[inline]
    pub(crate) fn failed_percentage(&self) -> f64 {
        percentage(self.failed_qc_count(), self.total_count)
    }

    pub(crate) fn merge(mut self, other: Self) -> Self {
        self.total_count += other.total_count;
        self.passed_qc_count += other.passed_qc_count;
        self.malformed_count += other.malformed_count;
        self
    }
}

#[inline]
fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_percentages() {
        let mut metadata = FastQMetadata::new();
        for _ in 0..7 {
            metadata.record_pass();
        }
        for _ in 0..2 {
            metadata.record_fail();
        }
        metadata.record_malformed();

        assert_eq!(metadata.total_count, 10);
        assert_eq!(metadata.failed_qc_count(), 3);
        assert_eq!(format!("{:.2}", metadata.passed_percentage()), "70.00");
        assert_eq!(format!("{:.2}", metadata.failed_percentage()), "30.00");
    }

    #[test]
    fn test_no_reads() {
        let metadata = FastQMetadata::new();
        assert_eq!(metadata.passed_percentage(), 0.0);
        assert_eq!(metadata.failed_percentage(), 0.0);
    }

    #[test]
    fn test_merge() {
        let mut a = FastQMetadata::new();
        a.record_pass();
        a.record_malformed();
        let mut b = FastQMetadata::new();
        b.record_fail();

        let merged = a.merge(b);
        assert_eq!(merged.total_count, 3);
        assert_eq!(merged.passed_qc_count, 1);
        assert_eq!(merged.malformed_count, 1);
        assert_eq!(merged.failed_qc_count(), 2);
    }
}
