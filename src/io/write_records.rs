//! Provides the [`WriteRecord`] and [`WriteRecords`] traits for writing FASTQ
//! records, or iterators of them, to any [`Write`] sink.
//!
//! Records are serialized through their [`Display`] implementation, which
//! emits the four-line FASTQ form including the trailing newline. Writing to a
//! `Vec<u8>` yields an in-memory FASTQ file suitable for uploading.
//!
//! [`Display`]: std::fmt::Display

use std::io::Write;
use zoe::prelude::FastQ;

/// A trait providing the ability for a record to write itself to `W`.
pub trait WriteRecord<W> {
    fn write_record(self, writer: &mut W) -> std::io::Result<()>;
}

impl<W: Write> WriteRecord<W> for FastQ {
    #[inline]
    fn write_record(self, writer: &mut W) -> std::io::Result<()> {
        write!(writer, "{self}")
    }
}

impl<W: Write> WriteRecord<W> for &FastQ {
    #[inline]
    fn write_record(self, writer: &mut W) -> std::io::Result<()> {
        write!(writer, "{self}")
    }
}

/// An extension trait for iterators allowing all of their records to be written
/// to a writer `W`, which is flushed afterwards.
pub trait WriteRecords<W> {
    fn write_records(self, writer: &mut W) -> std::io::Result<()>;
}

impl<I, W> WriteRecords<W> for I
where
    I: Iterator<Item: WriteRecord<W>>,
    W: Write,
{
    #[inline]
    fn write_records(mut self, writer: &mut W) -> std::io::Result<()> {
        self.try_for_each(|record| record.write_record(writer))?;
        writer.flush()
    }
}
