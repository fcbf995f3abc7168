use std::{
    io::{BufRead, BufReader, Read},
    iter::Flatten,
    path::Path,
};
use zoe::prelude::FastQReader;

mod readers;
mod write_records;

pub(crate) use readers::*;
pub use write_records::*;

/// The records of a FASTQ input, possibly containing none.
pub(crate) type FastQRecords<R> = Flatten<std::option::IntoIter<FastQReader<R>>>;

/// Creates an iterator over the FASTQ records in `inner`, wrapping it with a
/// buffered reader.
///
/// Input that is empty or only whitespace yields no records rather than an
/// error.
///
/// ## Errors
///
/// IO errors while peeking at the input, or an input which does not start like
/// a FASTQ file.
pub(crate) fn parse_fastq<R: Read>(inner: R) -> std::io::Result<FastQRecords<R>> {
    let mut buffer = BufReader::new(inner);

    loop {
        let start = buffer.fill_buf()?;
        if start.is_empty() {
            return Ok(None.into_iter().flatten());
        }
        match start.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(leading) => {
                buffer.consume(leading);
                break;
            }
            None => {
                let consumed = start.len();
                buffer.consume(consumed);
            }
        }
    }

    let reader = FastQReader::from_bufreader(buffer)?;
    Ok(Some(reader).into_iter().flatten())
}

pub trait MapFailedWriteExt<T> {
    fn map_failed_write<P: AsRef<Path>>(self, path: P) -> std::io::Result<T>;
}

impl<T> MapFailedWriteExt<T> for std::io::Result<T> {
    fn map_failed_write<P: AsRef<Path>>(self, path: P) -> std::io::Result<T> {
        self.map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to write {path} due to the error:\n{e}",
                    path = path.as_ref().display()
                ),
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_empty_input() {
        assert_eq!(parse_fastq(&b""[..]).unwrap().count(), 0);
        assert_eq!(parse_fastq(&b"\n  \n"[..]).unwrap().count(), 0);
        assert_eq!(parse_fastq(&b"\n@r1\nACGT\n+\nIIII\n"[..]).unwrap().count(), 1);
    }
}
