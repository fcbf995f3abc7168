use crate::io::MapFailedWriteExt;
use flate2::read::MultiGzDecoder;
use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

/// Decodes [gzip](https://www.rfc-editor.org/rfc/rfc1952#page-5) data that may
/// have multiple members into a new file at `path`, returning the number of
/// decompressed bytes.
///
/// ## Errors
///
/// Corrupt gzip data, or any IO error creating or writing the file.
pub(crate) fn decompress_to_file<R, P>(compressed: R, path: P) -> std::io::Result<u64>
where
    R: Read,
    P: AsRef<Path>, {
    let mut decoder = MultiGzDecoder::new(compressed);
    let mut writer = BufWriter::new(File::create(&path).map_failed_write(&path)?);

    let written = std::io::copy(&mut decoder, &mut writer)?;
    writer.flush().map_failed_write(&path)?;
    Ok(written)
}
