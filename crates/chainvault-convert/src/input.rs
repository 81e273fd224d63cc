//! Input preparation: transparent gzip decompression and BOM stripping

use flate2::read::MultiGzDecoder;
use std::io::{BufRead, BufReader, Read};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const UTF8_BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

/// Wrap `reader` so that gzip input is decompressed and a UTF-8 BOM is skipped
pub fn prepare<R: Read + 'static>(reader: R) -> std::io::Result<Box<dyn BufRead>> {
    let mut buffered = BufReader::new(reader);

    let mut decoded: Box<dyn BufRead> = if starts_with(&mut buffered, &GZIP_MAGIC)? {
        debug!("Gzip magic detected, decompressing input");
        Box::new(BufReader::new(MultiGzDecoder::new(buffered)))
    } else {
        Box::new(buffered)
    };

    if starts_with(&mut decoded, &UTF8_BOM)? {
        decoded.consume(UTF8_BOM.len());
    }

    Ok(decoded)
}

/// Whether the buffered input begins with `prefix`, without consuming it
fn starts_with<B: BufRead + ?Sized>(reader: &mut B, prefix: &[u8]) -> std::io::Result<bool> {
    Ok(reader.fill_buf()?.starts_with(prefix))
}
