//! Extraction of package archives from [`std::io::Read`] streams.

use std::io::Read;
use std::path::Path;

use krait_digest::{HashingReader, Md5, Sha256};
use zip::read::read_zipfile_from_stream;

use super::{ExtractError, ExtractResult};

/// Returns the `.tar.bz2` stream as a decompressed [`tar::Archive`].
pub fn stream_tar_bz2(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(bzip2::read::BzDecoder::new(reader))
}

/// Returns a `.tar.zst` stream as a decompressed [`tar::Archive`].
pub(crate) fn stream_tar_zst(
    reader: impl Read,
) -> Result<tar::Archive<impl Read + Sized>, ExtractError> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

/// Extracts the contents of a `.tar.bz2` package archive.
pub fn extract_tar_bz2(
    reader: impl Read,
    destination: &Path,
) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    // Wrap the reading end in two hashers so the digests of the raw archive
    // bytes are available after extraction.
    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);

    stream_tar_bz2(&mut md5_reader).unpack(destination)?;

    // Drain any trailing bytes so the digests cover the whole file.
    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();

    Ok(ExtractResult { sha256, md5 })
}

/// Extracts the contents of a `.conda` package archive: every inner
/// `*.tar.zst` member of the outer zip is unpacked into the destination.
pub fn extract_conda(
    reader: impl Read,
    destination: &Path,
) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);

    while let Some(file) = read_zipfile_from_stream(&mut md5_reader)? {
        if file.name().ends_with(".tar.zst") {
            stream_tar_zst(file)?.unpack(destination)?;
        }
    }

    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();

    Ok(ExtractResult { sha256, md5 })
}
