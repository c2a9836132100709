use log::trace;

use super::{FileSpan, PageBacking};
use crate::{modules::block_device::BlockDeviceModule, SwapStore, VmError, PAGE_SIZE};

/// Fills the freshly allocated page `dest` with the content described by `backing`.
///
/// Pages coming from swap free their slot on success. Anything else than a
/// full read of the requested bytes is a `BackingStoreIo` error.
pub(crate) fn load_on_demand<B: BlockDeviceModule>(
    backing: &PageBacking,
    dest: &mut [u8],
    swap: &SwapStore<B>,
) -> Result<(), VmError> {
    debug_assert_eq!(dest.len(), PAGE_SIZE);

    match backing {
        PageBacking::Anonymous => {
            dest.fill(0);
            Ok(())
        }
        PageBacking::Executable(span) | PageBacking::MappedFile(span) => read_from_file(span, dest),
        PageBacking::Swap(slot) => swap.read_and_release(*slot, dest),
    }
}

fn read_from_file(span: &FileSpan, dest: &mut [u8]) -> Result<(), VmError> {
    let (data, zeros) = dest.split_at_mut(span.read_bytes);

    let read = span.file.read_at(span.offset, data);
    if read != span.read_bytes {
        trace!(
            "short read at offset {}: {} of {} bytes",
            span.offset,
            read,
            span.read_bytes
        );
        return Err(VmError::BackingStoreIo);
    }

    zeros.fill(0);
    Ok(())
}

/// Writes the file part of the page `src` back to where it came from
pub(crate) fn flush_to_file(span: &FileSpan, src: &[u8]) -> Result<(), VmError> {
    let written = span.file.write_at(span.offset, &src[..span.read_bytes]);
    if written != span.read_bytes {
        trace!(
            "short write at offset {}: {} of {} bytes",
            span.offset,
            written,
            span.read_bytes
        );
        return Err(VmError::BackingStoreIo);
    }

    Ok(())
}
