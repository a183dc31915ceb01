//! In-place path-prefix rewriting
//!
//! A cluster's path block is a zero-padded concatenation of NUL-terminated
//! strings. Mounting a pack under a directory means prepending that
//! directory to every stored path; doing it in place avoids a second buffer
//! for what is usually a load-time-only transformation.

use crate::format::{HailstormPaths, HailstormResource};

/// Total buffer size needed to hold the path block with `prefix` prepended
/// to every one of `resource_count` paths.
pub fn prefixed_resource_paths_size(
    paths_info: &HailstormPaths,
    resource_count: u32,
    prefix: &str,
) -> usize {
    paths_info.size as usize + resource_count as usize * prefix.len()
}

/// Prepend `prefix` to every resource path, rewriting `buffer` in place and
/// updating each resource's path descriptor.
///
/// `buffer` must start with the cluster's path block and be at least
/// [`prefixed_resource_paths_size`] bytes; `resources` must be the complete
/// resource list of the cluster. The rewrite walks resources from last to
/// first so the grown strings never destructively overlap their sources,
/// even though every byte moves forward.
///
/// Returns `false` when the buffer is too small or a path descriptor points
/// outside the path block, leaving `buffer` and `resources` in an
/// unspecified but memory-safe state.
pub fn prefix_resource_paths(
    paths_info: &HailstormPaths,
    resources: &mut [HailstormResource],
    buffer: &mut [u8],
    prefix: &str,
) -> bool {
    let required = prefixed_resource_paths_size(paths_info, resources.len() as u32, prefix);
    if buffer.len() < required || buffer.len() < paths_info.size as usize {
        return false;
    }
    if resources.is_empty() {
        return true;
    }

    let block = paths_info.size as usize;
    let prefix_len = prefix.len();

    // The block is zero-padded; the rewrite starts right after the last
    // path byte in use.
    let mut paths_end = block;
    while paths_end > 0 && buffer[paths_end - 1] == 0 {
        paths_end -= 1;
    }

    // Index of the NUL terminator for the resource being moved.
    let mut cursor = paths_end + resources.len() * prefix_len;
    let mut remaining = resources.len();

    for resource in resources.iter_mut().rev() {
        let size = resource.path_size as usize;
        let source = resource.path_offset as usize;
        let prefixed_size = size + prefix_len;
        if source + size > block || prefixed_size > u16::MAX as usize {
            return false;
        }
        if cursor >= buffer.len() || cursor < prefixed_size {
            return false;
        }

        buffer[cursor] = 0;
        cursor -= size;
        buffer.copy_within(source..source + size, cursor);
        cursor -= prefix_len;
        buffer[cursor..cursor + prefix_len].copy_from_slice(prefix.as_bytes());

        resource.path_offset = cursor as u32;
        resource.path_size = prefixed_size as u16;

        remaining -= 1;
        if remaining == 0 {
            // Every byte accounted for exactly when the first resource's
            // prefix landed at the block start.
            return cursor == 0;
        }
        if cursor == 0 {
            return false;
        }
        cursor -= 1;
    }

    false
}
