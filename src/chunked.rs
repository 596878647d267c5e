//! Chunked transfer API: the UI fetches large request/response dumps in
//! fixed-size slices instead of one multi-megabyte payload.
//!
//! Grounded on `storage/transaction_store.rs`'s metadata/detail split (a
//! cheap summary call plus a separate on-demand body fetch) — generalized
//! here from "fetch the whole body once" to "fetch it in windows".

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks of `DEFAULT_CHUNK_SIZE` needed to cover `len` bytes.
/// `0` bytes still needs one (empty) chunk so callers can treat "no body"
/// and "empty body" alike.
pub fn chunk_count(len: usize) -> usize {
    if len == 0 {
        return 1;
    }
    len.div_ceil(DEFAULT_CHUNK_SIZE)
}

/// A requested chunk of a request or response dump, windowed and rendered
/// as lossy UTF-8 (U+FFFD for invalid sequences, same as the rest of the
/// printable-body pipeline in `crate::http`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub data: String,
    pub total_chunks: usize,
    pub is_complete: bool,
    pub total_size: usize,
}

/// Which side of a transaction a chunk request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Request,
    Response,
}

/// Slice `dump` into `index`'s window and render it. `index` is clamped to
/// the last available chunk rather than erroring — the metadata call
/// already told the caller how many chunks exist.
pub fn get_chunk(dump: &[u8], index: usize) -> ChunkPayload {
    let total_size = dump.len();
    let total_chunks = chunk_count(total_size);
    let index = index.min(total_chunks.saturating_sub(1));

    let start = (index * DEFAULT_CHUNK_SIZE).min(total_size);
    let end = (start + DEFAULT_CHUNK_SIZE).min(total_size);
    let slice = &dump[start..end];

    ChunkPayload {
        data: String::from_utf8_lossy(slice).into_owned(),
        total_chunks,
        is_complete: index + 1 >= total_chunks,
        total_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dump_has_one_empty_chunk() {
        assert_eq!(chunk_count(0), 1);
        let chunk = get_chunk(b"", 0);
        assert_eq!(chunk.data, "");
        assert!(chunk.is_complete);
        assert_eq!(chunk.total_chunks, 1);
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(DEFAULT_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(DEFAULT_CHUNK_SIZE + 1), 2);
    }

    #[test]
    fn get_chunk_windows_correctly_and_marks_completion() {
        let dump = vec![b'a'; DEFAULT_CHUNK_SIZE + 10];
        let first = get_chunk(&dump, 0);
        assert_eq!(first.data.len(), DEFAULT_CHUNK_SIZE);
        assert!(!first.is_complete);

        let second = get_chunk(&dump, 1);
        assert_eq!(second.data.len(), 10);
        assert!(second.is_complete);
    }

    #[test]
    fn out_of_range_index_clamps_to_last_chunk() {
        let dump = vec![b'z'; 5];
        let chunk = get_chunk(&dump, 99);
        assert!(chunk.is_complete);
        assert_eq!(chunk.data, "zzzzz");
    }

    #[test]
    fn lossy_utf8_replaces_invalid_sequences() {
        let dump = vec![0xff, 0xfe, b'a'];
        let chunk = get_chunk(&dump, 0);
        assert!(chunk.data.ends_with('a'));
        assert!(chunk.data.contains('\u{FFFD}'));
    }
}
