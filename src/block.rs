//! Block layer
//!
//! File content lives in fixed-size blocks keyed by `(ino, block_index)`.
//! A missing row is a hole and reads back as zeros; a stored row may be
//! shorter than the block size, in which case the remainder of the block
//! also reads as zeros. Writes only materialise the blocks they touch, so
//! skipped regions stay holes.

use crate::error::Result;
use crate::inode::{self, Inode};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

fn get_block(conn: &Connection, ino: u64, index: u64) -> Result<Option<Vec<u8>>> {
    let data = conn
        .query_row(
            "SELECT data FROM blocks WHERE ino = ?1 AND block_index = ?2",
            params![ino as i64, index as i64],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(data)
}

fn put_block(tx: &Transaction<'_>, ino: u64, index: u64, data: &[u8]) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO blocks (ino, block_index, data) VALUES (?1, ?2, ?3)",
        params![ino as i64, index as i64, data],
    )?;
    Ok(())
}

/// Read up to `len` bytes at `offset`, clamped to the file size.
///
/// Takes a plain connection so positional reads can run outside a write
/// transaction; a `Transaction` derefs to `Connection` and works too.
pub fn read_at(
    conn: &Connection,
    block_size: u32,
    ino: u64,
    size: u64,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    if offset >= size || len == 0 {
        return Ok(Vec::new());
    }
    let bs = block_size as u64;
    let end = size.min(offset + len as u64);
    let first = offset / bs;
    let last = (end - 1) / bs;

    let mut assembled = Vec::with_capacity(((last - first + 1) * bs) as usize);
    for index in first..=last {
        match get_block(conn, ino, index)? {
            Some(data) => {
                assembled.extend_from_slice(&data);
                // Short rows read back zero-padded to the block width.
                assembled.resize(((index - first + 1) * bs) as usize, 0);
            }
            None => assembled.resize(((index - first + 1) * bs) as usize, 0),
        }
    }

    let skip = (offset - first * bs) as usize;
    let take = (end - offset) as usize;
    Ok(assembled[skip..skip + take].to_vec())
}

/// Write `data` at `offset`, read-modify-writing each touched block.
///
/// Touched blocks are stored at full width except the final block of the
/// file, which is stored at its real length. Updates size, mtime and
/// ctime on the inode row.
pub fn write_at(
    tx: &Transaction<'_>,
    block_size: u32,
    inode: &mut Inode,
    offset: u64,
    data: &[u8],
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let bs = block_size as u64;
    let end = offset + data.len() as u64;
    let new_size = inode.size.max(end);

    let first = offset / bs;
    let last = (end - 1) / bs;
    for index in first..=last {
        let block_start = index * bs;
        let stored_len = (new_size - block_start).min(bs) as usize;

        let mut block = get_block(tx, inode.ino, index)?.unwrap_or_default();
        block.resize(stored_len, 0);

        let seg_start = offset.max(block_start);
        let seg_end = end.min(block_start + bs);
        let dst = (seg_start - block_start) as usize;
        let src = (seg_start - offset) as usize;
        let n = (seg_end - seg_start) as usize;
        block[dst..dst + n].copy_from_slice(&data[src..src + n]);

        put_block(tx, inode.ino, index, &block)?;
    }

    inode.size = new_size;
    let now = inode::unix_now();
    inode.mtime = now;
    inode.ctime = now;
    inode::store(tx, inode)
}

/// Change the file length.
///
/// Shrinking deletes the blocks past the new end and trims a retained
/// final block. Growing extends the file as a hole; no blocks are
/// materialised.
pub fn truncate(
    tx: &Transaction<'_>,
    block_size: u32,
    inode: &mut Inode,
    new_size: u64,
) -> Result<()> {
    let bs = block_size as u64;
    if new_size < inode.size {
        let boundary = new_size.div_ceil(bs);
        tx.execute(
            "DELETE FROM blocks WHERE ino = ?1 AND block_index >= ?2",
            params![inode.ino as i64, boundary as i64],
        )?;
        if new_size % bs != 0 {
            let index = new_size / bs;
            let keep = (new_size - index * bs) as usize;
            if let Some(data) = get_block(tx, inode.ino, index)? {
                if data.len() > keep {
                    put_block(tx, inode.ino, index, &data[..keep])?;
                }
            }
        }
    }

    inode.size = new_size;
    let now = inode::unix_now();
    inode.mtime = now;
    inode.ctime = now;
    inode::store(tx, inode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeKind;
    use crate::schema::{self, mode};
    use crate::store::Store;

    const BS: u32 = 4096;

    async fn fresh_file() -> (Store, Inode) {
        let store = Store::open_in_memory().await.unwrap();
        let inode = store
            .with_tx(|tx| {
                schema::migrate(tx, None)?;
                inode::allocate(tx, InodeKind::Regular, mode::DEFAULT_FILE_MODE)
            })
            .await
            .unwrap();
        (store, inode)
    }

    async fn stored_blocks(store: &Store, ino: u64) -> Vec<i64> {
        store
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT block_index FROM blocks WHERE ino = ?1 ORDER BY block_index",
                )?;
                let rows = stmt
                    .query_map(params![ino as i64], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sparse_writes_leave_holes() {
        let (store, mut inode) = fresh_file().await;
        store
            .with_tx(|tx| {
                write_at(tx, BS, &mut inode, 0, &[b'A'; 4096])?;
                write_at(tx, BS, &mut inode, 12288, &[b'B'; 4096])?;
                write_at(tx, BS, &mut inode, 20480, &[b'C'; 4096])?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(inode.size, 24576);

        // Blocks 1, 2 and 4 were never written and must not exist.
        assert_eq!(stored_blocks(&store, inode.ino).await, vec![0, 3, 5]);

        let data = store
            .with_conn(|conn| read_at(conn, BS, inode.ino, inode.size, 0, 24576))
            .await
            .unwrap();
        assert_eq!(&data[..4096], &[b'A'; 4096][..]);
        assert_eq!(&data[4096..12288], &[0u8; 8192][..]);
        assert_eq!(&data[12288..16384], &[b'B'; 4096][..]);
        assert_eq!(&data[16384..20480], &[0u8; 4096][..]);
        assert_eq!(&data[20480..], &[b'C'; 4096][..]);
    }

    #[tokio::test]
    async fn unaligned_write_spans_blocks() {
        let (store, mut inode) = fresh_file().await;
        store
            .with_tx(|tx| write_at(tx, BS, &mut inode, 4000, &[b'x'; 200]))
            .await
            .unwrap();
        assert_eq!(inode.size, 4200);

        let data = store
            .with_conn(|conn| read_at(conn, BS, inode.ino, inode.size, 3990, 220))
            .await
            .unwrap();
        assert_eq!(&data[..10], &[0u8; 10][..]);
        assert_eq!(&data[10..210], &[b'x'; 200][..]);
        assert_eq!(&data[210..], &[0u8; 10][..]);
    }

    #[tokio::test]
    async fn read_clamps_to_size() {
        let (store, mut inode) = fresh_file().await;
        store
            .with_tx(|tx| write_at(tx, BS, &mut inode, 0, b"hello"))
            .await
            .unwrap();

        let data = store
            .with_conn(|conn| read_at(conn, BS, inode.ino, inode.size, 3, 100))
            .await
            .unwrap();
        assert_eq!(data, b"lo");
        let past_end = store
            .with_conn(|conn| read_at(conn, BS, inode.ino, inode.size, 10, 5))
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn truncate_shrinks_and_grows() {
        let (store, mut inode) = fresh_file().await;
        store
            .with_tx(|tx| write_at(tx, BS, &mut inode, 0, &[b'z'; 10000]))
            .await
            .unwrap();

        store
            .with_tx(|tx| truncate(tx, BS, &mut inode, 5000))
            .await
            .unwrap();
        assert_eq!(inode.size, 5000);
        assert_eq!(stored_blocks(&store, inode.ino).await, vec![0, 1]);
        let data = store
            .with_conn(|conn| read_at(conn, BS, inode.ino, inode.size, 4990, 100))
            .await
            .unwrap();
        assert_eq!(data, [b'z'; 10].to_vec());

        // Growing extends as a hole: no new blocks, zeros past the old end.
        store
            .with_tx(|tx| truncate(tx, BS, &mut inode, 20000))
            .await
            .unwrap();
        assert_eq!(inode.size, 20000);
        assert_eq!(stored_blocks(&store, inode.ino).await, vec![0, 1]);
        let tail = store
            .with_conn(|conn| read_at(conn, BS, inode.ino, inode.size, 19000, 1000))
            .await
            .unwrap();
        assert_eq!(tail, vec![0u8; 1000]);
    }
}
