use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Any length prefix above this is treated as corruption rather than allocated.
const MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

/// Length prefix plus CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Encode one commit record as `[len][bincode][crc32]` and return the bytes
/// written. Records replay would refuse are refused here too.
fn encode_record(writer: &mut impl Write, events: &[Event], limit: usize) -> io::Result<u64> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > limit {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "commit record too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn EOF.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of committed transactions.
///
/// Each record holds every event of one transaction, so replay applies a
/// transaction entirely or not at all.
///
/// Format per record: `[u32: len][bincode: Vec<Event>][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last record (crash mid-write) is discarded via length prefix + CRC,
///   and `recover` cuts it off before new records are appended.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    durable_len: u64,
    pending_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
    record_limit: usize,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            pending_appends: 0,
            appends_since_compact: 0,
            record_limit: MAX_RECORD_BYTES,
        })
    }

    /// Replay the log, truncate anything after the last intact record and
    /// open it for appends. New records always land where replay reaches them.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Vec<Event>>)> {
        let (records, intact_len) = read_records(path)?;
        match fs::metadata(path) {
            Ok(meta) if meta.len() > intact_len => {
                warn!(
                    "truncating {} bytes of torn WAL tail in {}",
                    meta.len() - intact_len,
                    path.display()
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(intact_len)?;
                file.sync_all()?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok((Self::open(path)?, records))
    }

    /// Append one record and fsync. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.append_buffered(events)?;
        self.flush_sync()
    }

    /// Buffer one record without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, events: &[Event]) -> io::Result<()> {
        self.pending_len += encode_record(&mut self.writer, events, self.record_limit)?;
        self.pending_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.appends_since_compact += self.pending_appends;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Throw away every record since the last successful `flush_sync`,
    /// buffered or already written, so the file ends at a record boundary.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (stale, _unflushed) = stale.into_parts();
        stale.set_len(self.durable_len)?;
        stale.sync_all()?;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_record_limit(&mut self, limit: usize) {
        self.record_limit = limit;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the snapshot records to a temp file beside the log and fsync.
    pub fn write_compact_file(path: &Path, records: &[Vec<Event>]) -> io::Result<()> {
        let file = File::create(Self::compact_tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            encode_record(&mut writer, record, MAX_RECORD_BYTES)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_len = 0;
        self.pending_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay every intact record. Replay stops at the first torn or corrupt
    /// record; everything after it is ignored.
    pub fn replay(path: &Path) -> io::Result<Vec<Vec<Event>>> {
        read_records(path).map(|(records, _)| records)
    }
}

/// Every intact record, plus the byte length they span from the start of
/// the file.
fn read_records(path: &Path) -> io::Result<(Vec<Vec<Event>>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut intact_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_BYTES {
            break;
        }
        let mut payload = vec![0u8; len];
        if !read_or_eof(&mut reader, &mut payload)? {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if !read_or_eof(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        match bincode::deserialize::<Vec<Event>>(&payload) {
            Ok(events) => records.push(events),
            Err(_) => break,
        }
        intact_len += len as u64 + FRAME_OVERHEAD;
    }

    Ok((records, intact_len))
}
