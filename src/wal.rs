use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes can only come from a corrupt tail.
const MAX_ENTRY_LEN: usize = 1 << 20;

/// Serialize one event as `[len][bincode][crc32]`.
fn encode_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL entry too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one entry and its encoded length. `Ok(None)` means clean end of
/// log or a torn/corrupt tail.
fn decode_entry(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let encoded_len = (len + 8) as u64;
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, encoded_len)))
}

/// `read_exact` that reports EOF as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Intact entries in append order, and the byte length they cover.
fn read_log(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, len)) = decode_entry(&mut reader)? {
        events.push(event);
        intact_len += len;
    }
    Ok((events, intact_len))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

/// Append-only reservation log.
///
/// Entry layout: `[u32 LE: payload len][bincode Event][u32 LE: crc32(payload)]`.
/// A crash mid-append leaves a torn tail, which replay drops and `open`
/// cuts off before appending again.
///
/// Appends collect in `buf` until `flush_sync`. The file never holds more
/// than `synced_len` bytes of acknowledged entries: a failed flush cuts the
/// file back to that length and drops the buffer, so an entry whose caller
/// saw an error cannot reach disk with a later batch.
pub struct Wal {
    file: File,
    buf: Vec<u8>,
    /// Entries sitting in `buf`.
    buffered: u64,
    synced_len: u64,
    /// Set when a failed flush could not be rolled back.
    poisoned: bool,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, intact_len) = read_log(path)?;
        let file = open_append(path)?;
        if file.metadata()?.len() > intact_len {
            file.set_len(intact_len)?;
        }
        Ok(Self {
            file,
            buf: Vec::new(),
            buffered: 0,
            synced_len: intact_len,
            poisoned: false,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffered append plus fsync. Tests only; the store batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an entry without writing it.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by an earlier failed flush"));
        }
        encode_entry(&mut self.buf, event)?;
        self.buffered += 1;
        Ok(())
    }

    /// Write and fsync everything buffered. On error nothing buffered
    /// survives, in memory or on disk.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by an earlier failed flush"));
        }
        let written = self
            .file
            .write_all(&self.buf)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = written {
            self.discard_unsynced();
            return Err(e);
        }
        self.synced_len += self.buf.len() as u64;
        self.appends_since_compact += self.buffered;
        self.buf.clear();
        self.buffered = 0;
        Ok(())
    }

    /// Drop buffered entries and cut the file back to the last synced
    /// length. If the cut fails the log refuses further appends.
    pub fn discard_unsynced(&mut self) {
        self.buf.clear();
        self.buffered = 0;
        if let Err(e) = self.file.set_len(self.synced_len) {
            tracing::error!("WAL rollback to {} bytes failed: {e}", self.synced_len);
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the replacement log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_entry(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = open_append(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.file = file;
        self.buf.clear();
        self.buffered = 0;
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Every intact entry, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_log(path).map(|(events, _)| events)
    }
}
