use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one frame's payload. Larger frames are never written, and a
/// length header above it is reported as corruption on replay.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Events per frame when the log is rewritten by compaction.
const COMPACT_CHUNK_EVENTS: usize = 1024;

/// Encode one committed transaction as `[len][bincode][crc32]`.
fn encode_frame(writer: &mut impl Write, events: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "transaction frame too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read the next frame. `Ok(None)` means clean end of log or a torn/corrupt tail.
/// A length header beyond `MAX_FRAME_LEN` is an `InvalidData` error.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<Event>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds the {MAX_FRAME_LEN} byte limit"),
        ));
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut crc_buf = [0u8; 4];
    match reader.read_exact(&mut crc_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    Ok(bincode::deserialize::<Vec<Event>>(&payload).ok())
}

/// Append-only transaction log.
///
/// Each entry is one committed transaction: `[u32: len][bincode: Vec<Event>][u32: crc32]`.
/// Replay stops at the first torn or corrupt frame, so a transaction is recovered
/// whole or not at all.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    frames_since_compact: u64,
    /// Set after any write or sync error. The tail may hold a partial frame,
    /// so nothing may be appended behind it.
    failed: bool,
}

impl Wal {
    /// Open (or create) the log at `path`. `replayed_frames` is the number of
    /// frames already on disk and seeds the compaction counter.
    pub fn open(path: &Path, replayed_frames: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            frames_since_compact: replayed_frames,
            failed: false,
        })
    }

    /// Append and fsync a single transaction. Tests only; the writer task
    /// batches with `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.append_buffered(events)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, events: &[Event]) -> io::Result<()> {
        self.check_healthy()?;
        if let Err(e) = encode_frame(&mut self.writer, events) {
            self.failed = true;
            return Err(e);
        }
        self.frames_since_compact += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_healthy()?;
        let result = self.writer.flush().and_then(|()| self.writer.get_ref().sync_all());
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn check_healthy(&self) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other("log is in a failed state after an earlier write error"));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_since_compact(&self) -> u64 {
        self.frames_since_compact
    }

    /// Rewrite the log as `events`, in frames of at most `COMPACT_CHUNK_EVENTS`.
    /// Writes a temp file, fsyncs, then renames it over the log and reopens,
    /// so the rewrite is all-or-nothing regardless of the frame count.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for chunk in events.chunks(COMPACT_CHUNK_EVENTS) {
                encode_frame(&mut writer, chunk)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.frames_since_compact = 0;
        Ok(())
    }

    /// Replay the log, returning every event of every intact frame in commit order.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::replay_frames(path)?.into_iter().flatten().collect())
    }

    /// Replay the log frame by frame.
    pub fn replay_frames(path: &Path) -> io::Result<Vec<Vec<Event>>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut frames = Vec::new();
        while let Some(frame) = read_frame(&mut reader)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
