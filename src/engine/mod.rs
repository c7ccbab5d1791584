mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::is_bookable;
pub use conflict::{ConflictReport, overlapping_active};
pub use error::{BookingError, ConstraintViolation, EntityKind, ErrorKind, StoreError, TransientReason};

use std::io;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use ulid::Ulid;

use crate::config::Config;
use crate::model::Event;
use crate::snapshot::Snapshot;
use crate::wal::Wal;

use store::EntityStore;

// ── Group-commit log writer ──────────────────────────────

pub(crate) enum WalCommand {
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    FramesSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingFrame = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the log and batches commits.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>, log: tracing::Span) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch: Vec<PendingFrame> = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, batch);

                if let Some(other) = deferred {
                    handle_command(&mut wal, other, &log);
                }
            }
            other => handle_command(&mut wal, other, &log),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingFrame>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingFrame]) -> io::Result<()> {
    let mut append_err = None;
    for (events, _) in batch {
        if let Err(e) = wal.append_buffered(events) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingFrame>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_command(wal: &mut Wal, cmd: WalCommand, log: &tracing::Span) {
    match cmd {
        WalCommand::Append { events, response } => commit_batch(wal, vec![(events, response)]),
        WalCommand::Compact { response } => {
            let _ = response.send(compact_in_place(wal, log));
        }
        WalCommand::FramesSinceCompact { response } => {
            let _ = response.send(wal.frames_since_compact());
        }
    }
}

/// Fold the log on disk and rewrite it as the minimal equivalent event set.
/// Runs on the writer task, so no append can interleave.
fn compact_in_place(wal: &mut Wal, log: &tracing::Span) -> io::Result<()> {
    wal.flush_sync()?;
    let events = Wal::replay(wal.path())?;
    let before = events.len();
    let compacted = Snapshot::fold(events).into_events();
    let after = compacted.len();
    wal.compact(&compacted)?;
    info!(parent: log, before, after, "log compacted");
    Ok(())
}

/// Sending half of the writer task.
#[derive(Clone)]
pub(crate) struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    /// Durably append one transaction. Returns once the frame is fsynced.
    pub(crate) async fn append(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| StoreError::WriterUnavailable)?;
        rx.await.map_err(|_| StoreError::WriterUnavailable)??;
        Ok(())
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::WriterUnavailable)?;
        rx.await.map_err(|_| StoreError::WriterUnavailable)??;
        Ok(())
    }

    async fn frames_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WalCommand::FramesSinceCompact { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The booking core: entity store plus the availability, conflict, transaction
/// and query operations layered on it.
pub struct Engine {
    pub(crate) store: EntityStore,
    wal: WalHandle,
    /// Monotonic within the process, so id order matches creation order.
    ids: std::sync::Mutex<ulid::Generator>,
    /// Logging handle; every engine event is emitted under this span.
    log: tracing::Span,
}

impl Engine {
    /// Replay the log under `config.data_dir`, rebuild the store and start the
    /// writer task. Must be called from inside a tokio runtime.
    pub fn open(config: &Config, log: tracing::Span) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.wal_path();
        let frames = Wal::replay_frames(&path)?;
        let replayed_frames = frames.len() as u64;
        let events: Vec<Event> = frames.into_iter().flatten().collect();
        let replayed = events.len();
        let wal = Wal::open(&path, replayed_frames)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx, log.clone()));
        let wal = WalHandle { tx };

        let snapshot = Snapshot::fold(events);
        info!(
            parent: &log,
            replayed,
            replayed_frames,
            users = snapshot.users.len(),
            resources = snapshot.resources.len(),
            time_slots = snapshot.slots.len(),
            bookings = snapshot.bookings.len(),
            "state recovered"
        );
        let store = EntityStore::from_snapshot(snapshot, wal.clone(), config.lock_timeout, log.clone());

        Ok(Self { store, wal, ids: std::sync::Mutex::new(ulid::Generator::new()), log })
    }

    pub(crate) fn next_id(&self) -> Ulid {
        match self.ids.lock() {
            Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        }
    }

    /// Rewrite the log as the minimal event set for the current state.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        if let Err(e) = self.wal.compact().await {
            error!(parent: &self.log, error = %e, "log compaction failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Committed transactions since the last compaction.
    pub async fn wal_frames_since_compact(&self) -> u64 {
        self.wal.frames_since_compact().await
    }
}
