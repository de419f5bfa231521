//! Step log
//!
//! Append-only NDJSON file with an in-memory index keyed by epoch
//! milliseconds. Every insert appends one line; replaying the file on open
//! rebuilds the index, and a later line for the same key replaces the
//! earlier one, which gives insert-or-replace semantics without rewriting
//! the file.
//!
//! All range operations use the half-open convention `(from, to]`.

use crate::error::TrackerError;
use crate::types::Step;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

/// File name of the step log inside the data directory
pub const STEP_LOG_FILE: &str = "steps.ndjson";

/// Buffered insert notifications per watcher before it falls back to a re-query
const WRITE_NOTIFY_CAPACITY: usize = 256;

/// Durable, range-queryable record of steps
pub struct StepLog {
    index: RwLock<BTreeMap<i64, Step>>,
    file: Mutex<Option<Appender<File>>>,
    path: Option<PathBuf>,
    writes: broadcast::Sender<i64>,
}

impl StepLog {
    /// Open (or create) the log at `path` and replay it into memory
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let index = if path.exists() {
            replay(&path)?
        } else {
            BTreeMap::new()
        };
        log::debug!("opened step log {} ({} steps)", path.display(), index.len());

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        terminate_last_line(&mut file)?;
        let (writes, _) = broadcast::channel(WRITE_NOTIFY_CAPACITY);

        Ok(Self {
            index: RwLock::new(index),
            file: Mutex::new(Some(Appender::new(file))),
            path: Some(path),
            writes,
        })
    }

    /// Log kept only in memory
    pub fn in_memory() -> Self {
        let (writes, _) = broadcast::channel(WRITE_NOTIFY_CAPACITY);
        Self {
            index: RwLock::new(BTreeMap::new()),
            file: Mutex::new(None),
            path: None,
            writes,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a step, replacing any step with the same millisecond instant
    pub fn insert(&self, step: Step) -> Result<(), TrackerError> {
        let key = step.key();

        // The writer stays locked until the index is updated so file order
        // and index order agree for concurrent writes to the same key
        let mut file = self
            .file
            .lock()
            .map_err(|_| TrackerError::Storage("step log writer poisoned".to_string()))?;
        if let Some(file) = file.as_mut() {
            let mut line = serde_json::to_string(&step)?;
            line.push('\n');
            file.append(line.as_bytes())?;
        }

        {
            let mut index = self
                .index
                .write()
                .map_err(|_| TrackerError::Storage("step log index poisoned".to_string()))?;
            index.insert(key, step);
        }
        drop(file);

        // No watchers is fine
        let _ = self.writes.send(key);
        Ok(())
    }

    /// Steps with `from < instant <= to`, oldest first
    pub fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Step> {
        let Some(bounds) = key_bounds(from, to) else {
            return Vec::new();
        };
        self.read_index(|index| index.range(bounds).map(|(_, step)| step.clone()).collect())
    }

    /// Number of steps with `from < instant <= to`
    pub fn count(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
        let Some(bounds) = key_bounds(from, to) else {
            return 0;
        };
        self.read_index(|index| index.range(bounds).count() as u64)
    }

    /// Live view of [`StepLog::query`] over a fixed range
    pub fn watch(self: &Arc<Self>, from: DateTime<Utc>, to: DateTime<Utc>) -> RangeWatch<Vec<Step>> {
        RangeWatch::new(Arc::clone(self), from, to, StepLog::query)
    }

    /// Live view of [`StepLog::count`] over a fixed range
    pub fn watch_count(self: &Arc<Self>, from: DateTime<Utc>, to: DateTime<Utc>) -> RangeWatch<u64> {
        RangeWatch::new(Arc::clone(self), from, to, StepLog::count)
    }

    /// Total number of stored steps
    pub fn len(&self) -> usize {
        self.read_index(|index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent step, if any
    pub fn latest(&self) -> Option<Step> {
        self.read_index(|index| index.values().next_back().cloned())
    }

    fn read_index<R>(&self, f: impl FnOnce(&BTreeMap<i64, Step>) -> R) -> R {
        match self.index.read() {
            Ok(index) => f(&index),
            // Index updates are single inserts, so the map is still consistent
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

/// Destination for classified steps
pub trait StepSink: Send + Sync {
    fn insert(&self, step: Step) -> Result<(), TrackerError>;
}

impl StepSink for StepLog {
    fn insert(&self, step: Step) -> Result<(), TrackerError> {
        StepLog::insert(self, step)
    }
}

/// Line appender that keeps lines separate after a failed write
struct Appender<W: Write> {
    out: W,
    torn: bool,
}

impl<W: Write> Appender<W> {
    fn new(out: W) -> Self {
        Self { out, torn: false }
    }

    /// Write one complete line. After an error the partial bytes stay in the
    /// output, so the next append first closes that line off.
    fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        if self.torn {
            self.out.write_all(b"\n")?;
            self.torn = false;
        }
        let result = self.out.write_all(line).and_then(|_| self.out.flush());
        if result.is_err() {
            self.torn = true;
        }
        result
    }
}

/// Key range for `(from, to]`, or `None` when it is empty
fn key_bounds(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<(Bound<i64>, Bound<i64>)> {
    let from_ms = from.timestamp_millis();
    let to_ms = to.timestamp_millis();
    if from_ms >= to_ms {
        return None;
    }
    Some((Bound::Excluded(from_ms), Bound::Included(to_ms)))
}

/// Make sure the next append starts on its own line after a torn write
fn terminate_last_line(file: &mut File) -> Result<(), TrackerError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn replay(path: &Path) -> Result<BTreeMap<i64, Step>, TrackerError> {
    let reader = BufReader::new(File::open(path)?);
    replay_lines(reader, &path.display().to_string())
}

fn replay_lines(reader: impl BufRead, source: &str) -> Result<BTreeMap<i64, Step>, TrackerError> {
    let mut index = BTreeMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Step>(trimmed) {
            Ok(step) => {
                index.insert(step.key(), step);
            }
            Err(e) => {
                // A torn write shows up here; keep everything else
                log::warn!(
                    "skipping corrupt step log line {} in {}: {}",
                    line_num + 1,
                    source,
                    e
                );
            }
        }
    }

    Ok(index)
}

/// A range query that can be awaited for changes.
///
/// [`RangeWatch::changed`] resolves only when an insert lands inside the
/// watched range (or when notifications were missed and the range may have
/// changed), then yields the re-evaluated value.
pub struct RangeWatch<T> {
    log: Arc<StepLog>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    rx: broadcast::Receiver<i64>,
    eval: fn(&StepLog, DateTime<Utc>, DateTime<Utc>) -> T,
}

impl<T> RangeWatch<T> {
    fn new(
        log: Arc<StepLog>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        eval: fn(&StepLog, DateTime<Utc>, DateTime<Utc>) -> T,
    ) -> Self {
        let rx = log.writes.subscribe();
        Self {
            log,
            from,
            to,
            rx,
            eval,
        }
    }

    pub fn range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.from, self.to)
    }

    /// Evaluate the range now
    pub fn current(&self) -> T {
        (self.eval)(&self.log, self.from, self.to)
    }

    /// Wait for an insert affecting the range and return the new value
    pub async fn changed(&mut self) -> T {
        let from_ms = self.from.timestamp_millis();
        let to_ms = self.to.timestamp_millis();
        loop {
            match self.rx.recv().await {
                Ok(key) if key > from_ms && key <= to_ms => return self.current(),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("range watch lagged by {} inserts, re-evaluating", skipped);
                    return self.current();
                }
                Err(broadcast::error::RecvError::Closed) => return self.current(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WalkSpeed;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    fn step_at(instant: DateTime<Utc>, met: f64) -> Step {
        Step {
            instant,
            met,
            height: 170.0,
            weight: 65.0,
            speed: 1.2,
            walk_speed: WalkSpeed::Slow,
        }
    }

    #[test]
    fn test_range_is_half_open() {
        let log = StepLog::in_memory();
        let from = base();
        let to = base() + Duration::seconds(10);

        log.insert(step_at(from, 1.0)).unwrap();
        log.insert(step_at(from + Duration::milliseconds(1), 1.0)).unwrap();
        log.insert(step_at(to - Duration::milliseconds(1), 1.0)).unwrap();
        log.insert(step_at(to, 1.0)).unwrap();
        log.insert(step_at(to + Duration::milliseconds(1), 1.0)).unwrap();

        let steps = log.query(from, to);
        let instants: Vec<_> = steps.iter().map(|s| s.instant).collect();
        assert_eq!(
            instants,
            vec![from + Duration::milliseconds(1), to - Duration::milliseconds(1), to]
        );
        assert_eq!(log.count(from, to), 3);
    }

    #[test]
    fn test_count_matches_query_for_many_ranges() {
        let log = StepLog::in_memory();
        for i in 0..50 {
            log.insert(step_at(base() + Duration::milliseconds(i * 370), 2.0))
                .unwrap();
        }

        for start in (-1000..20_000).step_by(1333) {
            for width in [0, 1, 370, 999, 5_000, 30_000] {
                let from = base() + Duration::milliseconds(start);
                let to = from + Duration::milliseconds(width);
                assert_eq!(log.count(from, to), log.query(from, to).len() as u64);
            }
        }
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let log = StepLog::in_memory();
        log.insert(step_at(base(), 1.0)).unwrap();
        assert!(log.query(base(), base() - Duration::seconds(1)).is_empty());
        assert_eq!(log.count(base(), base()), 0);
    }

    #[test]
    fn test_duplicate_instant_last_write_wins() {
        let log = StepLog::in_memory();
        log.insert(step_at(base(), 1.0)).unwrap();
        log.insert(step_at(base(), 7.5)).unwrap();

        assert_eq!(log.len(), 1);
        let steps = log.query(base() - Duration::seconds(1), base());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].met, 7.5);
    }

    #[test]
    fn test_replay_restores_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STEP_LOG_FILE);

        {
            let log = StepLog::open(&path).unwrap();
            log.insert(step_at(base(), 1.0)).unwrap();
            log.insert(step_at(base() + Duration::seconds(1), 2.0)).unwrap();
            log.insert(step_at(base(), 3.0)).unwrap();
        }

        let log = StepLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);
        let steps = log.query(base() - Duration::seconds(1), base() + Duration::seconds(5));
        assert_eq!(steps[0].met, 3.0);
        assert_eq!(steps[1].met, 2.0);
        assert_eq!(log.latest().unwrap().instant, base() + Duration::seconds(1));
    }

    #[test]
    fn test_replay_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STEP_LOG_FILE);

        let good = serde_json::to_string(&step_at(base(), 1.0)).unwrap();
        fs::write(&path, format!("{}\n{{\"instant\": 12", good)).unwrap();

        let log = StepLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);

        // Appending after a torn line still produces a readable log
        log.insert(step_at(base() + Duration::seconds(2), 1.0)).unwrap();
        drop(log);
        let reopened = StepLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    /// Accepts `budget` bytes, then fails a single write
    struct ShortWriter {
        written: Vec<u8>,
        budget: Option<usize>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self.budget.take() {
                Some(0) => Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full")),
                Some(n) => {
                    let n = n.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    self.budget = Some(0);
                    Ok(n)
                }
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn line_for(step: &Step) -> Vec<u8> {
        let mut line = serde_json::to_vec(step).unwrap();
        line.push(b'\n');
        line
    }

    #[test]
    fn test_failed_append_does_not_swallow_next_step() {
        let mut appender = Appender::new(ShortWriter {
            written: Vec::new(),
            budget: None,
        });
        let first = step_at(base(), 1.0);
        let lost = step_at(base() + Duration::seconds(1), 2.0);
        let next = step_at(base() + Duration::seconds(2), 3.0);

        appender.append(&line_for(&first)).unwrap();
        appender.out.budget = Some(13);
        assert!(appender.append(&line_for(&lost)).is_err());
        appender.append(&line_for(&next)).unwrap();

        let index = replay_lines(appender.out.written.as_slice(), "test").unwrap();
        let metas: Vec<_> = index.values().map(|s| s.met).collect();
        assert_eq!(metas, vec![1.0, 3.0]);
    }

    #[test]
    fn test_failed_append_with_nothing_written_leaves_blank_line() {
        let mut appender = Appender::new(ShortWriter {
            written: Vec::new(),
            budget: Some(0),
        });
        assert!(appender.append(&line_for(&step_at(base(), 1.0))).is_err());
        appender
            .append(&line_for(&step_at(base() + Duration::seconds(1), 2.0)))
            .unwrap();

        let index = replay_lines(appender.out.written.as_slice(), "test").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_same_key_inserts_agree_with_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STEP_LOG_FILE);
        let log = Arc::new(StepLog::open(&path).unwrap());

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.insert(step_at(base(), (w * 100 + i) as f64)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let in_memory = log.latest().unwrap().met;
        drop(log);
        let reopened = StepLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.latest().unwrap().met, in_memory);
    }

    #[tokio::test]
    async fn test_watch_count_wakes_on_insert_in_range() {
        let log = Arc::new(StepLog::in_memory());
        let from = base();
        let to = base() + Duration::hours(1);
        let mut watch = log.watch_count(from, to);
        assert_eq!(watch.current(), 0);

        let writer = Arc::clone(&log);
        tokio::spawn(async move {
            // Outside the range: must not wake the watcher
            writer.insert(step_at(to + Duration::seconds(1), 1.0)).unwrap();
            writer.insert(step_at(from + Duration::minutes(5), 1.0)).unwrap();
        });

        let count = tokio::time::timeout(std::time::Duration::from_secs(1), watch.changed())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_watch_steps_sees_new_step() {
        let log = Arc::new(StepLog::in_memory());
        let mut watch = log.watch(base(), base() + Duration::hours(1));

        log.insert(step_at(base() + Duration::seconds(3), 4.0)).unwrap();

        let steps = watch.changed().await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].met, 4.0);
    }
}
