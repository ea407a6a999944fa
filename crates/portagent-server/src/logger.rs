//! Daily-rotating log sinks.
//!
//! Each non-replay agent attaches two router endpoints: a binary datalog
//! receiving full framed packets and an ASCII log receiving one line per
//! packet. Both append to `<name>.datalog` / `<name>.log` and rotate by
//! filename when the UTC date changes: the previous day's file is renamed
//! to `<file>.<YYYY_MM_DD>` and a fresh file is opened.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::{NaiveDate, Utc};
use portagent_core::EndpointHandle;
use tokio::sync::Notify;

/// Append-only file that rotates on UTC date change.
pub struct DailyFile {
    path: PathBuf,
    file: File,
    day: NaiveDate,
}

impl DailyFile {
    /// Open (or create) the sink file for appending.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file, day: Utc::now().date_naive() })
    }

    /// Append `data`, rotating first if the date has changed.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let today = Utc::now().date_naive();
        if today != self.day {
            self.rotate(today)?;
        }
        self.file.write_all(data)
    }

    fn rotate(&mut self, today: NaiveDate) -> io::Result<()> {
        self.file.flush()?;
        let dated = self.path.with_file_name(format!(
            "{}.{}",
            self.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            self.day.format("%Y_%m_%d"),
        ));
        tracing::info!(from = %self.path.display(), to = %dated.display(), "rotating log file");
        std::fs::rename(&self.path, &dated)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.day = today;
        Ok(())
    }

    #[cfg(test)]
    fn rotate_for_test(&mut self, today: NaiveDate) -> io::Result<()> {
        self.rotate(today)
    }
}

/// Spawn a sink task draining an endpoint queue into a daily file.
///
/// The returned handle is registered with the router; the task exits once
/// the handle is deregistered and the queue drains.
pub fn spawn_daily_sink(
    path: impl Into<PathBuf>,
    drained: Arc<Notify>,
) -> io::Result<EndpointHandle> {
    let mut sink = DailyFile::open(path)?;
    let (handle, mut queue) = EndpointHandle::pair(drained);
    tokio::spawn(async move {
        while let Some(data) = queue.next().await {
            let len = data.len();
            if let Err(e) = sink.write(&data) {
                tracing::error!("log sink write failed: {e}");
            }
            queue.mark_written(len);
        }
        let _ = sink.file.flush();
    });
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_the_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");

        let mut sink = DailyFile::open(&path).unwrap();
        sink.write(b"one\n").unwrap();
        sink.write(b"two\n").unwrap();
        sink.file.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn rotation_renames_with_the_previous_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.datalog");

        let mut sink = DailyFile::open(&path).unwrap();
        sink.write(b"yesterday").unwrap();

        let day = sink.day;
        let next = day.succ_opt().unwrap();
        sink.rotate_for_test(next).unwrap();
        sink.write(b"today").unwrap();
        sink.file.flush().unwrap();

        let dated = dir.path().join(format!("agent.datalog.{}", day.format("%Y_%m_%d")));
        assert_eq!(std::fs::read(dated).unwrap(), b"yesterday");
        assert_eq!(std::fs::read(&path).unwrap(), b"today");
    }
}
