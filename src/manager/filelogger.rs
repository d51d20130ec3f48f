use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate};

/// Size at which the current day's file is rotated
pub const SIZE_THRESHOLD: u64 = 50 * 1024 * 1024;
/// Rotated files kept per day
pub const MAX_ROTATED_FILES: usize = 3;
/// Days a log file is kept
pub const MAX_AGE_DAYS: i64 = 7;

const PREFIX: &str = "app-";
const SUFFIX: &str = ".log";

/// Log writer that keeps one file per local day, `app-YYYY-MM-DD.log`,
/// switching files on the first write after midnight. A file growing past
/// the size threshold is rotated to `app-YYYY-MM-DD_HHMMSS.log`.
pub struct DailyFileLogger {
    dir: PathBuf,
    date: NaiveDate,
    file: File,
    current_size: u64,
    size_threshold: u64,
}

impl DailyFileLogger {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        Self::open(dir.into(), Local::now(), SIZE_THRESHOLD)
    }

    fn open(dir: PathBuf, now: DateTime<Local>, size_threshold: u64) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {:?}", dir))?;

        let date = now.date_naive();
        let (file, current_size) = Self::open_file(&Self::path(&dir, date))?;
        let logger = DailyFileLogger {
            dir,
            date,
            file,
            current_size,
            size_threshold,
        };
        logger.remove_expired(date)?;

        Ok(logger)
    }

    fn path(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("{}{}{}", PREFIX, date.format("%Y-%m-%d"), SUFFIX))
    }

    fn open_file(path: &Path) -> Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {:?}", path))?;

        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// Path of the file currently written to
    pub fn current_path(&self) -> PathBuf {
        Self::path(&self.dir, self.date)
    }

    fn push(&mut self, buf: &[u8], now: DateTime<Local>) -> io::Result<()> {
        let today = now.date_naive();
        if today != self.date {
            // keep writing to the old file rather than losing lines
            if let Err(err) = self.switch_date(today) {
                eprintln!("failed to switch log file to {}: {:#}", today, err);
            }
        }

        let size = buf.len() as u64;
        if self.current_size > 0 && self.current_size + size > self.size_threshold {
            if let Err(err) = self.rotate(now) {
                eprintln!("failed to rotate log file: {:#}", err);
            }
        }

        self.file.write_all(buf)?;
        self.current_size += size;
        Ok(())
    }

    fn switch_date(&mut self, date: NaiveDate) -> Result<()> {
        self.file.flush()?;
        let (file, size) = Self::open_file(&Self::path(&self.dir, date))?;
        self.file = file;
        self.current_size = size;
        self.date = date;

        self.remove_expired(date)
    }

    fn rotate(&mut self, now: DateTime<Local>) -> Result<()> {
        self.file.sync_all()?;

        let current = self.current_path();
        let stamp = now.format("%H%M%S");
        let mut rotated = self.dir.join(format!(
            "{}{}_{}{}",
            PREFIX,
            self.date.format("%Y-%m-%d"),
            stamp,
            SUFFIX
        ));
        let mut index = 1;
        while rotated.exists() {
            rotated = self.dir.join(format!(
                "{}{}_{}.{}{}",
                PREFIX,
                self.date.format("%Y-%m-%d"),
                stamp,
                index,
                SUFFIX
            ));
            index += 1;
        }

        fs::rename(&current, &rotated)
            .with_context(|| format!("failed to rename log file to {:?}", rotated))?;

        let (file, size) = Self::open_file(&current)?;
        self.file = file;
        self.current_size = size;

        self.enforce_max_rotated_files()
    }

    /// Keep only the newest rotated files of the current day
    fn enforce_max_rotated_files(&self) -> Result<()> {
        let prefix = format!("{}{}_", PREFIX, self.date.format("%Y-%m-%d"));
        let mut rotated: Vec<PathBuf> = self
            .entries()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(&prefix) && name.ends_with(SUFFIX))
            .map(|(_, path)| path)
            .collect();

        if rotated.len() <= MAX_ROTATED_FILES {
            return Ok(());
        }

        // the time stamp in the name sorts chronologically
        rotated.sort();
        for path in &rotated[..rotated.len() - MAX_ROTATED_FILES] {
            fs::remove_file(path)
                .with_context(|| format!("failed to delete rotated log file: {:?}", path))?;
        }

        Ok(())
    }

    /// Delete log files dated more than MAX_AGE_DAYS before `today`
    fn remove_expired(&self, today: NaiveDate) -> Result<()> {
        let oldest = today - Duration::days(MAX_AGE_DAYS);
        for (name, path) in self.entries()? {
            let date = match name
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.get(..10))
                .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
            {
                Some(date) if name.ends_with(SUFFIX) => date,
                _ => continue,
            };

            if date < oldest {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to delete expired log file: {:?}", path))?;
            }
        }

        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                entries.push((name.to_string(), path.clone()));
            }
        }

        Ok(entries)
    }
}

impl Write for DailyFileLogger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf, Local::now())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
