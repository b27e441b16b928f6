//! Persists captured emails and notifies subscribers

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, Local};
use regex::Regex;

use crate::mail::broadcast::{Broadcast, DEFAULT_BUFFER_CAPACITY, Subscription};
use crate::mail::email::Email;
use crate::mail::relay::RelayDomains;

const SUBJECT_PATTERN: &str = r"^Subject: (.*)$";

/// `yyyyMMdd.HHmmss.nnnnnnnnn`, nanosecond precision
const FILE_NAME_FORMAT: &str = "%Y%m%d.%H%M%S.%f";

/// Settings of a [`MailSaver`]
#[derive(Debug, Clone)]
pub struct SaverConfig {
    /// Directory receiving one file per email
    pub save_dir: PathBuf,
    /// File extension, without the dot
    pub suffix: String,
    /// Skip every disk write
    pub memory_mode: bool,
    pub relay_domains: RelayDomains,
    /// Per-subscriber buffer size
    pub buffer_capacity: usize,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from(crate::config::DEFAULT_OUTPUT_DIR),
            suffix: crate::config::DEFAULT_EMAIL_SUFFIX.to_owned(),
            memory_mode: false,
            relay_domains: RelayDomains::any(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Files written so far, keyed by an increasing ordinal
#[derive(Debug, Default)]
pub struct MailIndex {
    entries: BTreeMap<u64, PathBuf>,
    next_ordinal: u64,
    received: u64,
}

impl MailIndex {
    pub fn entries(&self) -> &BTreeMap<u64, PathBuf> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emails notified since the last clear, memory mode included
    pub fn received_count(&self) -> u64 {
        self.received
    }

    fn insert(&mut self, path: PathBuf) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.entries.insert(ordinal, path);
        ordinal
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.received = 0;
    }
}

/// Saves incoming emails and broadcasts them.
///
/// Saving and deleting share one lock, so a bulk delete never runs while a
/// file is being written. Records are published after that lock is
/// released, in save order.
pub struct MailSaver {
    config: SaverConfig,
    subject_pattern: Regex,
    index: Mutex<MailIndex>,
    /// Taken before `index` is released, held while publishing
    publish_order: Mutex<()>,
    publisher: Broadcast<Email>,
}

impl std::fmt::Debug for MailSaver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSaver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MailSaver {
    pub fn new(config: SaverConfig) -> Self {
        let publisher = Broadcast::new(config.buffer_capacity);
        Self {
            config,
            subject_pattern: Regex::new(SUBJECT_PATTERN).expect("valid subject pattern"),
            index: Mutex::new(MailIndex::default()),
            publish_order: Mutex::new(()),
            publisher,
        }
    }

    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    /// Filter, persist and publish one message.
    ///
    /// Returns the published record, or `None` when a recipient is outside
    /// the relay domains.
    pub fn save_email_and_notify(
        &self,
        from: String,
        to: Vec<String>,
        data: String,
    ) -> Option<Arc<Email>> {
        if !self.config.relay_domains.accepts_all(&to) {
            tracing::debug!(?to, "Destination doesn't match relay domains.");
            return None;
        }

        let subject = self.subject_of(&data);

        let mut guard = self.lock();
        let received_at = Local::now();

        let path = if self.config.memory_mode {
            None
        } else {
            match self.write_file(&data, &received_at) {
                Ok(path) => Some(path),
                Err(error) => {
                    tracing::error!(%error, dir = %self.config.save_dir.display(), "Can't save email.");
                    None
                }
            }
        };

        if let Some(path) = &path {
            guard.index.insert(path.clone());
        }
        guard.index.received += 1;

        let email = Arc::new(Email {
            received_at,
            from,
            to,
            subject,
            data,
            path,
        });

        tracing::info!(
            from = %email.from,
            subject = %email.subject,
            path = ?email.path,
            "Email received."
        );

        let order = self
            .publish_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);

        let delivered = self.publisher.publish(Arc::clone(&email));
        tracing::trace!(delivered, "Email published.");
        drop(order);

        Some(email)
    }

    /// Delete every saved email file. Does nothing in memory mode.
    pub fn delete_emails(&self) {
        self.lock().delete_emails();
    }

    /// Delete the saved files (if asked) and forget them, atomically
    pub fn clear_all(&self, delete_files: bool) {
        let mut guard = self.lock();
        if delete_files {
            guard.delete_emails();
        }
        guard.clear();
    }

    /// Take the lock shared by saving and deletion
    pub fn lock(&self) -> SaverGuard<'_> {
        SaverGuard {
            memory_mode: self.config.memory_mode,
            index: self.index.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Subscribe to emails saved from now on
    pub fn subscribe(&self) -> Subscription<Email> {
        self.publisher.subscribe()
    }

    /// Run `consumer` on its own thread for every email saved from now on
    pub fn subscribe_with<F>(&self, name: &str, consumer: F) -> io::Result<JoinHandle<()>>
    where
        F: FnMut(Arc<Email>) + Send + 'static,
    {
        self.publisher.subscribe_with(name, consumer)
    }

    /// Text of the first `Subject: ` line, or an empty string
    pub fn subject_of(&self, data: &str) -> String {
        data.lines()
            .find_map(|line| self.subject_pattern.captures(line))
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default()
    }

    fn write_file(&self, data: &str, received_at: &DateTime<Local>) -> io::Result<PathBuf> {
        let dir = &self.config.save_dir;
        fs::create_dir_all(dir)?;

        let base = received_at.format(FILE_NAME_FORMAT).to_string();
        let mut attempt = 1;
        loop {
            let path = dir.join(file_name(&base, attempt, &self.config.suffix));
            // create_new claims the name, so two writers never share a file
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_discard(file, &path, data.as_bytes())?;
                    return std::path::absolute(&path);
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(error) => return Err(error),
            }
        }
    }
}

fn file_name(base: &str, attempt: u32, suffix: &str) -> String {
    let mut name = base.to_owned();
    if attempt > 1 {
        name.push_str(&format!("_{attempt}"));
    }
    if !suffix.is_empty() {
        name.push('.');
        name.push_str(suffix);
    }
    name
}

/// Exclusive access to the saver's bookkeeping.
///
/// While held, no email is saved or published.
pub struct SaverGuard<'a> {
    memory_mode: bool,
    index: MutexGuard<'a, MailIndex>,
}

impl SaverGuard<'_> {
    pub fn index(&self) -> &MailIndex {
        &self.index
    }

    pub fn received_count(&self) -> u64 {
        self.index.received
    }

    /// Track a file as a saved email, so bulk deletion removes it too
    pub fn insert_path(&mut self, path: PathBuf) -> u64 {
        self.index.insert(path)
    }

    /// Remove every indexed file. Failures are logged per file.
    ///
    /// Never touches the filesystem in memory mode.
    pub fn delete_emails(&mut self) {
        if self.memory_mode {
            return;
        }

        for path in self.index.entries.values() {
            delete_file(path);
        }
    }

    /// Forget every indexed file and reset the received counter
    pub fn clear(&mut self) {
        self.index.clear();
    }
}

/// A file left half written is never indexed, so remove it here
fn write_or_discard<W: Write>(mut file: W, path: &Path, data: &[u8]) -> io::Result<()> {
    if let Err(error) = file.write_all(data) {
        drop(file);
        tracing::warn!(%error, path = %path.display(), "Removing partially written email.");
        delete_file(path);
        return Err(error);
    }
    Ok(())
}

fn delete_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Email file deleted."),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::error!(path = %path.display(), "Impossible to delete file.");
        }
        Err(error) => {
            tracing::error!(%error, path = %path.display(), "Impossible to delete file.");
        }
    }
}
