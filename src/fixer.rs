//! Background upgrade of a whole database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::UnboundedSender;

use crate::cancel::Cancellable;
use crate::chain::{self, ChainOutcome, ProgressScope};
use crate::detect::{get_version, Detection};
use crate::journal::Journal;
use crate::lock::DbLock;
use crate::registry::SchemaRegistry;
use crate::util::{dispatch_app_result, list_dirs};
use crate::version::{ProjectVersion, SchemaVersion, TrackVersion};
use crate::{AppError, AppResult};

/// Notifications sent while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixEvent {
    Log(String),
    /// Sent exactly once, after every other event of the run.
    Completed(bool),
}

struct Notifier {
    events: UnboundedSender<FixEvent>,
}

impl Notifier {
    fn log(&self, message: String) {
        tracing::info!(target: "dbfix", event = "fix_progress", message = %message);
        let _ = self.events.send(FixEvent::Log(message));
    }

    fn completed(&self, status: bool) {
        let _ = self.events.send(FixEvent::Completed(status));
    }
}

/// Upgrades every project and track under a database root on a worker thread.
pub struct Fixer {
    registry: Arc<dyn SchemaRegistry>,
    events: UnboundedSender<FixEvent>,
    use_lock: bool,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<bool>>>,
    status: Mutex<Option<bool>>,
}

impl Fixer {
    pub fn new(registry: Arc<dyn SchemaRegistry>, events: UnboundedSender<FixEvent>) -> Self {
        Self {
            registry,
            events,
            use_lock: true,
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
            status: Mutex::new(None),
        }
    }

    /// Skips the advisory database lock.
    pub fn without_lock(mut self) -> Self {
        self.use_lock = false;
        self
    }

    /// Starts the run. Only the first call does anything; it returns `true`.
    pub fn start(&self, root: impl Into<PathBuf>, cancellable: Cancellable) -> AppResult<bool> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "dbfix", event = "fix_start_ignored");
            return Ok(false);
        }

        let run = Run {
            root: root.into(),
            registry: self.registry.clone(),
            cancellable,
            use_lock: self.use_lock,
            notifier: Notifier {
                events: self.events.clone(),
            },
        };

        let handle = thread::Builder::new()
            .name("db-upgrader".into())
            .spawn(move || run.execute())
            .map_err(|err| {
                let _ = self.events.send(FixEvent::Completed(false));
                AppError::from(err).with_context("operation", "fix_spawn_worker")
            })?;

        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(true)
    }

    /// Waits for the run to finish and returns whether it succeeded.
    ///
    /// Returns `false` when no run was ever started.
    pub fn complete(&self) -> bool {
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handle {
            *status = Some(handle.join().unwrap_or(false));
        }
        status.unwrap_or(false)
    }
}

impl Drop for Fixer {
    fn drop(&mut self) {
        self.complete();
    }
}

struct Run {
    root: PathBuf,
    registry: Arc<dyn SchemaRegistry>,
    cancellable: Cancellable,
    use_lock: bool,
    notifier: Notifier,
}

impl Run {
    fn execute(self) -> bool {
        tracing::info!(target: "dbfix", event = "fix_started", root = %self.root.display());

        let result = dispatch_app_result(|| self.upgrade_database());
        let status = match result {
            Ok(()) => true,
            Err(err) => {
                if err.is_cancelled() {
                    self.notifier.log("Update cancelled".to_string());
                }
                tracing::error!(
                    target: "dbfix",
                    event = "fix_failed",
                    root = %self.root.display(),
                    code = %err.code(),
                    error = %err,
                );
                false
            }
        };

        tracing::info!(target: "dbfix", event = "fix_completed", status);
        self.notifier.completed(status);
        status
    }

    fn upgrade_database(&self) -> AppResult<()> {
        let _lock = if self.use_lock {
            Some(DbLock::acquire(&self.root).map_err(|err| {
                self.notifier
                    .log(format!("Failed to open database {}", self.root.display()));
                err
            })?)
        } else {
            None
        };

        let journal = Journal::new(self.root.clone(), self.registry.clone());
        let projects = list_dirs(&self.root)?;
        let total = projects.len() as u64;

        let _scope = ProgressScope::open(&self.cancellable);
        for (idx, project) in projects.iter().enumerate() {
            self.cancellable.set_total(idx as u64, 0, total);
            if self.cancellable.is_cancelled() {
                return Err(AppError::cancelled());
            }
            self.upgrade_project(&journal, project)?;
        }
        Ok(())
    }

    fn upgrade_project(&self, journal: &Journal, project: &str) -> AppResult<()> {
        let root = journal.root();
        if get_version::<ProjectVersion>(root, project, journal.registry()) == Detection::NotEntity {
            return Ok(());
        }

        self.notifier.log(format!("Update project {project}"));
        let tracks = list_dirs(&root.join(project))?;
        let total = tracks.len() as u64;

        let _scope = ProgressScope::open(&self.cancellable);
        for (idx, track) in tracks.iter().enumerate() {
            self.cancellable.set_total(idx as u64, 0, total);
            if self.cancellable.is_cancelled() {
                return Err(AppError::cancelled());
            }

            let entity = format!("{project}/{track}");
            let detection = get_version::<TrackVersion>(root, &entity, journal.registry());
            if detection == Detection::NotEntity || detection.is_latest() {
                continue;
            }

            self.notifier.log(format!("Update track {project}.{track}"));
            let outcome = chain::run_chain(journal, &entity, chain::track::STEPS, &self.cancellable)
                .map_err(|err| {
                    self.notifier
                        .log(format!("Failed to update {project}.{track}"));
                    err
                })?;
            log_outcome(&entity, outcome);
        }

        self.notifier.log(format!("Update parameters {project}"));
        let outcome = chain::run_chain(journal, project, chain::project::STEPS, &self.cancellable)
            .map_err(|err| {
                self.notifier
                    .log(format!("Failed to update parameters {project}"));
                err
            })?;
        log_outcome(project, outcome);
        Ok(())
    }
}

fn log_outcome<V: SchemaVersion>(entity: &str, outcome: ChainOutcome<V>) {
    if let ChainOutcome::Migrated { from, to, steps } = outcome {
        tracing::info!(
            target: "dbfix",
            event = "entity_migrated",
            kind = V::KIND.as_str(),
            entity = %entity,
            from = from.tag(),
            to = to.tag(),
            steps,
        );
    }
}

/// Runs a fixer to completion on the current thread, collecting its events.
pub fn fix_blocking(
    root: &Path,
    registry: Arc<dyn SchemaRegistry>,
    cancellable: Cancellable,
    use_lock: bool,
) -> AppResult<(bool, Vec<FixEvent>)> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut fixer = Fixer::new(registry, tx);
    if !use_lock {
        fixer = fixer.without_lock();
    }
    fixer.start(root, cancellable)?;
    let status = fixer.complete();
    drop(fixer);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    Ok((status, events))
}
