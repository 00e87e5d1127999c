//! Ordered per-kind upgrade steps and the runner that walks them.

use std::path::PathBuf;

use crate::cancel::Cancellable;
use crate::detect::{get_version, Detection};
use crate::journal::Journal;
use crate::version::SchemaVersion;
use crate::{AppError, AppResult};

pub mod project;
pub mod track;

/// What a step sees of the entity it upgrades.
pub struct StepContext<'a> {
    pub journal: &'a Journal,
    /// `/`-separated entity path relative to the database root.
    pub entity: &'a str,
    pub cancellable: &'a Cancellable,
}

impl StepContext<'_> {
    /// Database-relative path of a file inside the entity.
    pub fn rel(&self, file: &str) -> String {
        format!("{}/{}", self.entity, file)
    }

    pub fn resolve(&self, file: &str) -> PathBuf {
        self.journal.resolve(&self.rel(file))
    }
}

/// One row of an upgrade table.
///
/// `apply` rewrites data; the runner then writes the schema of `target`
/// and commits the journal.
pub struct Step<V: 'static> {
    pub from: &'static [V],
    pub target: V,
    pub description: &'static str,
    pub apply: fn(&StepContext<'_>) -> AppResult<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome<V> {
    NotEntity,
    UpToDate(V),
    Migrated { from: V, to: V, steps: usize },
}

/// Pops the innermost progress scope when dropped.
pub(crate) struct ProgressScope<'a>(&'a Cancellable);

impl<'a> ProgressScope<'a> {
    pub(crate) fn open(cancellable: &'a Cancellable) -> Self {
        cancellable.push();
        Self(cancellable)
    }
}

impl Drop for ProgressScope<'_> {
    fn drop(&mut self) {
        self.0.pop();
    }
}

/// Brings `entity` to the latest generation of `V`.
///
/// Always starts by reverting whatever an interrupted run left behind.
pub fn run_chain<V: SchemaVersion>(
    journal: &Journal,
    entity: &str,
    steps: &'static [Step<V>],
    cancellable: &Cancellable,
) -> AppResult<ChainOutcome<V>> {
    let kind = V::KIND.as_str();
    journal.revert().map_err(|err| {
        AppError::new("JOURNAL/REVERT_FAILED", "Failed to roll back an interrupted update.")
            .with_context("entity", entity.to_string())
            .with_cause(err)
    })?;

    let detected = match get_version::<V>(journal.root(), entity, journal.registry()) {
        Detection::NotEntity => return Ok(ChainOutcome::NotEntity),
        Detection::Unknown { checksum } => {
            let mut err = AppError::new(AppError::UNKNOWN_VERSION, "Unknown data format version.")
                .with_context("kind", kind)
                .with_context("entity", entity.to_string());
            if let Some(sum) = checksum {
                err = err.with_context("checksum", sum);
            }
            return Err(err);
        }
        Detection::Known { version } => version,
    };

    if detected.is_latest() {
        return Ok(ChainOutcome::UpToDate(detected));
    }

    let start = steps
        .iter()
        .position(|step| step.from.contains(&detected))
        .ok_or_else(|| {
            AppError::new(AppError::UNKNOWN_VERSION, "No upgrade step for this version.")
                .with_context("kind", kind)
                .with_context("entity", entity.to_string())
                .with_context("tag", detected.tag())
        })?;

    let ctx = StepContext {
        journal,
        entity,
        cancellable,
    };
    let schema_file = ctx.rel(V::KIND.schema_file());
    let mut current = detected;
    let mut applied = 0;

    for step in &steps[start..] {
        tracing::info!(
            target: "dbfix",
            event = "migration_step",
            kind = kind,
            entity = %entity,
            from = current.tag(),
            to = step.target.tag(),
            step = step.description,
        );

        let result = (step.apply)(&ctx)
            .and_then(|_| journal.write_schema(&schema_file, step.target.tag()))
            .and_then(|_| journal.cleanup());
        if let Err(err) = result {
            tracing::error!(
                target: "dbfix",
                event = "migration_step_failed",
                kind = kind,
                entity = %entity,
                from = current.tag(),
                to = step.target.tag(),
                error = %err,
            );
            return Err(err
                .with_context("entity", entity.to_string())
                .with_context("step", step.description));
        }

        current = step.target;
        applied += 1;
    }

    Ok(ChainOutcome::Migrated {
        from: detected,
        to: current,
        steps: applied,
    })
}

#[cfg(test)]
pub(crate) fn assert_table_is_monotonic<V: SchemaVersion>(steps: &[Step<V>]) {
    let mut covered: Vec<V> = Vec::new();
    for (idx, step) in steps.iter().enumerate() {
        assert!(!step.from.is_empty(), "step {idx} has no source tags");
        for from in step.from {
            assert!(from.index() < step.target.index(), "step {idx} is not forward");
            assert!(!covered.contains(from), "tag {from:?} handled twice");
            covered.push(*from);
        }
        if let Some(next) = steps.get(idx + 1) {
            assert!(
                next.from.contains(&step.target),
                "step {idx} target is not picked up by the next step"
            );
        }
    }
    assert_eq!(steps.last().map(|s| s.target), Some(V::LATEST));
    for version in V::ALL.iter().filter(|v| !v.is_latest()) {
        assert!(covered.contains(version), "{version:?} has no step");
    }
}
