//! Count-based pruning of backup generations.
//!
//! Generations are ranked newest first, with rank 0 always held by the one
//! this run just produced. Every generation with a rank greater than the
//! retention count is removed, so `Keep(r)` leaves `r + 1` generations.

use crate::backup::function_path;
use crate::backup::outcome::RunOutcome;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::run::Cancellation;
use chrono::{DateTime, Utc};
use function_name::named;
use itertools::Itertools;
use serde::de::{Error as DeError, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Reverse;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub static UNLIMITED: &str = "unlimited";
pub static DEFAULT_RETENTION: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    Unlimited,
    Keep(usize),
}

impl Default for Retention {
    fn default() -> Self {
        Self::Keep(DEFAULT_RETENTION)
    }
}

impl Display for Retention {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Retention::Unlimited => f.write_str(UNLIMITED),
            Retention::Keep(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for Retention {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Retention::Unlimited => serializer.serialize_str(UNLIMITED),
            Retention::Keep(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

struct RetentionVisitor;

impl Visitor<'_> for RetentionVisitor {
    type Value = Retention;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        write!(formatter, "a non-negative integer or {UNLIMITED:?}")
    }

    fn visit_u64<E: DeError>(self, v: u64) -> std::result::Result<Self::Value, E> {
        usize::try_from(v)
            .map(Retention::Keep)
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E: DeError>(self, v: i64) -> std::result::Result<Self::Value, E> {
        u64::try_from(v)
            .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
            .and_then(|v| self.visit_u64(v))
    }

    fn visit_str<E: DeError>(self, v: &str) -> std::result::Result<Self::Value, E> {
        if v.eq_ignore_ascii_case(UNLIMITED) {
            return Ok(Retention::Unlimited);
        }
        v.parse::<u64>()
            .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            .and_then(|v| self.visit_u64(v))
    }
}

impl<'de> Deserialize<'de> for Retention {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(RetentionVisitor)
    }
}

/// One dated output directory of a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Immediate child directories of `host_root`, unordered.
pub fn list_generations(host_root: &Path) -> Result<Vec<Generation>> {
    let mut generations = Vec::new();
    for entry in std::fs::read_dir(host_root)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            generations.push(Generation {
                path: entry.path(),
                modified: metadata.modified()?.into(),
            });
        }
    }
    Ok(generations)
}

/// Generations ranked beyond `retention`, newest first ordering.
///
/// `active` is ranked first whatever its timestamp. Equal timestamps are
/// ordered by path, descending, which keeps the result deterministic for
/// date-named directories.
pub fn select_expired(
    generations: Vec<Generation>,
    active: &Path,
    retention: Retention,
) -> Vec<Generation> {
    let Retention::Keep(keep) = retention else {
        return vec![];
    };
    generations
        .into_iter()
        .sorted_by_key(|g| {
            (
                g.path != active,
                Reverse(g.modified),
                Reverse(g.path.clone()),
            )
        })
        .skip(keep.saturating_add(1))
        .collect()
}

/// Deletes expired generations under `host_root`.
///
/// A listing failure is recorded and leaves every generation in place. A
/// failure to delete one generation is recorded and the others still go.
#[named]
pub fn apply_retention(
    host_root: &Path,
    active: &Path,
    retention: Retention,
    outcome: &mut RunOutcome,
    cancel: &Cancellation,
) -> Result<()> {
    if retention == Retention::Unlimited {
        tracing::info!("Retention is unlimited, keeping every generation");
        return Ok(());
    }

    let generations = match list_generations(host_root) {
        Ok(generations) => generations,
        Err(e) => {
            outcome.record_error(
                e.add_msg(format!("Cannot list generations in {:?}", host_root))
                    .add_fn_name(function_path!()),
            );
            return Ok(());
        }
    };

    let expired = select_expired(generations, active, retention);
    tracing::info!(
        "Retention {}: removing {} generation(s)",
        retention,
        expired.len()
    );
    for generation in expired {
        cancel.check()?;
        match std::fs::remove_dir_all(&generation.path) {
            Ok(_) => tracing::info!(status = "ok", "Removed generation {:?}", generation.path),
            Err(e) => outcome.record_error(
                Error::from(e)
                    .add_msg(format!("Cannot remove generation {:?}", generation.path))
                    .add_fn_name(function_path!()),
            ),
        }
    }
    Ok(())
}
