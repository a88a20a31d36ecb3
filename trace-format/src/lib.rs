// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Per-Process Trace Artifact Format
//!
//! This crate defines the data model shared by the recording and loading
//! sides of ranktrace, together with its on-disk representation.
//!
//! Each traced process writes exactly one artifact per run, named
//! `trace_rank_<rank>`, into a run directory all processes agreed on before
//! tracing started. The artifact is line-oriented text:
//!
//! ```text
//! <reference-time-value>            first line: reference time, declared unit
//! <name> <start> <end> [<peer>...]  one line per event, peers space-separated
//! ```
//!
//! `start` and `end` are signed offsets from the process's reference time.
//! The reference time itself is the only cross-process comparable value in
//! the file; the loader subtracts reference times to place all processes on
//! one timeline.
//!
//! A companion `manifest.toml` in the same directory, written once per run,
//! declares the timestamp unit and how many rank artifacts a complete run
//! contains. The loader treats a missing rank artifact as an error rather
//! than a smaller run.
//!
//! Artifacts are published atomically: content is serialized to a `.tmp`
//! sibling and renamed into place, so a reader never observes a partial
//! write.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A process's unique integer identity within one run.
pub type Rank = i32;

/// File name of the per-run metadata record.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Naming convention shared by the writer and the loader.
pub fn artifact_name(rank: Rank) -> String {
    format!("trace_rank_{rank}")
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("missing trace artifact for rank {rank} in {}", dir.display())]
    MissingTrace { rank: Rank, dir: PathBuf },

    #[error("trace artifact {} has no reference time line", path.display())]
    EmptyTrace { path: PathBuf },

    #[error("cannot parse {}:{line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("cannot write trace artifact {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("run manifest error in {}: {reason}", dir.display())]
    Manifest { dir: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;

/// Unit of the timestamp values stored in a run's artifacts.
///
/// The writer always declares [`TimeUnit::Microseconds`]; the loader accepts
/// any declared unit and normalizes values to microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Convert a value in this unit to microseconds. Nanosecond values
    /// truncate toward zero.
    pub fn to_micros(self, value: i64) -> i64 {
        match self {
            TimeUnit::Seconds => value * 1_000_000,
            TimeUnit::Milliseconds => value * 1_000,
            TimeUnit::Microseconds => value,
            TimeUnit::Nanoseconds => value / 1_000,
        }
    }
}

/// Per-run metadata record, written by the designated process only.
///
/// `ranks` tells the loader exactly which artifacts a complete run contains;
/// `unit` applies to every timestamp in every artifact of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub ranks: usize,
    pub unit: TimeUnit,
}

impl RunManifest {
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let content = toml::to_string(self).map_err(|e| FormatError::Manifest {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, content.as_bytes())
            .map_err(|source| FormatError::Write { path, source })
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path).map_err(|e| FormatError::Manifest {
            dir: dir.to_path_buf(),
            reason: format!("cannot read {MANIFEST_FILE}: {e}"),
        })?;
        toml::from_str(&content).map_err(|e| FormatError::Manifest {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// One intercepted communication call.
///
/// Created immediately before delegating to the real primitive, timestamped
/// again immediately after, immutable once appended to a [`ProcessTrace`].
/// `peers` holds the ranks this event communicates with, recorded on the
/// initiating side only; the receiving side is reconstructed offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub name: String,
    pub start: i64,
    pub end: i64,
    pub peers: Vec<Rank>,
}

/// One process's full record for a run.
///
/// `events` is append-only; insertion order is temporal order on that
/// process. `reference_micros` is the wall instant designated as this
/// process's zero point, in microseconds of the run's declared unit domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTrace {
    pub rank: Rank,
    pub reference_micros: i64,
    pub events: Vec<TraceEvent>,
}

impl ProcessTrace {
    pub fn new(rank: Rank, reference_micros: i64) -> Self {
        ProcessTrace {
            rank,
            reference_micros,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    /// Serialize this trace into `dir` under the shared naming convention.
    ///
    /// The artifact is written to a temporary sibling and renamed into
    /// place, so concurrent readers never observe a partial file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(artifact_name(self.rank));

        let mut content = String::new();
        content.push_str(&format!("{}\n", self.reference_micros));
        for event in &self.events {
            content.push_str(&format!("{} {} {}", event.name, event.start, event.end));
            for peer in &event.peers {
                content.push_str(&format!(" {peer}"));
            }
            content.push('\n');
        }

        write_atomic(&path, content.as_bytes()).map_err(|source| FormatError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Parse the artifact for `rank` from `dir`, normalizing timestamps
    /// from the declared `unit` to microseconds.
    pub fn read_from(dir: &Path, rank: Rank, unit: TimeUnit) -> Result<Self> {
        let path = dir.join(artifact_name(rank));
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FormatError::MissingTrace {
                    rank,
                    dir: dir.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let reference_line = match lines.next() {
            Some(line) => line?,
            None => return Err(FormatError::EmptyTrace { path }),
        };
        let reference_micros = unit.to_micros(parse_i64(&reference_line, &path, 1)?);

        let mut trace = ProcessTrace::new(rank, reference_micros);
        for (index, line) in lines.enumerate() {
            let line = line?;
            let number = index + 2;
            trace.push(parse_event(&line, &path, number, unit)?);
        }
        Ok(trace)
    }
}

fn parse_event(line: &str, path: &Path, number: usize, unit: TimeUnit) -> Result<TraceEvent> {
    let mut fields = line.split_whitespace();
    let name = fields.next().ok_or_else(|| FormatError::Parse {
        path: path.to_path_buf(),
        line: number,
        reason: "missing event name".to_string(),
    })?;
    let start = match fields.next() {
        Some(field) => unit.to_micros(parse_i64(field, path, number)?),
        None => {
            return Err(FormatError::Parse {
                path: path.to_path_buf(),
                line: number,
                reason: "missing start timestamp".to_string(),
            })
        }
    };
    let end = match fields.next() {
        Some(field) => unit.to_micros(parse_i64(field, path, number)?),
        None => {
            return Err(FormatError::Parse {
                path: path.to_path_buf(),
                line: number,
                reason: "missing end timestamp".to_string(),
            })
        }
    };

    let mut peers = Vec::new();
    for field in fields {
        peers.push(parse_i64(field, path, number)? as Rank);
    }

    Ok(TraceEvent {
        name: name.to_string(),
        start,
        end,
        peers,
    })
}

fn parse_i64(field: &str, path: &Path, number: usize) -> Result<i64> {
    field.trim().parse().map_err(|_| FormatError::Parse {
        path: path.to_path_buf(),
        line: number,
        reason: format!("expected integer, got {field:?}"),
    })
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}
