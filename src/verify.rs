//! # Chain Verification
//!
//! Re-derives every `hash` of a recorded log from the lines alone and checks
//! that each `prevHash` names its predecessor.
//!
//! A record whose `prevHash` is the genesis value opens a new segment: the
//! process restarted and began a fresh chain. The first record verified
//! also opens a segment whatever its `prevHash`, since its predecessor may
//! have been pruned by rotation or cut off by a tail window. Anywhere else a
//! signed record must link to the signed record before it; a chain never
//! resumes after an unsigned record without starting again from genesis.

use crate::event::SignedEvent;
use crate::pipeline::{compute_hash, HashAlgorithm, GENESIS_HASH};
use crate::telemetry::rotate::{list_generations, open_generation};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Where and why verification stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub source: String,
    pub line: usize,
    pub seq: Option<u64>,
    pub kind: BreakKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakKind {
    /// The line is not a telemetry record.
    Malformed(String),

    /// `prevHash` does not name the previous record.
    Unlinked { expected: String, found: String },

    /// The record was modified after it was signed.
    Tampered { expected: String, found: String },
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line)?;
        if let Some(seq) = self.seq {
            write!(f, " (seq {})", seq)?;
        }
        match &self.kind {
            BreakKind::Malformed(reason) => write!(f, ": malformed record: {}", reason),
            BreakKind::Unlinked { expected, found } => write!(
                f,
                ": prevHash {} does not match previous hash {}",
                found, expected
            ),
            BreakKind::Tampered { expected, found } => write!(
                f,
                ": hash {} does not match content (expected {})",
                found, expected
            ),
        }
    }
}

/// Outcome of verifying a sequence of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub records: u64,
    pub signed: u64,
    pub unsigned: u64,
    pub segments: u64,
    pub first_break: Option<ChainBreak>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Incremental verifier. Feed lines in write order.
#[derive(Debug)]
pub struct ChainVerifier {
    algorithm: HashAlgorithm,
    prev_hash: Option<String>,
    report: VerifyReport,
}

impl ChainVerifier {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        ChainVerifier {
            algorithm,
            prev_hash: None,
            report: VerifyReport::default(),
        }
    }

    /// Check one line. Returns `false` once the chain is broken; later
    /// lines are ignored.
    pub fn push_line(&mut self, source: &str, line_no: usize, line: &str) -> bool {
        if self.report.first_break.is_some() {
            return false;
        }
        let line = line.trim();
        if line.is_empty() {
            return true;
        }

        let record = match SignedEvent::from_json_line(line) {
            Ok(record) => record,
            Err(e) => {
                return self.fail(source, line_no, None, BreakKind::Malformed(e.to_string()));
            }
        };
        let first = self.report.records == 0;
        self.report.records += 1;
        let seq = Some(record.event.seq);

        let Some(link) = &record.link else {
            self.report.unsigned += 1;
            self.prev_hash = None;
            return true;
        };
        self.report.signed += 1;

        if link.prev_hash == GENESIS_HASH || first {
            self.report.segments += 1;
        } else {
            let expected = self.prev_hash.as_deref().unwrap_or(GENESIS_HASH);
            if expected != link.prev_hash {
                let kind = BreakKind::Unlinked {
                    expected: expected.to_string(),
                    found: link.prev_hash.clone(),
                };
                return self.fail(source, line_no, seq, kind);
            }
        }

        let expected = match compute_hash(self.algorithm, &link.prev_hash, &record.event) {
            Ok(hash) => hash,
            Err(e) => {
                return self.fail(source, line_no, seq, BreakKind::Malformed(e.to_string()));
            }
        };
        if expected != link.hash {
            let kind = BreakKind::Tampered {
                expected,
                found: link.hash.clone(),
            };
            return self.fail(source, line_no, seq, kind);
        }

        self.prev_hash = Some(link.hash.clone());
        true
    }

    fn fail(&mut self, source: &str, line: usize, seq: Option<u64>, kind: BreakKind) -> bool {
        self.report.first_break = Some(ChainBreak {
            source: source.to_string(),
            line,
            seq,
            kind,
        });
        false
    }

    pub fn finish(self) -> VerifyReport {
        self.report
    }
}

/// Verify in-memory lines.
pub fn verify_lines<'a>(
    algorithm: HashAlgorithm,
    lines: impl IntoIterator<Item = &'a str>,
) -> VerifyReport {
    let mut verifier = ChainVerifier::new(algorithm);
    for (i, line) in lines.into_iter().enumerate() {
        if !verifier.push_line("<input>", i + 1, line) {
            break;
        }
    }
    verifier.finish()
}

/// The active file, preceded by its rotated generations (oldest first)
/// when `include_rotated` is set.
pub fn log_files(path: &Path, include_rotated: bool) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if include_rotated {
        files.extend(list_generations(path)?.into_iter().rev().map(|g| g.path));
    }
    if path.exists() {
        files.push(path.to_path_buf());
    }
    Ok(files)
}

/// Verify `files` in order as one continuous log. With `tail`, only the
/// last `tail` lines are checked.
pub fn verify_files(
    algorithm: HashAlgorithm,
    files: &[PathBuf],
    tail: Option<usize>,
) -> io::Result<VerifyReport> {
    let mut verifier = ChainVerifier::new(algorithm);

    match tail {
        None => {
            for file in files {
                let source = file.display().to_string();
                let reader = BufReader::new(open_generation(file)?);
                for (i, line) in reader.lines().enumerate() {
                    if !verifier.push_line(&source, i + 1, &line?) {
                        return Ok(verifier.finish());
                    }
                }
            }
        }
        Some(limit) => {
            let mut window: VecDeque<(usize, usize, String)> = VecDeque::with_capacity(limit);
            for (file_idx, file) in files.iter().enumerate() {
                let reader = BufReader::new(open_generation(file)?);
                for (i, line) in reader.lines().enumerate() {
                    if limit == 0 {
                        break;
                    }
                    if window.len() == limit {
                        window.pop_front();
                    }
                    window.push_back((file_idx, i + 1, line?));
                }
            }
            for (file_idx, line_no, line) in window {
                let source = files[file_idx].display().to_string();
                if !verifier.push_line(&source, line_no, &line) {
                    break;
                }
            }
        }
    }

    Ok(verifier.finish())
}
