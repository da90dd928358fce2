//! Queue lifecycle: locates or creates the directory-listing file, resolves
//! the roll scheme, and hands out tailers and an append entry point.

use crate::appender::Appender;
use crate::dirlisting::DirListing;
use crate::error::{ChronicleError, Result};
use crate::tailer::{DEFAULT_PATCH_CYCLES, Tailer};
use crate::{Decoder, Encoder};
use chronicle_roll::RollScheme;
use chronicle_wire::WireVisitor;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Metadata filename used by pre-v5 (v4) queues.
const V4_LISTING_FILENAME: &str = "directory-listing.cq4t";
/// Metadata filename used by v5 queues — the name this crate writes by
/// default, and the name §6 requires for byte compatibility.
const V5_LISTING_FILENAME: &str = "metadata.cq4t";

const DEFAULT_ROLL_SCHEME: &str = "FAST_HOURLY";

fn listing_filename(version: u32) -> &'static str {
    if version >= 5 { V5_LISTING_FILENAME } else { V4_LISTING_FILENAME }
}

/// Infers the on-disk version from whichever metadata file is already
/// present, defaulting to the version this crate writes for a brand new
/// queue directory.
fn detect_version(dir: &Path) -> u32 {
    if dir.join(V5_LISTING_FILENAME).exists() {
        5
    } else if dir.join(V4_LISTING_FILENAME).exists() {
        4
    } else {
        crate::QUEUE_VERSION
    }
}

#[derive(Default)]
struct RollSchemeVisitor {
    last_field: Option<String>,
    roll_scheme: Option<String>,
}

impl WireVisitor for RollSchemeVisitor {
    fn field_name(&mut self, name: &str) {
        self.last_field = Some(name.to_string());
    }

    fn text(&mut self, v: &str) {
        if self.last_field.as_deref() == Some("rollScheme") {
            self.roll_scheme = Some(v.to_string());
        }
    }
}

/// Recovers the roll scheme of an existing queue with no explicit
/// `.roll_scheme(...)` configured, by reading the `rollScheme` text field out
/// of the header metadata record at the start of its earliest cycle file
/// (written by every cycle file on creation; see `appender::cycle_header_bytes`).
fn detect_roll_scheme(dir: &Path) -> Result<Option<&'static RollScheme>> {
    let mut cycle_files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "cq4"))
            .collect(),
        Err(_) => return Ok(None),
    };
    cycle_files.sort();
    let Some(first) = cycle_files.into_iter().next() else {
        return Ok(None);
    };

    let mut file = std::fs::File::open(&first).map_err(|source| ChronicleError::CycleFileIo {
        path: first.clone(),
        source,
    })?;
    let mut buf = vec![0u8; 512];
    let n = file.read(&mut buf).map_err(|source| ChronicleError::CycleFileIo {
        path: first.clone(),
        source,
    })?;
    buf.truncate(n);

    let mut visitor = RollSchemeVisitor::default();
    chronicle_wire::parse(&buf, &mut visitor)?;
    Ok(visitor.roll_scheme.as_deref().and_then(chronicle_roll::lookup))
}

pub struct QueueBuilder {
    dir: PathBuf,
    roll_scheme: Option<String>,
    version: Option<u32>,
    create: bool,
    patch_cycles: i64,
}

impl QueueBuilder {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            roll_scheme: None,
            version: None,
            create: true,
            patch_cycles: DEFAULT_PATCH_CYCLES,
        }
    }

    pub fn roll_scheme(mut self, name: &str) -> Self {
        self.roll_scheme = Some(name.to_string());
        self
    }

    /// Pins the on-disk queue version (4 or 5) instead of auto-detecting it
    /// from whichever metadata filename already exists in the directory.
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether to create the queue directory and directory-listing file if
    /// they do not already exist. Defaults to `true`.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn patch_cycles(mut self, patch_cycles: i64) -> Self {
        self.patch_cycles = patch_cycles;
        self
    }

    pub fn open(self) -> Result<Queue> {
        if !self.dir.exists() {
            if !self.create {
                return Err(ChronicleError::DirectoryMissing(self.dir));
            }
            std::fs::create_dir_all(&self.dir).map_err(|source| ChronicleError::CycleFileIo {
                path: self.dir.clone(),
                source,
            })?;
        }

        let version = self.version.unwrap_or_else(|| detect_version(&self.dir));

        let roll = match &self.roll_scheme {
            Some(name) => chronicle_roll::lookup(name)
                .ok_or_else(|| ChronicleError::UnknownRollScheme(name.clone()))?,
            None => detect_roll_scheme(&self.dir)?
                .unwrap_or_else(|| chronicle_roll::lookup(DEFAULT_ROLL_SCHEME).unwrap()),
        };

        let listing_path = self.dir.join(listing_filename(version));
        let dirlisting = if listing_path.exists() {
            DirListing::open(&listing_path)?
        } else if self.create {
            DirListing::create(&listing_path)?
        } else {
            return Err(ChronicleError::DirectoryMissing(listing_path));
        };

        info!(dir = %self.dir.display(), roll = roll.name, version, "opened queue");
        Ok(Queue {
            dir: self.dir,
            roll,
            dirlisting,
            patch_cycles: self.patch_cycles,
            version,
            closed: false,
        })
    }
}

pub struct Queue {
    dir: PathBuf,
    roll: &'static RollScheme,
    dirlisting: DirListing,
    patch_cycles: i64,
    version: u32,
    closed: bool,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("dir", &self.dir)
            .field("roll", &self.roll.name)
            .field("version", &self.version)
            .field("highest_cycle", &self.dirlisting.highest_cycle())
            .field("lowest_cycle", &self.dirlisting.lowest_cycle())
            .finish()
    }
}

impl Queue {
    pub fn builder(dir: impl AsRef<Path>) -> QueueBuilder {
        QueueBuilder::new(dir)
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Appends `payload` to the cycle file for the current wall-clock time,
    /// returning its index.
    pub fn append<E: Encoder>(&self, payload: E) -> Result<u64> {
        self.append_ts(payload, Self::now_ms())
    }

    /// Appends `payload` to the cycle file that `wall_ms` (milliseconds since
    /// the Unix epoch) falls into, returning its index. Lets a caller drive
    /// deterministic cycle selection instead of relying on the system clock.
    ///
    /// If `wall_ms` resolves to a cycle past the queue's previous highest
    /// cycle, the previous cycle's file is patched with an EOF marker once
    /// this append has already landed in the new cycle — never
    /// speculatively, so a writer that turns out not to roll never leaves a
    /// premature EOF behind.
    pub fn append_ts<E: Encoder>(&self, payload: E, wall_ms: i64) -> Result<u64> {
        if self.closed {
            return Err(ChronicleError::AlreadyClosed);
        }
        let cycle = self.roll.cycle_for_millis(wall_ms);
        let previous_highest = self.dirlisting.highest_cycle();

        let mut appender = Appender::open(&self.dir, self.roll, &self.dirlisting, cycle, self.version)?;
        let index = appender.append(payload)?;

        if let Some(previous) = previous_highest {
            if cycle > previous {
                if let Ok(mut old) =
                    Appender::open(&self.dir, self.roll, &self.dirlisting, previous, self.version)
                {
                    let _ = old.write_eof_marker();
                }
            }
        }

        Ok(index)
    }

    /// Returns a tailer positioned at the queue's lowest known cycle.
    pub fn tailer(&self) -> Result<Tailer<'_>> {
        if self.closed {
            return Err(ChronicleError::AlreadyClosed);
        }
        Ok(
            Tailer::from_start(&self.dir, self.roll, &self.dirlisting, self.version)
                .with_patch_cycles(self.patch_cycles),
        )
    }

    /// Returns a tailer positioned at a specific cycle, e.g. to resume after
    /// a previously recorded index.
    pub fn tailer_from_cycle(&self, cycle: i64) -> Result<Tailer<'_>> {
        if self.closed {
            return Err(ChronicleError::AlreadyClosed);
        }
        Ok(
            Tailer::from_cycle(&self.dir, self.roll, &self.dirlisting, cycle, self.version)
                .with_patch_cycles(self.patch_cycles),
        )
    }

    pub fn decode_tailer<'a, T>(
        &'a self,
        tailer: &mut Tailer<'a>,
        decoder: &impl Decoder<T>,
    ) -> Result<Option<crate::Collected<T>>> {
        tailer.collect(decoder)
    }

    pub fn highest_cycle(&self) -> Option<i64> {
        self.dirlisting.highest_cycle()
    }

    pub fn lowest_cycle(&self) -> Option<i64> {
        self.dirlisting.lowest_cycle()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Logs a snapshot of the queue's current directory-listing state.
    pub fn log_debug(&self) {
        debug!(
            dir = %self.dir.display(),
            highest_cycle = ?self.dirlisting.highest_cycle(),
            lowest_cycle = ?self.dirlisting.lowest_cycle(),
            mod_count = self.dirlisting.mod_count(),
            "queue state"
        );
    }

    /// Marks the queue closed; further `append`/`tailer` calls return
    /// [`ChronicleError::AlreadyClosed`]. Idempotent: closing twice is not
    /// an error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if !self.closed {
            debug!(dir = %self.dir.display(), "dropping queue without explicit close");
        }
    }
}
