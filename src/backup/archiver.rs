//! Streaming backup archiver: filtered tree → tar.gz, hashed in one pass.
//!
//! The gzip stream is teed into the output file and a SHA-256 accumulator,
//! so the digest covers exactly the bytes on disk without a second read.
//! Blocking I/O throughout; callers run it on a blocking thread.

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::utils::{AgentError, AgentResult};

/// Vendor helper tree that must never land in a backup.
const SKIP_DIR: &str = "Helper-Script";

/// Selected subdirectories and the output location.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub printer_data_root: PathBuf,
    pub include_config: bool,
    pub include_database: bool,
    pub include_gcodes: bool,
    pub include_logs: bool,
    pub output_path: PathBuf,
    /// Abort once the summed input sizes exceed this; 0 disables the check.
    pub max_size_bytes: u64,
}

/// Metadata of a finished archive.
#[derive(Debug)]
pub struct BackupResult {
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Sections of the printer_data tree, in archive order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Config,
    Database,
    Gcodes,
    Logs,
}

impl Section {
    fn dir_name(self) -> &'static str {
        match self {
            Section::Config => "config",
            Section::Database => "database",
            Section::Gcodes => "gcodes",
            Section::Logs => "logs",
        }
    }

    /// Per-section file policy. `config` keeps Klipper configs minus the
    /// generated `printer-<variant>_<rev>.cfg` family; the literal
    /// `printer.cfg` always survives.
    fn keeps(self, name: &str) -> bool {
        match self {
            Section::Config => {
                if !name.ends_with(".cfg") {
                    return false;
                }
                if name == "printer.cfg" {
                    return true;
                }
                !(name.starts_with("printer-") && name.contains('_'))
            }
            Section::Database => true,
            Section::Gcodes => {
                name.ends_with(".gcode") || name.ends_with(".g") || name.ends_with(".gco")
            }
            Section::Logs => name.ends_with(".log"),
        }
    }
}

/// Writer tee: counts and hashes everything flowing to the inner writer.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Build a tar.gz archive of the selected printer_data subdirectories.
///
/// The caller owns the output file on every path: it is deleted after upload
/// on success and after reporting on failure.
pub fn create(opts: &BackupOptions) -> AgentResult<BackupResult> {
    if opts.printer_data_root.as_os_str().is_empty() {
        return Err(AgentError::backup("printer_data_root is required"));
    }
    let root = &opts.printer_data_root;
    if !root.is_dir() {
        return Err(AgentError::backup(format!(
            "printer_data_root does not exist: {}",
            root.display()
        )));
    }

    let sections: Vec<Section> = [
        (opts.include_config, Section::Config),
        (opts.include_database, Section::Database),
        (opts.include_gcodes, Section::Gcodes),
        (opts.include_logs, Section::Logs),
    ]
    .into_iter()
    .filter_map(|(included, s)| included.then_some(s))
    .collect();

    if sections.is_empty() {
        return Err(AgentError::backup("no directories selected for backup"));
    }

    let out = File::create(&opts.output_path)
        .map_err(|e| AgentError::backup(format!("create output file: {e}")))?;
    let tee = HashingWriter::new(out);
    let gz = GzEncoder::new(tee, Compression::default());
    let mut tar = tar::Builder::new(gz);

    let mut total: u64 = 0;
    for section in sections {
        let dir = root.join(section.dir_name());
        if !dir.is_dir() {
            continue;
        }
        append_section(&mut tar, root, &dir, section, opts.max_size_bytes, &mut total)?;
    }

    let gz = tar
        .into_inner()
        .map_err(|e| AgentError::backup(format!("finish tar stream: {e}")))?;
    let mut tee = gz
        .finish()
        .map_err(|e| AgentError::backup(format!("finish gzip stream: {e}")))?;
    tee.flush()
        .map_err(|e| AgentError::backup(format!("flush output file: {e}")))?;

    let sha256 = format!("{:x}", tee.hasher.finalize());
    Ok(BackupResult {
        archive_path: opts.output_path.clone(),
        size_bytes: tee.written,
        sha256,
    })
}

fn append_section<W: Write>(
    tar: &mut tar::Builder<W>,
    root: &Path,
    dir: &Path,
    section: Section,
    max_size: u64,
    total: &mut u64,
) -> AgentResult<()> {
    let walker = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == SKIP_DIR));

    for entry in walker {
        let entry =
            entry.map_err(|e| AgentError::backup(format!("walk {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !section.keeps(&name) {
            continue;
        }

        // Nothing walked may resolve outside the declared root
        if !entry.path().starts_with(root) {
            return Err(AgentError::backup(format!(
                "path outside printer_data root: {}",
                entry.path().display()
            )));
        }

        let meta = entry
            .metadata()
            .map_err(|e| AgentError::backup(format!("stat {}: {e}", entry.path().display())))?;

        if max_size > 0 && *total + meta.len() > max_size {
            return Err(AgentError::backup(format!(
                "archive size exceeds limit of {max_size} bytes"
            )));
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| AgentError::backup("relative path computation failed"))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        // GNU headers carry long names via extension records; user/group
        // names stay cleared.
        let mut header = tar::Header::new_gnu();
        header.set_metadata(&meta);

        let mut file = File::open(entry.path())
            .map_err(|e| AgentError::backup(format!("open {}: {e}", entry.path().display())))?;
        tar.append_data(&mut header, &rel, &mut file)
            .map_err(|e| AgentError::backup(format!("archive {rel}: {e}")))?;

        *total += meta.len();
    }

    Ok(())
}
