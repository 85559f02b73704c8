use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use file_rotate::{ContentLimit, FileRotate, compression::Compression, suffix::AppendCount};
use iotap_core::{ConfigError, ModuleConfig};

const MB: u64 = 1024 * 1024;

/// Rotating log file, written in addition to stderr.
///
/// Configured in the `[iotap]` section: `log_file` enables it, `log_max_size_mb`
/// (default 10), `log_max_files` (rotated files kept, default 5) and
/// `log_compress` (gzip rotated files, default false) tune rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    /// Size in bytes after which the file is rotated.
    pub max_size: u64,
    pub max_files: usize,
    pub compress: bool,
}

impl LogFile {
    /// `None` when `log_file` isn't set.
    pub fn from_config(config: &ModuleConfig) -> Result<Option<Self>, ConfigError> {
        let Some(path) = config.optional::<PathBuf>("log_file")? else {
            return Ok(None);
        };
        let max_size_mb: u64 = config.with_default("log_max_size_mb", 10)?;
        if max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log_max_size_mb".to_string(),
                value: "0".to_string(),
                err: "must be positive".to_string(),
            });
        }
        Ok(Some(LogFile {
            path,
            max_size: max_size_mb * MB,
            max_files: config.with_default("log_max_files", 5)?,
            compress: config.with_default("log_compress", false)?,
        }))
    }

    /// Open the file, creating its directory, and return a writer copying
    /// every record to stderr too.
    pub fn open(&self) -> Result<impl Write + Send + 'static> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Error creating log directory {}", dir.display()))?;
        }
        let compression = if self.compress {
            // the most recent rotated file stays readable
            Compression::OnRotate(1)
        } else {
            Compression::None
        };
        let file = FileRotate::new(
            &self.path,
            AppendCount::new(self.max_files),
            ContentLimit::BytesSurpassed(self.max_size as usize),
            compression,
            #[cfg(unix)]
            None,
        );
        Ok(Tee {
            console: io::stderr(),
            file,
        })
    }
}

struct Tee<W> {
    console: io::Stderr,
    file: W,
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // losing the console must not lose the file
        let _ = self.console.write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}
