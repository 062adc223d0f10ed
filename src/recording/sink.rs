// src/recording/sink.rs
//! Capture file allocation
//!
//! Each intercepted stream gets one plain file under the storage root, named
//! `<YYYYmmdd_HHMMSS>_<sanitized-path>.<ext>`.

use crate::interception::flow::Flow;
use crate::utils::config::StorageConfig;
use crate::utils::errors::{Result, TapError};
use chrono::{DateTime, Local, TimeZone};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, info, warn};

/// Placeholder for an empty or root request path
pub const ROOT_PLACEHOLDER: &str = "root";

/// Timestamp layout, second resolution
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Attempts at a collision-free name before giving up
const MAX_NAME_ATTEMPTS: usize = 100;

/// Make a request path safe for use as a file name component.
///
/// Separators become `_`, an empty or root path becomes [`ROOT_PLACEHOLDER`],
/// and the result is cut to at most `max_len` bytes on a char boundary. A
/// leading char wider than `max_len` leaves a bare `_`.
pub fn sanitize_path(path: &str, max_len: usize) -> String {
    let replaced: String = path
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();

    let name = if replaced.is_empty() || replaced == "_" {
        ROOT_PLACEHOLDER
    } else {
        replaced.as_str()
    };

    let mut end = name.len().min(max_len.max(1));
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    if end == 0 {
        // the first char alone is wider than the bound
        return "_".to_string();
    }

    name[..end].to_string()
}

/// Destination id for a capture taken at `timestamp` of a request to `path`
pub fn destination_id<Tz>(timestamp: &DateTime<Tz>, path: &str, max_len: usize) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}",
        timestamp.format(TIMESTAMP_FORMAT),
        sanitize_path(path, max_len)
    )
}

/// An opened capture destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// File stem, also used as the session's destination id
    pub id: String,

    /// Full path of the capture file
    pub path: PathBuf,
}

/// Opens capture files under a storage root
#[derive(Debug, Clone)]
pub struct SinkAllocator {
    root: PathBuf,
    max_name_len: usize,
    extension: String,
}

impl SinkAllocator {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.output_dir.clone(),
            max_name_len: config.max_name_len,
            extension: config.extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root ahead of the first capture
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| TapError::SinkUnavailable {
                path: self.root.clone(),
                source,
            })?;

        info!("Capture directory ready at {:?}", self.root);
        Ok(())
    }

    /// Open a fresh capture file for `flow`
    pub async fn allocate(&self, flow: &Flow) -> Result<(File, Destination)> {
        self.allocate_at(&Local::now(), flow.path()).await
    }

    /// Open a fresh capture file for a request path captured at `timestamp`
    pub async fn allocate_at<Tz>(
        &self,
        timestamp: &DateTime<Tz>,
        path: &str,
    ) -> Result<(File, Destination)>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| TapError::SinkUnavailable {
                path: self.root.clone(),
                source,
            })?;

        let base = destination_id(timestamp, path, self.max_name_len);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let id = if attempt == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let file_path = self.file_path(&id);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&file_path)
                .await
            {
                Ok(file) => {
                    debug!("Opened capture file {:?}", file_path);
                    return Ok((file, Destination { id, path: file_path }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Capture file {:?} exists, trying next name", file_path);
                }
                Err(source) => {
                    return Err(TapError::SinkUnavailable {
                        path: file_path,
                        source,
                    });
                }
            }
        }

        warn!("No free capture name for {} after {} attempts", base, MAX_NAME_ATTEMPTS);
        Err(TapError::SinkUnavailable {
            path: self.file_path(&base),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "capture name space exhausted"),
        })
    }

    fn file_path(&self, id: &str) -> PathBuf {
        if self.extension.is_empty() {
            self.root.join(id)
        } else {
            self.root.join(format!("{}.{}", id, self.extension))
        }
    }
}
