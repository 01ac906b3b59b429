//! Locating and binding the pdfium shared library.
//!
//! Resolution order:
//!
//! 1. an explicit path from [`crate::PipelineConfig::pdfium_library_path`]
//! 2. `PDFIUM_LIB_PATH`
//! 3. the system library search path
//!
//! A path may name the library file itself or the directory holding it.
//! Nothing is downloaded: a host without pdfium reports
//! [`ExtractionError::ToolchainUnavailable`] and the caller falls back to
//! image uploads.

use crate::error::ExtractionError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the pdfium library (file or directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Where the pdfium library will be loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    Explicit(PathBuf),
    Env(PathBuf),
    System,
}

impl LibrarySource {
    /// Pick a source from config and environment.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        if let Some(p) = explicit {
            return LibrarySource::Explicit(p.to_path_buf());
        }
        match std::env::var_os(PDFIUM_LIB_PATH_ENV) {
            Some(v) if !v.is_empty() => LibrarySource::Env(PathBuf::from(v)),
            _ => LibrarySource::System,
        }
    }

    /// The library file to load, if the source is a path.
    pub fn library_file(&self) -> Option<PathBuf> {
        match self {
            LibrarySource::Explicit(p) | LibrarySource::Env(p) => Some(if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(p)
            } else {
                p.clone()
            }),
            LibrarySource::System => None,
        }
    }

    /// Load the library and return a ready `Pdfium` instance.
    pub fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match self.library_file() {
            Some(file) => {
                if !file.exists() {
                    return Err(ExtractionError::ToolchainUnavailable(format!(
                        "pdfium library not found at '{}'",
                        file.display()
                    )));
                }
                debug!("Binding pdfium from {}", file.display());
                Pdfium::bind_to_library(&file).map_err(|e| {
                    ExtractionError::ToolchainUnavailable(format!(
                        "failed to load '{}': {}",
                        file.display(),
                        e
                    ))
                })?
            }
            None => {
                debug!("Binding system pdfium library");
                Pdfium::bind_to_system_library().map_err(|e| {
                    ExtractionError::ToolchainUnavailable(format!(
                        "no system pdfium library: {e}"
                    ))
                })?
            }
        };
        Ok(Pdfium::new(bindings))
    }
}

impl std::fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibrarySource::Explicit(p) => write!(f, "config path {}", p.display()),
            LibrarySource::Env(p) => write!(f, "{PDFIUM_LIB_PATH_ENV}={}", p.display()),
            LibrarySource::System => f.write_str("system library"),
        }
    }
}
