// This module holds the configuration consumed by the decoration pass. TargetSpecification
// resolves the set of function names to instrument from two sources, an inline
// whitespace-separated list and a file of whitespace-separated names, normally taken from
// the DRTI_TARGET_NAMES and DRTI_TARGETS_FILE environment variables. The union of both
// sources becomes an immutable TargetSet; an empty union is always a configuration error.
// ProbeConfig carries the platform ABI assumptions behind the return-address landing probe
// (alignment unit, magic constant, probe offset) and validates them. DecorateOptions
// bundles everything else the pass needs that does not come from the module itself.

//! Target selection and pass options.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use hashbrown::HashSet;

use super::error::{DecorateError, DecorateResult};

/// The only target triple the pass instruments.
pub const SUPPORTED_TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// Triple given to decorated modules so the machine-code pass picks them up.
pub const DECORATED_TRIPLE: &str = "x86_64_drti-unknown-linux-gnu";

/// Data layout assumed when a module does not declare one.
pub const DEFAULT_DATA_LAYOUT: &str =
    "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128";

/// Deduplicated, non-empty set of target function names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    names: HashSet<String>,
}

impl TargetSet {
    /// Build a set from any name iterator. Fails when no names are given.
    pub fn from_names<I, S>(names: I) -> DecorateResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|name| !name.is_empty())
            .collect();

        if names.is_empty() {
            return Err(TargetSpecification::no_targets());
        }

        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed set; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in sorted order, for stable diagnostics.
    pub fn sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Where target names come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpecification {
    /// Inline whitespace-separated names.
    pub inline_names: Option<String>,

    /// Path to a file of whitespace-separated names.
    pub targets_file: Option<PathBuf>,
}

impl TargetSpecification {
    pub const NAMES_VAR: &'static str = "DRTI_TARGET_NAMES";
    pub const FILE_VAR: &'static str = "DRTI_TARGETS_FILE";

    pub fn new(inline_names: Option<String>, targets_file: Option<PathBuf>) -> Self {
        Self {
            inline_names,
            targets_file,
        }
    }

    /// Read both sources from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(env::var_os(Self::NAMES_VAR), env::var_os(Self::FILE_VAR))
    }

    /// Build from raw variable values. Empty values count as unset.
    fn from_vars(names: Option<OsString>, file: Option<OsString>) -> Self {
        let inline_names = names.filter(|v| !v.is_empty()).map(|v| match v.into_string() {
            Ok(text) => text,
            Err(raw) => {
                log::warn!("{} is not valid UTF-8, decoding lossily", Self::NAMES_VAR);
                raw.to_string_lossy().into_owned()
            }
        });

        Self {
            inline_names,
            targets_file: file.filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }

    /// Fill whichever source is unset from the environment.
    pub fn or_env(self) -> Self {
        let fallback = Self::from_env();
        Self {
            inline_names: self.inline_names.or(fallback.inline_names),
            targets_file: self.targets_file.or(fallback.targets_file),
        }
    }

    /// Resolve the union of both sources into a [`TargetSet`].
    pub fn resolve(&self) -> DecorateResult<TargetSet> {
        let mut names = Vec::new();

        if let Some(inline) = &self.inline_names {
            log::debug!("parsing {} ({} bytes)", Self::NAMES_VAR, inline.len());
            names.extend(split_names(inline));
        }

        if let Some(path) = self
            .targets_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
        {
            log::debug!("parsing from {} {}", Self::FILE_VAR, path.display());
            let contents = read_targets_file(path)?;
            names.extend(split_names(&contents));
        }

        let targets = TargetSet::from_names(names)?;
        log::debug!("{} target names configured", targets.len());
        Ok(targets)
    }

    fn no_targets() -> DecorateError {
        DecorateError::NoTargetsConfigured {
            names_var: Self::NAMES_VAR,
            file_var: Self::FILE_VAR,
        }
    }
}

fn split_names(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_owned)
}

fn read_targets_file(path: &Path) -> DecorateResult<String> {
    fs::read_to_string(path).map_err(|source| DecorateError::TargetsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Constants behind the return-address landing probe.
///
/// A decorated call site is expected to leave its return address aligned to
/// `alignment` bytes with `magic` stored at `return_address + offset`. These
/// are platform ABI assumptions shared with the machine-code pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    pub alignment: u64,
    pub magic: u64,
    pub offset: i64,
}

impl ProbeConfig {
    pub const DEFAULT_ALIGNMENT: u64 = 16;
    pub const DEFAULT_MAGIC: u64 = 0x4452_5449_5f4d_4147;

    /// Check the constants describe a loadable, aligned 64-bit probe.
    pub fn validate(&self) -> DecorateResult<()> {
        if !self.alignment.is_power_of_two() || self.alignment < 8 {
            return Err(DecorateError::InvalidProbe {
                reason: format!(
                    "alignment {} must be a power of two of at least 8",
                    self.alignment
                ),
            });
        }

        if self.offset >= 0 || self.offset % 8 != 0 {
            return Err(DecorateError::InvalidProbe {
                reason: format!(
                    "offset {} must be negative and a multiple of 8",
                    self.offset
                ),
            });
        }

        Ok(())
    }

    pub fn alignment_mask(&self) -> u64 {
        self.alignment - 1
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            alignment: Self::DEFAULT_ALIGNMENT,
            magic: Self::DEFAULT_MAGIC,
            offset: -(Self::DEFAULT_ALIGNMENT as i64),
        }
    }
}

/// Everything the pass needs besides the module and the target set.
#[derive(Debug, Clone, Default)]
pub struct DecorateOptions {
    pub probe: ProbeConfig,

    /// Global variables exported through the snapshot's address table.
    pub listed_globals: Vec<String>,

    /// Run the LLVM verifier over the decorated module.
    pub verify: bool,
}
