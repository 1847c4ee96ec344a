//! Kernel BTF discovery
//!
//! LSM programs are loaded against the running kernel's BTF. An explicit
//! path wins (the `btf` config key, also settable as `LSMGATE_BTF`);
//! otherwise the kernel's own `/sys/kernel/btf/vmlinux`, then a per-release
//! file under the lib directory, then a generic `btf` file there.

use std::iter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use aya::{Btf, Endianness};
use tracing::{debug, info};

/// BTF exported by kernels built with `CONFIG_DEBUG_INFO_BTF`
pub const DEFAULT_BTF_FILE: &str = "/sys/kernel/btf/vmlinux";

/// Fallback directory holding `metadata/vmlinux-<release>` and `btf`
pub const BTF_LIB_DIR: &str = "/var/lib/lsmgate";

/// Where to look, in order.
#[derive(Debug, Clone)]
pub struct BtfSearch {
    pub user: Option<PathBuf>,
    pub default_file: PathBuf,
    pub lib_dir: PathBuf,
    pub release: Option<String>,
}

impl BtfSearch {
    /// Search the standard locations for the running kernel.
    pub fn for_running_kernel(user: Option<&Path>) -> Self {
        let release = nix::sys::utsname::uname()
            .ok()
            .and_then(|u| u.release().to_str().map(str::to_owned));

        Self {
            user: user.map(Path::to_path_buf),
            default_file: PathBuf::from(DEFAULT_BTF_FILE),
            lib_dir: PathBuf::from(BTF_LIB_DIR),
            release,
        }
    }

    pub fn find(&self) -> Result<PathBuf> {
        if let Some(path) = &self.user {
            if !path.exists() {
                bail!("User specified BTF file {} does not exist", path.display());
            }
            info!("Using user specified BTF file {}", path.display());
            return Ok(path.clone());
        }

        if self.default_file.exists() {
            debug!("Using kernel BTF file {}", self.default_file.display());
            return Ok(self.default_file.clone());
        }

        debug!("Kernel BTF file {} does not exist", self.default_file.display());

        let release_file = self
            .release
            .as_ref()
            .map(|r| self.lib_dir.join("metadata").join(format!("vmlinux-{}", r)));
        let candidates = release_file.into_iter().chain(iter::once(self.lib_dir.join("btf")));
        for path in candidates {
            if path.exists() {
                info!("Using BTF file {}", path.display());
                return Ok(path);
            }
            debug!("Candidate BTF file {} does not exist", path.display());
        }

        bail!(
            "Kernel {} BTF search failed in {} and {}; set `btf` in the config",
            self.release.as_deref().unwrap_or("(unknown)"),
            self.default_file.display(),
            self.lib_dir.display()
        )
    }
}

/// Locate and parse the BTF to load LSM programs against.
pub fn load_btf(user: Option<&Path>) -> Result<Btf> {
    let path = BtfSearch::for_running_kernel(user).find()?;
    Btf::parse_file(&path, Endianness::default())
        .with_context(|| format!("Failed to parse BTF from {}", path.display()))
}
