//! Thread-to-package topology.
//!
//! Threads are packed into packages in id order: with package sizes
//! `[4, 4]`, threads 0-3 live on package 0 and 4-7 on package 1. The first
//! thread of each package is its leader.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

/// Fixed mapping from thread id to package for one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    package_of: Vec<usize>,
    leaders: Vec<usize>,
}

impl Topology {
    /// All `threads` on one package.
    pub fn single_package(threads: usize) -> Self {
        Self::from_sizes_unchecked(&[threads.max(1)])
    }

    /// Builds a topology from explicit per-package thread counts.
    pub fn from_package_sizes(sizes: &[usize]) -> Result<Self> {
        if sizes.is_empty() || sizes.iter().any(|&s| s == 0) {
            return Err(Error::InvalidConfig("package sizes must be non-empty and > 0".into()));
        }
        Ok(Self::from_sizes_unchecked(sizes))
    }

    fn from_sizes_unchecked(sizes: &[usize]) -> Self {
        let mut package_of = Vec::with_capacity(sizes.iter().sum());
        let mut leaders = Vec::with_capacity(sizes.len());
        for (pkg, &size) in sizes.iter().enumerate() {
            leaders.push(package_of.len());
            package_of.extend(std::iter::repeat(pkg).take(size));
        }
        Self { package_of, leaders }
    }

    /// Topology for `config`: explicit package sizes if given, otherwise the
    /// detected machine layout. The last package absorbs any threads beyond
    /// the detected core count.
    pub fn for_config(config: &RuntimeConfig) -> Result<Self> {
        let mut sizes = match &config.packages {
            Some(sizes) => sizes.clone(),
            None => detect_package_sizes(),
        };
        if sizes.is_empty() {
            sizes.push(1);
        }
        let total: usize = sizes.iter().sum();
        if config.threads > total {
            if let Some(last) = sizes.last_mut() {
                *last += config.threads - total;
            }
        }
        Self::from_package_sizes(&sizes)
    }

    /// Total threads the topology can place.
    pub fn max_threads(&self) -> usize {
        self.package_of.len()
    }

    /// Number of packages.
    pub fn packages(&self) -> usize {
        self.leaders.len()
    }

    /// Package that hosts `tid`.
    #[inline]
    pub fn package_of(&self, tid: usize) -> usize {
        self.package_of[tid]
    }

    /// True if `tid` is the first thread of its package.
    #[inline]
    pub fn is_leader(&self, tid: usize) -> bool {
        self.leaders[self.package_of[tid]] == tid
    }

    /// Leader thread of `pkg`.
    pub fn leader_of(&self, pkg: usize) -> usize {
        self.leaders[pkg]
    }

    /// Packages spanned by threads `0..threads`.
    pub fn packages_for(&self, threads: usize) -> usize {
        if threads == 0 {
            0
        } else {
            self.package_of[threads - 1] + 1
        }
    }
}

#[cfg(target_os = "linux")]
fn detect_package_sizes() -> Vec<usize> {
    use std::collections::BTreeMap;

    // SAFETY: sysconf has no preconditions.
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online <= 0 {
        return vec![1];
    }
    let mut per_package: BTreeMap<u32, usize> = BTreeMap::new();
    for cpu in 0..online as usize {
        let path = format!("/sys/devices/system/cpu/cpu{cpu}/topology/physical_package_id");
        let pkg = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        *per_package.entry(pkg).or_default() += 1;
    }
    log_debug!("detected {} cpus across {} packages", online, per_package.len());
    per_package.into_values().collect()
}

#[cfg(not(target_os = "linux"))]
fn detect_package_sizes() -> Vec<usize> {
    vec![std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)]
}
