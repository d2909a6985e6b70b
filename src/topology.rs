//! CPU topology discovery from a sysfs-style device tree
//!
//! Every logical processor is a `cpuN` directory below the root. Each one
//! exposes `topology/physical_package_id`, `topology/core_id` and the live
//! frequency attribute `cpufreq/scaling_cur_freq`. Hyper-thread siblings
//! are classified purely from enumeration order: the lowest processor id
//! of a (package, core) pair is the primary thread, every later one is a
//! sibling. OS sibling lists are never consulted.

use crate::error::CollectorError;
use crate::metric::Labels;
use log::debug;
use std::collections::HashSet;
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Default location of the per-processor device tree on Linux
pub const DEFAULT_CPU_ROOT: &str = "/sys/devices/system/cpu";

const DIR_PREFIX: &str = "cpu";
const PACKAGE_ID_FILE: &str = "topology/physical_package_id";
const CORE_ID_FILE: &str = "topology/core_id";
const CUR_FREQ_FILE: &str = "cpufreq/scaling_cur_freq";

/// Identity attributes read for one logical processor before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorInfo {
    pub processor_id: usize,
    pub package_id: i64,
    pub core_id: i64,
    pub sample_path: PathBuf,
}

/// Classified topology record for one logical processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorTopologyEntry {
    /// Logical processor number, dense and starting at 0
    pub processor_id: usize,
    /// Socket local core id, not globally unique
    pub core_id: i64,
    /// Socket / package id
    pub package_id: i64,
    /// True if an earlier processor already claimed this (package, core) pair
    pub is_hyper_thread_sibling: bool,
    /// Number of distinct packages in the whole topology
    pub num_physical_packages: usize,
    /// Number of primary (non hyper-thread) processors in the whole topology
    pub num_non_hyper_thread_processors: usize,
    /// Live frequency attribute of this processor
    pub sample_path: PathBuf,
    /// Identity tags attached to every point derived from this processor
    pub tags: Labels,
}

/// Immutable snapshot of all discovered processors, ordered by processor id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    entries: Vec<ProcessorTopologyEntry>,
    num_physical_packages: usize,
    num_non_hyper_thread_processors: usize,
}

impl CpuTopology {
    /// Classify a complete set of discovered processors
    ///
    /// Processor ids must form the dense range `0..n`. The input order does
    /// not matter; classification always walks ascending processor id.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Discovery` for an empty set and
    /// `CollectorError::TopologyRead` if the processor ids have a gap or a
    /// duplicate.
    pub fn from_processors(mut processors: Vec<ProcessorInfo>) -> Result<Self, CollectorError> {
        if processors.is_empty() {
            return Err(CollectorError::Discovery(
                "no processors to build a topology from".to_string(),
            ));
        }

        processors.sort_by_key(|p| p.processor_id);
        for (index, processor) in processors.iter().enumerate() {
            if processor.processor_id != index {
                return Err(CollectorError::topology_read(
                    &processor.sample_path,
                    format!(
                        "processor ids are not contiguous: expected cpu{}, found cpu{}",
                        index, processor.processor_id
                    ),
                ));
            }
        }

        // First pass: first-seen (package, core) pair is the primary thread
        let mut seen = HashSet::new();
        let siblings: Vec<bool> = processors
            .iter()
            .map(|p| !seen.insert((p.package_id, p.core_id)))
            .collect();

        // Second pass: topology wide counts
        let num_physical_packages = processors
            .iter()
            .map(|p| p.package_id)
            .collect::<HashSet<_>>()
            .len();
        let num_non_hyper_thread_processors = siblings.iter().filter(|s| !**s).count();

        let entries = processors
            .into_iter()
            .zip(siblings)
            .map(|(p, is_hyper_thread_sibling)| {
                let mut tags = Labels::new();
                tags.insert("type".to_string(), "hwthread".to_string());
                tags.insert("type-id".to_string(), p.processor_id.to_string());
                tags.insert("package_id".to_string(), p.package_id.to_string());

                ProcessorTopologyEntry {
                    processor_id: p.processor_id,
                    core_id: p.core_id,
                    package_id: p.package_id,
                    is_hyper_thread_sibling,
                    num_physical_packages,
                    num_non_hyper_thread_processors,
                    sample_path: p.sample_path,
                    tags,
                }
            })
            .collect();

        Ok(Self {
            entries,
            num_physical_packages,
            num_non_hyper_thread_processors,
        })
    }

    pub fn entries(&self) -> &[ProcessorTopologyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_physical_packages(&self) -> usize {
        self.num_physical_packages
    }

    pub fn num_non_hyper_thread_processors(&self) -> usize {
        self.num_non_hyper_thread_processors
    }

    /// Primary threads only, one per (package, core) pair
    pub fn primary_threads(&self) -> impl Iterator<Item = &ProcessorTopologyEntry> {
        self.entries.iter().filter(|e| !e.is_hyper_thread_sibling)
    }
}

/// Discovers the processor topology below a device tree root
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    root: PathBuf,
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_ROOT)
    }
}

impl TopologyBuilder {
    /// Create a builder for the given device tree root
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use hwmetrics::topology::TopologyBuilder;
    ///
    /// let topology = TopologyBuilder::new("/sys/devices/system/cpu").build()?;
    /// println!("{} logical processors", topology.len());
    /// # Ok::<(), hwmetrics::CollectorError>(())
    /// ```
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discover and classify all processors
    ///
    /// The build is atomic: any unreadable attribute fails the whole build
    /// and no partial topology is returned.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Discovery` if the root cannot be enumerated
    /// or contains no processor directories, and
    /// `CollectorError::TopologyRead` naming the offending path for any
    /// missing or unparseable attribute or a processor id gap.
    pub fn build(&self) -> Result<CpuTopology, CollectorError> {
        let dirs = self.discover_processor_dirs()?;
        let processors = dirs
            .iter()
            .map(|(id, dir)| read_processor(*id, dir))
            .collect::<Result<Vec<_>, _>>()?;

        let topology = CpuTopology::from_processors(processors)?;
        debug!(
            "Topology discovered below {}: {} physical packages, {} CPUs, {} non-hyper-threading CPUs",
            self.root.display(),
            topology.num_physical_packages(),
            topology.len(),
            topology.num_non_hyper_thread_processors()
        );
        Ok(topology)
    }

    /// Enumerate `cpu[0-9]*` directories and parse their processor ids
    fn discover_processor_dirs(&self) -> Result<Vec<(usize, PathBuf)>, CollectorError> {
        let read_dir = fs::read_dir(&self.root).map_err(|e| {
            CollectorError::Discovery(format!(
                "unable to enumerate '{}': {}",
                self.root.display(),
                e
            ))
        })?;

        let mut dirs = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                CollectorError::Discovery(format!(
                    "unable to enumerate '{}': {}",
                    self.root.display(),
                    e
                ))
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(suffix) = name.strip_prefix(DIR_PREFIX) else {
                continue;
            };
            if !suffix.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }

            let path = entry.path();
            let processor_id = suffix.parse::<usize>().map_err(|e| {
                CollectorError::topology_read(
                    &path,
                    format!("unable to convert processor id '{}': {}", suffix, e),
                )
            })?;
            dirs.push((processor_id, path));
        }

        if dirs.is_empty() {
            return Err(CollectorError::Discovery(format!(
                "unable to find any processor directories matching '{}/{}[0-9]*'",
                self.root.display(),
                DIR_PREFIX
            )));
        }

        dirs.sort_by_key(|(id, _)| *id);
        Ok(dirs)
    }
}

fn read_processor(processor_id: usize, dir: &Path) -> Result<ProcessorInfo, CollectorError> {
    let package_id = read_attribute(&dir.join(PACKAGE_ID_FILE))?;
    let core_id = read_attribute(&dir.join(CORE_ID_FILE))?;

    let sample_path = dir.join(CUR_FREQ_FILE);
    check_readable(&sample_path)?;

    Ok(ProcessorInfo {
        processor_id,
        package_id,
        core_id,
        sample_path,
    })
}

/// Read a whitespace padded decimal attribute
pub(crate) fn parse_attribute(path: &Path) -> Result<i64, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let trimmed = content.trim();
    trimmed
        .parse::<i64>()
        .map_err(|e| format!("unable to convert '{}' to an integer: {}", trimmed, e))
}

fn read_attribute(path: &Path) -> Result<i64, CollectorError> {
    parse_attribute(path).map_err(|reason| CollectorError::topology_read(path, reason))
}

fn check_readable(path: &Path) -> Result<(), CollectorError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| CollectorError::topology_read(path, e))?;

    // SAFETY: c_path is a valid NUL terminated string that outlives the call
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::R_OK) };
    if rc != 0 {
        return Err(CollectorError::topology_read(
            path,
            format!("unable to access file: {}", io::Error::last_os_error()),
        ));
    }
    Ok(())
}



#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use std::collections::{HashMap, HashSet};

    /// Arbitrary processor layout with small id ranges to force collisions
    #[derive(Debug, Clone)]
    struct Layout(Vec<(i64, i64)>);

    impl Arbitrary for Layout {
        fn arbitrary(g: &mut Gen) -> Self {
            let len = 1 + usize::arbitrary(g) % 32;
            let pairs = (0..len)
                .map(|_| ((u8::arbitrary(g) % 3) as i64, (u8::arbitrary(g) % 6) as i64))
                .collect();
            Self(pairs)
        }
    }

    impl Layout {
        fn topology(&self) -> CpuTopology {
            let processors = self
                .0
                .iter()
                .enumerate()
                .map(|(id, (package, core))| ProcessorInfo {
                    processor_id: id,
                    package_id: *package,
                    core_id: *core,
                    sample_path: PathBuf::from(format!("cpu{}", id)),
                })
                .collect();
            CpuTopology::from_processors(processors).unwrap()
        }
    }

    #[quickcheck]
    fn prop_one_primary_per_pair_with_lowest_id(layout: Layout) -> bool {
        let topology = layout.topology();

        let mut lowest: HashMap<(i64, i64), usize> = HashMap::new();
        for entry in topology.entries() {
            lowest
                .entry((entry.package_id, entry.core_id))
                .or_insert(entry.processor_id);
        }

        let primaries: Vec<_> = topology.primary_threads().collect();
        primaries.len() == lowest.len()
            && primaries
                .iter()
                .all(|e| lowest[&(e.package_id, e.core_id)] == e.processor_id)
    }

    #[quickcheck]
    fn prop_package_count_matches_distinct_ids(layout: Layout) -> bool {
        let distinct: HashSet<i64> = layout.0.iter().map(|(p, _)| *p).collect();
        layout.topology().num_physical_packages() == distinct.len()
    }

    #[quickcheck]
    fn prop_primary_and_sibling_counts_cover_all(layout: Layout) -> bool {
        let topology = layout.topology();
        let siblings = topology
            .entries()
            .iter()
            .filter(|e| e.is_hyper_thread_sibling)
            .count();
        topology.num_non_hyper_thread_processors() + siblings == topology.len()
    }

    #[quickcheck]
    fn prop_type_id_matches_processor_id(layout: Layout) -> bool {
        layout
            .topology()
            .entries()
            .iter()
            .all(|e| e.tags.get("type-id") == Some(&e.processor_id.to_string()))
    }
}
