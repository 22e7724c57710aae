//! On-disk layout of report artifacts and the single-writer claim.
//!
//! One seed within one execution owns the directory
//! `<root>/<observatory>/<execution>/<dependency>/<seed>/` holding
//! `<seed>.pdf` and `sources.zip`. While a build runs the directory also holds
//! `.build.lock`, the staged `<seed>.pdf.partial`, the transient `sources/`
//! tree and the `temp/` scratch area.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::Seed;

/// Directory label for seeds without a dependency.
pub const NO_DEPENDENCE: &str = "no_dependence";

const CLAIM_FILE: &str = ".build.lock";

/// Turn a display name into a single safe path component: whitespace runs
/// become `_`, anything but alphanumerics, `-` and `_` is dropped.
pub fn format_seed_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if cleaned.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(&cleaned);
    }
    out
}

/// Where the artifacts of one (observatory, execution, seed) live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub dir: PathBuf,
    pub pdf: PathBuf,
    pub seed_name: String,
    pub dependency: String,
}

impl ArtifactLocation {
    pub fn new(root: &Path, observatory_id: i64, execution_id: i64, seed: &Seed) -> Self {
        let dependency = seed
            .dependency
            .as_deref()
            .map(format_seed_name)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| NO_DEPENDENCE.to_string());

        let mut seed_name = format_seed_name(&seed.name);
        if seed_name.is_empty() {
            seed_name = format!("seed_{}", seed.id);
        }

        let dir = root
            .join(observatory_id.to_string())
            .join(execution_id.to_string())
            .join(&dependency)
            .join(&seed_name);
        let pdf = dir.join(format!("{seed_name}.pdf"));

        Self {
            dir,
            pdf,
            seed_name,
            dependency,
        }
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.dir.join("sources")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.dir.join("temp")
    }

    pub fn archive(&self) -> PathBuf {
        self.dir.join("sources.zip")
    }

    pub fn claim_path(&self) -> PathBuf {
        self.dir.join(CLAIM_FILE)
    }

    /// Where the report is rendered before being committed to [`Self::pdf`].
    pub fn staging_pdf(&self) -> PathBuf {
        self.dir.join(format!("{}.pdf.partial", self.seed_name))
    }

    /// A committed PDF means the whole build completed.
    pub fn is_built(&self) -> bool {
        self.pdf.is_file()
    }

    /// Atomically move the staged report into place.
    pub fn commit(&self) -> io::Result<()> {
        fs::rename(self.staging_pdf(), &self.pdf)
    }

    /// Remove the transient `sources/` and `temp/` directories.
    pub fn clean_transient(&self) {
        for dir in [self.sources_dir(), self.temp_dir()] {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove transient directory"),
            }
        }
    }
}

/// Exclusive right to build one artifact directory. Released on drop.
///
/// The marker carries a per-claim token; only the holder whose token is still
/// in the marker may remove it.
#[derive(Debug)]
pub struct BuildClaim {
    path: PathBuf,
    contents: String,
}

impl BuildClaim {
    /// Claim `location` by exclusively creating its marker file. Returns
    /// `Ok(None)` while another writer holds a claim younger than
    /// `stale_after`.
    pub fn acquire(location: &ArtifactLocation, stale_after: Duration) -> io::Result<Option<Self>> {
        fs::create_dir_all(&location.dir)?;
        let path = location.claim_path();

        match Self::create(&path) {
            Ok(claim) => return Ok(Some(claim)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let Some(observed) = Self::stale_contents(&path, stale_after) else {
            return Ok(None);
        };
        if !Self::evict(&path, &observed)? {
            return Ok(None);
        }
        warn!(path = %path.display(), "reclaimed stale build claim");

        match Self::create(&path) {
            Ok(claim) => Ok(Some(claim)),
            // Another writer created a fresh claim after the eviction.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let contents = format!(
            "token={} pid={} claimed_at={}\n",
            Uuid::new_v4(),
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        debug!(path = %path.display(), "build claim acquired");
        Ok(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    /// Contents of the marker when it is older than `stale_after`.
    fn stale_contents(path: &Path, stale_after: Duration) -> Option<String> {
        let age = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()?
            .elapsed()
            .ok()?;
        if age <= stale_after {
            return None;
        }
        fs::read_to_string(path).ok()
    }

    /// Move the marker aside under a unique name. Only one contender can win
    /// the rename; the winner then checks it evicted the marker it judged
    /// stale and puts back anything else.
    fn evict(path: &Path, observed: &str) -> io::Result<bool> {
        let evicted = path.with_extension(format!("lock.evicted-{}", Uuid::new_v4()));
        match fs::rename(path, &evicted) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }

        let current = fs::read_to_string(&evicted).unwrap_or_default();
        let reclaimed = current == observed;
        if !reclaimed {
            // A live claim replaced the stale one before our rename. Restore
            // it unless its path has been taken again meanwhile.
            if let Err(e) = fs::hard_link(&evicted, path) {
                warn!(path = %path.display(), error = %e, "failed to restore live build claim");
            }
        }
        remove_if_present(&evicted);
        Ok(reclaimed)
    }
}

impl Drop for BuildClaim {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == self.contents => remove_if_present(&self.path),
            Ok(_) => {
                warn!(path = %self.path.display(), "build claim was taken over, leaving it in place");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to read build claim"),
        }
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to release build claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(name: &str, dependency: Option<&str>) -> Seed {
        Seed {
            id: 7,
            name: name.to_string(),
            acronym: None,
            dependency: dependency.map(String::from),
            urls: vec![],
            active: true,
        }
    }

    #[test]
    fn test_format_seed_name() {
        assert_eq!(format_seed_name("Ministerio de Cultura"), "Ministerio_de_Cultura");
        assert_eq!(format_seed_name("  a/b  c.d "), "ab_cd");
        assert_eq!(format_seed_name("../.."), "");
        assert_eq!(format_seed_name("Gijón-Xixón"), "Gijón-Xixón");
    }

    #[test]
    fn test_location_layout() {
        let loc = ArtifactLocation::new(Path::new("/exports"), 3, 12, &seed("Portal Web", Some("Gobierno")));
        assert_eq!(loc.dir, PathBuf::from("/exports/3/12/Gobierno/Portal_Web"));
        assert_eq!(loc.pdf, PathBuf::from("/exports/3/12/Gobierno/Portal_Web/Portal_Web.pdf"));
        assert_eq!(loc.archive(), PathBuf::from("/exports/3/12/Gobierno/Portal_Web/sources.zip"));
    }

    #[test]
    fn test_missing_dependency_and_unusable_name() {
        let loc = ArtifactLocation::new(Path::new("/exports"), 1, 2, &seed("???", None));
        assert_eq!(loc.dependency, NO_DEPENDENCE);
        assert_eq!(loc.seed_name, "seed_7");

        let loc = ArtifactLocation::new(Path::new("/exports"), 1, 2, &seed("x", Some("   ")));
        assert_eq!(loc.dependency, NO_DEPENDENCE);
    }

    #[test]
    fn test_claim_is_exclusive_and_released_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let loc = ArtifactLocation::new(root.path(), 1, 1, &seed("s", None));
        let stale = Duration::from_secs(3600);

        let first = BuildClaim::acquire(&loc, stale).unwrap();
        assert!(first.is_some());
        assert!(BuildClaim::acquire(&loc, stale).unwrap().is_none());

        drop(first);
        assert!(!loc.claim_path().exists());
        assert!(BuildClaim::acquire(&loc, stale).unwrap().is_some());
    }

    #[test]
    fn test_stale_claim_is_reclaimed() {
        let root = tempfile::tempdir().unwrap();
        let loc = ArtifactLocation::new(root.path(), 1, 1, &seed("s", None));
        fs::create_dir_all(&loc.dir).unwrap();
        fs::write(loc.claim_path(), "pid=1").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let claim = BuildClaim::acquire(&loc, Duration::from_millis(1)).unwrap();
        assert!(claim.is_some());
    }

    #[test]
    fn test_superseded_claim_does_not_release_its_successor() {
        let root = tempfile::tempdir().unwrap();
        let loc = ArtifactLocation::new(root.path(), 1, 1, &seed("s", None));
        let long = Duration::from_secs(3600);

        let slow = BuildClaim::acquire(&loc, long).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let successor = BuildClaim::acquire(&loc, Duration::from_millis(1)).unwrap();
        assert!(successor.is_some());

        // The slow writer finishing must not free the directory.
        drop(slow);
        assert!(loc.claim_path().exists());
        assert!(BuildClaim::acquire(&loc, long).unwrap().is_none());

        drop(successor);
        assert!(!loc.claim_path().exists());
        assert!(BuildClaim::acquire(&loc, long).unwrap().is_some());
    }

    #[test]
    fn test_eviction_leaves_no_stray_files() {
        let root = tempfile::tempdir().unwrap();
        let loc = ArtifactLocation::new(root.path(), 1, 1, &seed("s", None));
        fs::create_dir_all(&loc.dir).unwrap();
        fs::write(loc.claim_path(), "pid=1").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let claim = BuildClaim::acquire(&loc, Duration::from_millis(1)).unwrap();
        assert!(claim.is_some());
        let entries: Vec<_> = fs::read_dir(&loc.dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(CLAIM_FILE)]);
    }
}
