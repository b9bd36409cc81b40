//! Filename derivation for snapshot files: names are taken from the
//! checkpoint's vector-clock signature, with an `.inprogress` suffix while
//! the file is being written.

use std::path::{Path, PathBuf};

use duskdb_core::Vclock;

const INPROGRESS_SUFFIX: &str = ".inprogress";
const SNAPSHOT_EXTENSION: &str = "snapshot";

/// Final on-disk filename for a checkpoint with the given signature.
pub fn final_name(vclock: &Vclock) -> String {
    format!("{}.{SNAPSHOT_EXTENSION}", vclock.signature_string())
}

/// In-progress filename used while a checkpoint is being written.
pub fn inprogress_name(vclock: &Vclock) -> String {
    format!("{}{INPROGRESS_SUFFIX}", final_name(vclock))
}

/// Full in-progress path under `dir` for `vclock`.
pub fn inprogress_path(dir: &Path, vclock: &Vclock) -> PathBuf {
    dir.join(inprogress_name(vclock))
}

/// Full final path under `dir` for `vclock`.
pub fn final_path(dir: &Path, vclock: &Vclock) -> PathBuf {
    dir.join(final_name(vclock))
}

/// Whether `path` names an in-progress snapshot file left behind by a crash.
pub fn is_inprogress(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(INPROGRESS_SUFFIX))
}

/// Given an `.inprogress` path, derive the final path it would be renamed
/// to on a clean commit.
pub fn strip_inprogress(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stripped = name.strip_suffix(INPROGRESS_SUFFIX)?;
    Some(path.with_file_name(stripped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_signature() {
        let vclock = Vclock::new(vec![(0, 1), (1, 2)]);
        assert_eq!(final_name(&vclock), format!("{}.snapshot", vclock.signature_string()));
        assert_eq!(
            inprogress_name(&vclock),
            format!("{}.snapshot.inprogress", vclock.signature_string())
        );
    }

    #[test]
    fn inprogress_detection_and_stripping() {
        let vclock = Vclock::new(vec![(0, 1)]);
        let dir = Path::new("/tmp/db");
        let path = inprogress_path(dir, &vclock);
        assert!(is_inprogress(&path));
        assert_eq!(strip_inprogress(&path).unwrap(), final_path(dir, &vclock));
    }

    #[test]
    fn final_path_is_not_inprogress() {
        let vclock = Vclock::new(vec![(0, 1)]);
        let path = final_path(Path::new("/tmp/db"), &vclock);
        assert!(!is_inprogress(&path));
        assert!(strip_inprogress(&path).is_none());
    }
}
