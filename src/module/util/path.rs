//! Path Operations Module
//!
//! This module handles path operations for directories and files.

use std::path::PathBuf;

/// Join Paths
///
/// This function takes a slice of strings as input and joins them into a single path string.
/// It uses the PathBuf type to handle platform-specific separators and conversions.
pub fn join(paths: &[&str]) -> String {
    let mut path: PathBuf = PathBuf::new();
    for p in paths {
        path.push(p);
    }
    path.to_string_lossy().into_owned()
}

pub mod dir {
    //! Directory Operations Submodule
    //!
    //! This submodule provides functions for directory operations.

    use std::fs;
    use std::io;
    use std::path::Path;

    use super::{WatchtowerDir, WatchtowerImg, WatchtowerPath};
    use crate::module::define;

    /// Create Directory from Path List
    ///
    /// Creates a directory with the joined path and returns that path.
    pub fn create_dir_from_path_list(paths: &[&str]) -> io::Result<String> {
        let path = super::join(paths);
        fs::create_dir_all(Path::new(&path))?;
        Ok(path)
    }

    /// Create Subdirectory in Either Directory
    ///
    /// Uses `dir1` as the parent if it exists, `dir2` otherwise.
    pub fn create_subdir_in_either_dir(dir1: &str, dir2: &str, name: &str) -> io::Result<String> {
        let parent: &str = match Path::new(dir1).is_dir() {
            true => dir1,
            false => dir2,
        };
        create_dir_from_path_list(&[parent, name])
    }

    /// Create Application Subdirectory and Paths
    ///
    /// The data directory lives under `persistent` when that directory exists and under
    /// `ephemeral` otherwise. The tmp directory always lives under `ephemeral`.
    /// A log directory is created inside the data directory.
    pub fn create_app_sub_dir(persistent: &str, ephemeral: &str) -> io::Result<WatchtowerPath> {
        let data_dir = create_subdir_in_either_dir(persistent, ephemeral, define::system::NAME)?;
        let tmp_dir = create_dir_from_path_list(&[ephemeral, define::system::NAME])?;
        let log_dir = create_dir_from_path_list(&[&data_dir, define::path::LOG_DIR])?;
        let overlay = super::join(&[&tmp_dir, define::path::OVERLAY_IMAGE]);
        Ok(WatchtowerPath {
            dir: WatchtowerDir {
                data: data_dir,
                tmp: tmp_dir,
                log: log_dir,
            },
            img: WatchtowerImg { overlay },
        })
    }

    /// Create the default directory set under `define::path`.
    pub fn create_default_app_sub_dir() -> io::Result<WatchtowerPath> {
        create_app_sub_dir(define::path::PERSISTENT_DIR, define::path::EPHEMERAL_DIR)
    }
}

/// Paths of Resources
///
/// This struct represents the paths of the resources used by the application.
#[derive(Debug, Clone)]
pub struct WatchtowerPath {
    /// Directories Paths
    pub dir: WatchtowerDir,
    /// Images Paths
    pub img: WatchtowerImg,
}

/// Paths of Directories
#[derive(Debug, Clone)]
pub struct WatchtowerDir {
    /// Data Directory Path
    pub data: String,
    /// Temporary Directory Path
    pub tmp: String,
    /// Log Directory Path
    pub log: String,
}

/// Paths of Images
#[derive(Debug, Clone)]
pub struct WatchtowerImg {
    /// Composited overlay frame
    pub overlay: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_create_dir_from_path_list() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path().to_str().unwrap();
        let res = dir::create_dir_from_path_list(&[root, "a", "b"]).unwrap();

        // Assert that the directory was created
        assert!(Path::new(&res).is_dir());
        assert_eq!(res, join(&[root, "a/b"]));
    }

    #[test]
    fn test_create_subdir_in_either_dir() {
        let root = tempfile::tempdir().unwrap();
        let root = root.path().to_str().unwrap();
        let missing = join(&[root, "missing"]);
        let res = dir::create_subdir_in_either_dir(&missing, root, "sub").unwrap();

        // Falls back to the second parent when the first one does not exist
        assert_eq!(res, join(&[root, "sub"]));
        assert!(!Path::new(&missing).exists());
    }

    #[test]
    fn test_create_app_sub_dir() {
        let persistent = tempfile::tempdir().unwrap();
        let ephemeral = tempfile::tempdir().unwrap();
        let p = persistent.path().to_str().unwrap();
        let e = ephemeral.path().to_str().unwrap();
        let res = dir::create_app_sub_dir(p, e).unwrap();

        assert_eq!(res.dir.data, join(&[p, "watchtower"]));
        assert_eq!(res.dir.tmp, join(&[e, "watchtower"]));
        assert!(Path::new(&res.dir.log).is_dir());
        assert_eq!(res.img.overlay, join(&[e, "watchtower", "overlay.jpg"]));
    }

    #[test]
    fn test_path_join() {
        // Assert that joining two paths works as expected
        assert_eq!(join(&["/test/", "test"]), "/test/test");

        // Assert that joining three paths works as expected
        assert_eq!(join(&["test", "test", "test"]), "test/test/test");

        // Assert that joining relative paths works as expected
        assert_eq!(
            join(&["./test/", "test/", "test.txt"]),
            "./test/test/test.txt"
        );
    }
}
