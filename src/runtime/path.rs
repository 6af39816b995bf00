//! Lexical path helpers. None of these touch the filesystem.

use std::path::{Component, Path, PathBuf};

/// Folds `.` and `..` away without resolving symlinks. A `..` that would climb
/// above a relative start is kept; one that would climb above the root is dropped.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(component),
            },
            other => result.push(other),
        }
    }
    result
}

/// True when `path` is `dir` or lies below it, after normalizing both.
/// `/ws/Module/../../etc` is therefore not under `/ws/Module`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(dir))
}

/// `to_path` expressed relative to `from_dir`. The workspace index stores module
/// directories this way so a workspace can be moved as a whole.
pub fn relative_path_from_dir(from_dir: &Path, to_path: &Path) -> Option<PathBuf> {
    pathdiff::diff_paths(to_path, from_dir).filter(|p| p.is_relative())
}

/// Inverse of [`relative_path_from_dir`]. Absolute inputs pass through.
pub fn resolve_relative_path(base_dir: &Path, relative_path: &Path) -> PathBuf {
    if relative_path.is_absolute() {
        return relative_path.to_path_buf();
    }
    normalize_path(&base_dir.join(relative_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let cases = [
            ("/ws/./Module/./nos.core", "/ws/Module/nos.core"),
            ("/ws/Module/../Cache", "/ws/Cache"),
            ("Module/a/../b", "Module/b"),
            ("../Module", "../Module"),
            ("./.", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_path(Path::new(input)), PathBuf::from(expected), "{}", input);
        }
        #[cfg(unix)]
        assert_eq!(normalize_path(Path::new("/ws/../../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_module_dirs_under_install_tree() {
        let modules = Path::new("/ws/Module");
        assert!(is_path_under(Path::new("/ws/Module/nos.core-1.0.0"), modules));
        assert!(is_path_under(modules, modules));
        assert!(is_path_under(Path::new("/ws/Module/a/../b-1.0.0"), modules));

        assert!(!is_path_under(Path::new("/ws/Modules/x-1.0.0"), modules));
        assert!(!is_path_under(Path::new("/ws"), modules));
        assert!(!is_path_under(Path::new("/ws/Module/x/../../../etc"), modules));
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_traversal() {
        assert!(!is_path_under(
            Path::new("C:\\ws\\Module\\..\\..\\other"),
            Path::new("C:\\ws\\Module")
        ));
    }

    #[test]
    fn test_index_paths_survive_a_move() {
        let old_root = Path::new("/home/dev/ws");
        let stored =
            relative_path_from_dir(old_root, Path::new("/home/dev/ws/Module/nos.core-2.1.3"))
                .unwrap();
        assert_eq!(stored, PathBuf::from("Module/nos.core-2.1.3"));

        let new_root = Path::new("/srv/ws");
        assert_eq!(
            resolve_relative_path(new_root, &stored),
            PathBuf::from("/srv/ws/Module/nos.core-2.1.3")
        );
    }

    #[test]
    fn test_paths_outside_the_root() {
        assert_eq!(
            relative_path_from_dir(Path::new("/ws"), Path::new("/shared/nos.core")),
            Some(PathBuf::from("../shared/nos.core"))
        );
        assert_eq!(
            resolve_relative_path(Path::new("/ws"), Path::new("/opt/nos.core")),
            PathBuf::from("/opt/nos.core")
        );
    }
}
