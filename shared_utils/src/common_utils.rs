//! Common Utilities Module
//!
//! 通用路径工具函数

use std::path::{Path, PathBuf};

/// 安全地获取文件扩展名（小写）
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::get_extension_lowercase;
///
/// assert_eq!(get_extension_lowercase(Path::new("test.JPG")), "jpg");
/// assert_eq!(get_extension_lowercase(Path::new("noext")), "");
/// ```
pub fn get_extension_lowercase(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// 检查文件扩展名是否在给定列表中（不区分大小写）
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::has_extension;
///
/// let extensions = &["jpg", "png"];
/// assert!(has_extension(Path::new("photo.JPG"), extensions));
/// assert!(!has_extension(Path::new("video.mp4"), extensions));
/// ```
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let ext = get_extension_lowercase(path);
    extensions.contains(&ext.as_str())
}

/// Path of a file next to `path` with the same stem and a new extension.
///
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::sibling_with_extension;
///
/// assert_eq!(
///     sibling_with_extension(Path::new("/a/b/photo.png"), "jpg"),
///     Path::new("/a/b/photo.jpg")
/// );
/// ```
pub fn sibling_with_extension(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

/// Parent directory, with `.` standing in for bare file names.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_case_insensitive() {
        assert_eq!(get_extension_lowercase(Path::new("a/B.JpEg")), "jpeg");
        assert!(has_extension(Path::new("x.PNG"), &["png"]));
        assert!(!has_extension(Path::new("png"), &["png"]));
    }

    #[test]
    fn test_sibling_keeps_directory() {
        let sib = sibling_with_extension(Path::new("dir/sub/image.PNG"), "jpg");
        assert_eq!(sib, Path::new("dir/sub/image.jpg"));
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("file.png")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/file.png")), Path::new("a"));
    }
}
