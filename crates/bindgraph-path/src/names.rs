//! Path segmentation and bind name validation.
//!
//! A path is a `/`-delimited list of bind names walked from the root
//! collection. Empty segments are ignored, so `"/a//b/"` and `"a/b"` name
//! the same resource and `"/"` names the root itself.
//!
//! Valid bind names:
//! - Must be non-empty
//! - Must not contain `/` or NUL
//! - Must not be `.` or `..`

use crate::error::{PathError, PathResult};

/// Characters that are forbidden anywhere in a bind name.
const FORBIDDEN_CHARS: &[char] = &['/', '\0'];

/// The non-empty segments of `path`, in order.
///
/// ```
/// use bindgraph_path::names::segments;
///
/// assert_eq!(segments("/a//b/").collect::<Vec<_>>(), vec!["a", "b"]);
/// assert_eq!(segments("/").count(), 0);
/// ```
pub fn segments(path: &str) -> impl Iterator<Item = &str> + '_ {
    path.split('/').filter(|s| !s.is_empty())
}

/// Absolute path built from bind names: `["a", "b"]` becomes `"/a/b"`.
pub fn join_segments<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().fold(String::new(), |mut path, name| {
        path.push('/');
        path.push_str(name.as_ref());
        path
    })
}

/// Validate a bind name, returning `Ok(())` if it can name a member of a
/// collection.
///
/// ```
/// use bindgraph_path::names::validate_bind_name;
///
/// assert!(validate_bind_name("report.pdf").is_ok());
/// assert!(validate_bind_name("").is_err());
/// assert!(validate_bind_name("a/b").is_err());
/// ```
pub fn validate_bind_name(name: &str) -> PathResult<()> {
    let reject = |reason: String| PathError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(reject("bind name must not be empty".into()));
    }

    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(reject(format!("contains forbidden character: {ch:?}")));
    }

    if name == "." || name == ".." {
        return Err(reject(format!("{name:?} is reserved")));
    }

    Ok(())
}
