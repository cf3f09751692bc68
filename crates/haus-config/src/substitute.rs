//! Path placeholder substitution for managed files
//!
//! Template target paths may contain a `USER` segment that stands for the
//! configured container user, e.g. `/home/USER/.config` becomes
//! `/home/deploy/.config`. Only whole path segments are replaced; a name like
//! `USERDATA` is left alone.

/// Substitute `USER` path segments with the given user name
pub fn substitute_user(path: &str, user: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        segments.push(if segment == "USER" { user } else { segment });
    }
    segments.join("/")
}
