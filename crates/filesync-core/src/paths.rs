//! File name rules.
//!
//! Hidden entries (`.git`, `.DS_Store`, ...) and browser swap files
//! (`*.crswap`) are never synchronized. Synchronized names are single path
//! components relative to the synchronized directory.

/// Whether `path` should be skipped entirely.
pub fn is_ignored(path: &str) -> bool {
    path.split(['/', '\\'])
        .any(|part| part.starts_with('.') || part.ends_with(".crswap"))
}

/// Whether `name` can be synchronized: one non-empty, non-ignored component.
pub fn is_syncable(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !is_ignored(name)
}
