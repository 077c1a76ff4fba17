//! Project-name derivation from asset naming conventions.

use serde::{Deserialize, Serialize};

/// Maps a name prefix onto a canonical project tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPreset {
    pub prefix: String,
    pub project: String,
}

impl ProjectPreset {
    pub fn new(prefix: &str, project: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            project: project.to_string(),
        }
    }
}

/// Derive the project an asset belongs to from its name.
///
/// The longest preset whose prefix starts the name wins. Otherwise the first
/// `-`-delimited segment is used, or the full name when there is no `-` or
/// the first segment is empty.
pub fn derive_project_name(name: &str, presets: &[ProjectPreset]) -> String {
    if let Some(preset) = presets
        .iter()
        .filter(|p| !p.prefix.is_empty() && name.starts_with(p.prefix.as_str()))
        .max_by_key(|p| p.prefix.len())
    {
        return preset.project.clone();
    }

    match name.split('-').next() {
        Some(first) if !first.is_empty() => first.to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presets() -> Vec<ProjectPreset> {
        vec![
            ProjectPreset::new("blog", "blog"),
            ProjectPreset::new("blog-admin", "admin"),
            ProjectPreset::new("mc-", "minecraft"),
        ]
    }

    #[test]
    fn test_first_segment() {
        assert_eq!(derive_project_name("shop-api-worker", &[]), "shop");
        assert_eq!(derive_project_name("shop", &[]), "shop");
    }

    #[test]
    fn test_leading_hyphen_falls_back_to_full_name() {
        assert_eq!(derive_project_name("-orphan", &[]), "-orphan");
        assert_eq!(derive_project_name("", &[]), "");
    }

    #[test]
    fn test_preset_longest_prefix_wins() {
        let p = presets();
        assert_eq!(derive_project_name("blog-admin-api", &p), "admin");
        assert_eq!(derive_project_name("blog-images", &p), "blog");
        assert_eq!(derive_project_name("mc-server-state", &p), "minecraft");
        assert_eq!(derive_project_name("other-thing", &p), "other");
    }

    #[test]
    fn test_deterministic_across_calls() {
        let p = presets();
        for name in ["a-b-c", "blog-x", "noseparator", "-x", "mc-", "x--y"] {
            let first = derive_project_name(name, &p);
            for _ in 0..3 {
                assert_eq!(derive_project_name(name, &p), first);
            }
        }
    }
}
