//! Groups of records that share a disposition.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Disposition category of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Duplicate,
    Burst,
    TooSmall,
    Blurry,
    Corrupted,
}

impl Category {
    /// Duplicate and burst clusters need a recommended keeper; flag
    /// categories are singletons awaiting a human decision.
    pub fn requires_recommendation(&self) -> bool {
        matches!(self, Category::Duplicate | Category::Burst)
    }

    /// Folder under `Review/` holding this category
    pub fn review_folder(&self) -> &'static str {
        match self {
            Category::Duplicate => "Duplicates",
            Category::Burst => "Bursts",
            Category::TooSmall => "TooSmall",
            Category::Blurry => "Blurry",
            Category::Corrupted => "Corrupted",
        }
    }

    /// Whether each group gets its own sub-folder
    pub fn has_group_folders(&self) -> bool {
        self.requires_recommendation()
    }

    pub(crate) fn id_prefix(&self) -> &'static str {
        match self {
            Category::Duplicate => "dup",
            Category::Burst => "burst",
            Category::TooSmall => "small",
            Category::Blurry => "blurry",
            Category::Corrupted => "corrupt",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Duplicate => write!(f, "Duplicate"),
            Category::Burst => write!(f, "Burst"),
            Category::TooSmall => write!(f, "Too small"),
            Category::Blurry => write!(f, "Blurry"),
            Category::Corrupted => write!(f, "Corrupted"),
        }
    }
}

/// A cluster of records sharing a disposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub category: Category,
    /// Member source paths, in presentation order
    pub members: Vec<PathBuf>,
    /// The suggested keeper, when the category has one
    #[serde(default)]
    pub recommended: Option<PathBuf>,
}

impl Group {
    pub fn new(id: String, category: Category, members: Vec<PathBuf>) -> Self {
        Self {
            id,
            category,
            members,
            recommended: None,
        }
    }

    /// Whether the group needs nothing more from the selector
    pub fn is_resolved(&self) -> bool {
        !self.category.requires_recommendation() || self.recommended.is_some()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m == path)
    }

    pub fn is_recommended(&self, path: &Path) -> bool {
        self.recommended.as_deref() == Some(path)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_groups_are_resolved_without_recommendation() {
        let group = Group::new(
            "small-abc".to_string(),
            Category::TooSmall,
            vec![PathBuf::from("/a.jpg")],
        );
        assert!(group.is_resolved());
    }

    #[test]
    fn clusters_need_a_recommendation() {
        let mut group = Group::new(
            "dup-abc".to_string(),
            Category::Duplicate,
            vec![PathBuf::from("/a.jpg"), PathBuf::from("/b.jpg")],
        );
        assert!(!group.is_resolved());

        group.recommended = Some(PathBuf::from("/a.jpg"));
        assert!(group.is_resolved());
        assert!(group.is_recommended(Path::new("/a.jpg")));
        assert!(!group.is_recommended(Path::new("/b.jpg")));
    }

    #[test]
    fn review_folders_match_layout() {
        assert_eq!(Category::Duplicate.review_folder(), "Duplicates");
        assert_eq!(Category::Burst.review_folder(), "Bursts");
        assert_eq!(Category::Corrupted.review_folder(), "Corrupted");
        assert!(!Category::Blurry.has_group_folders());
    }
}
