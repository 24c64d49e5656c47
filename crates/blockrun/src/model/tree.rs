use serde::{Deserialize, Serialize};

/// Entry in the output-root listing sent with `files_captured`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileTreeNode {
    /// Path relative to the output root; unique within one tree.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<TreeFile>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// File payload of a tree node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TreeFile {
    pub name: String,
    pub path: String,
    /// UTF-8 content, empty for binary or oversized files.
    pub content: String,
    pub language: String,
    pub size: u64,
}
