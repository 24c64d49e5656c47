//! Listing of the output root sent alongside captured files.

use crate::error::{RunnerError, RunnerResult};
use crate::model::{FileTreeNode, NodeKind, TreeFile};
use std::fs;
use std::path::Path;

const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("tf", "hcl"),
    ("tofu", "hcl"),
    ("tfvars", "hcl"),
    ("tfstate", "json"),
    ("hcl", "hcl"),
    ("js", "javascript"),
    ("jsx", "jsx"),
    ("ts", "typescript"),
    ("tsx", "tsx"),
    ("py", "python"),
    ("go", "go"),
    ("java", "java"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("php", "php"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("scala", "scala"),
    ("sh", "bash"),
    ("bash", "bash"),
    ("zsh", "bash"),
    ("fish", "bash"),
    ("env", "bash"),
    ("ps1", "powershell"),
    ("psm1", "powershell"),
    ("sql", "sql"),
    ("html", "html"),
    ("htm", "html"),
    ("xml", "xml"),
    ("pom", "xml"),
    ("css", "css"),
    ("scss", "scss"),
    ("sass", "sass"),
    ("less", "less"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("ini", "ini"),
    ("cfg", "ini"),
    ("conf", "ini"),
    ("md", "markdown"),
    ("mdx", "mdx"),
    ("rst", "restructuredtext"),
    ("tex", "latex"),
    ("dockerfile", "dockerfile"),
    ("cmake", "cmake"),
    ("gradle", "gradle"),
    ("properties", "properties"),
    ("csv", "csv"),
    ("tsv", "tsv"),
    ("diff", "diff"),
    ("patch", "diff"),
    ("log", "text"),
    ("txt", "text"),
    ("lock", "text"),
];

const NAME_LANGUAGES: &[(&str, &str)] = &[
    ("dockerfile", "dockerfile"),
    ("makefile", "makefile"),
    ("rakefile", "ruby"),
    ("gemfile", "ruby"),
    ("podfile", "ruby"),
    ("vagrantfile", "ruby"),
];

/// Guess a highlighting language from a file name; `text` when unknown.
pub fn language_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    let by_extension = Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| EXTENSION_LANGUAGES.iter().find(|(known, _)| *known == ext));
    if let Some((_, language)) = by_extension {
        return *language;
    }
    NAME_LANGUAGES
        .iter()
        .find(|(known, _)| *known == lower)
        .map_or("text", |(_, language)| *language)
}

/// List `root` recursively: folders first, then files, each sorted by name.
/// Hidden entries and symlinks are skipped. File content is embedded when it
/// is UTF-8 and at most `content_limit` bytes.
pub fn build_file_tree(root: &Path, content_limit: u64) -> RunnerResult<Vec<FileTreeNode>> {
    build_level(root, "", content_limit)
}

fn build_level(root: &Path, prefix: &str, content_limit: u64) -> RunnerResult<Vec<FileTreeNode>> {
    let dir = root.join(prefix);
    let mut entries = Vec::new();
    for entry in fs::read_dir(&dir)
        .map_err(|err| RunnerError::io(format!("failed to read directory {}", dir.display()), err))?
    {
        let entry = entry.map_err(|err| RunnerError::io("failed to read directory entry", err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|err| RunnerError::io("failed to stat directory entry", err))?;
        if file_type.is_symlink() {
            continue;
        }
        entries.push((file_type.is_dir(), name, entry.path()));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut nodes = Vec::with_capacity(entries.len());
    for (is_dir, name, path) in entries {
        let id = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if is_dir {
            let children = build_level(root, &id, content_limit)?;
            nodes.push(FileTreeNode {
                id,
                name,
                kind: NodeKind::Folder,
                children,
                file: None,
            });
        } else {
            let size = fs::metadata(&path)
                .map_err(|err| RunnerError::io("failed to stat file", err))?
                .len();
            let content = if size <= content_limit {
                let bytes =
                    fs::read(&path).map_err(|err| RunnerError::io("failed to read file", err))?;
                String::from_utf8(bytes).unwrap_or_default()
            } else {
                String::new()
            };
            nodes.push(FileTreeNode {
                id: id.clone(),
                name: name.clone(),
                kind: NodeKind::File,
                children: Vec::new(),
                file: Some(TreeFile {
                    language: language_for(&name).to_string(),
                    name,
                    path: id,
                    content,
                    size,
                }),
            });
        }
    }
    Ok(nodes)
}
