// ABOUTME: File tree and file content types for browsing a sandbox workspace
// ABOUTME: Builds a nested tree from `find` output listed inside the container

use serde::{Deserialize, Serialize};

/// Directories hidden from tree listings unless the caller overrides the patterns
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] =
    &[".git", "node_modules", "__pycache__", ".venv", "agent"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    fn directory(name: &str, path: String) -> Self {
        Self {
            node_type: NodeType::Directory,
            name: name.to_string(),
            path,
            children: Some(Vec::new()),
        }
    }

    fn file(name: &str, path: String) -> Self {
        Self {
            node_type: NodeType::File,
            name: name.to_string(),
            path,
            children: None,
        }
    }

    fn sort_recursive(&mut self) {
        if let Some(children) = self.children.as_mut() {
            children.sort_by(|a, b| {
                let a_dir = a.node_type == NodeType::Directory;
                let b_dir = b.node_type == NodeType::Directory;
                b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
            });
            for child in children.iter_mut() {
                child.sort_recursive();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileContent {
    pub file_path: String,
    pub content: String,
    pub size: u64,
    /// `utf-8`, or `base64` when the file is not valid UTF-8
    pub encoding: String,
}

/// Build a tree from lines of `<type-char> <absolute path>`
///
/// The type char follows `find -printf %y`: `d` for directories, anything else is a
/// file. Entries outside `root` are ignored.
pub fn tree_from_find_output(root: &str, output: &str) -> FileNode {
    let root = root.trim_end_matches('/');
    let root_name = root.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("/");
    let mut tree = FileNode::directory(root_name, root.to_string());

    for line in output.lines() {
        let Some((kind, path)) = line.split_once(' ') else {
            continue;
        };
        let Some(relative) = path.strip_prefix(root).and_then(|p| p.strip_prefix('/')) else {
            continue;
        };
        let components: Vec<&str> = relative.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            continue;
        }
        let node_type = if kind == "d" {
            NodeType::Directory
        } else {
            NodeType::File
        };
        insert(&mut tree, &components, node_type);
    }

    tree.sort_recursive();
    tree
}

fn insert(parent: &mut FileNode, components: &[&str], node_type: NodeType) {
    let name = components[0];
    let path = format!("{}/{}", parent.path, name);
    let last = components.len() == 1;

    let children = parent.children.get_or_insert_with(Vec::new);
    let index = match children.iter().position(|c| c.name == name) {
        Some(index) => index,
        None => {
            let node = if last && node_type == NodeType::File {
                FileNode::file(name, path)
            } else {
                FileNode::directory(name, path)
            };
            children.push(node);
            children.len() - 1
        }
    };

    if !last {
        insert(&mut children[index], &components[1..], node_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tree_from_find_output() {
        let output = "\
d /workspace/repo
f /workspace/repo/README.md
d /workspace/repo/src
f /workspace/repo/src/main.py
d /workspace/artifacts
f /etc/passwd
";
        let tree = tree_from_find_output("/workspace", output);

        assert_eq!(tree.name, "workspace");
        assert_eq!(tree.path, "/workspace");
        let children = tree.children.as_ref().unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["artifacts", "repo"]);

        let repo = &children[1];
        let repo_children = repo.children.as_ref().unwrap();
        assert_eq!(repo_children[0].name, "src");
        assert_eq!(repo_children[0].node_type, NodeType::Directory);
        assert_eq!(repo_children[1].path, "/workspace/repo/README.md");
        assert_eq!(repo_children[1].children, None);

        let main = &repo_children[0].children.as_ref().unwrap()[0];
        assert_eq!(main.path, "/workspace/repo/src/main.py");
    }

    #[test]
    fn test_tree_serializes_type_field() {
        let tree = tree_from_find_output("/workspace", "f /workspace/a.txt\n");
        let json = serde_json::to_value(&tree).unwrap();

        assert_eq!(json["type"], "directory");
        assert_eq!(json["children"][0]["type"], "file");
        assert!(json["children"][0].get("children").is_none());
    }
}
