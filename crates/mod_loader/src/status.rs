//! Diagnostic status trees.
//!
//! Failure reports are rendered into a [`StatusTree`]: tabs, each holding a
//! tree of nodes with a warning level. Nodes live in one arena and refer to
//! each other by [`NodeId`], so re-parenting and merging are index rewrites.

use serde::Serialize;
use std::error::Error;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Error,
    Warn,
    Info,
    None,
}

impl WarningLevel {
    fn rank(self) -> u8 {
        match self {
            WarningLevel::Error => 3,
            WarningLevel::Warn => 2,
            WarningLevel::Info => 1,
            WarningLevel::None => 0,
        }
    }

    pub fn is_higher_than(self, other: WarningLevel) -> bool {
        self.rank() > other.rank()
    }

    pub fn is_at_least(self, other: WarningLevel) -> bool {
        self.rank() >= other.rank()
    }

    /// Maps the one-character line prefix used by [`StatusTree::add_child`].
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '-' => Some(WarningLevel::None),
            '+' => Some(WarningLevel::Info),
            '!' => Some(WarningLevel::Warn),
            'x' => Some(WarningLevel::Error),
            _ => None,
        }
    }

    fn marker(self) -> &'static str {
        match self {
            WarningLevel::Error => "[x]",
            WarningLevel::Warn => "[!]",
            WarningLevel::Info => "[+]",
            WarningLevel::None => "[-]",
        }
    }
}

pub const ICON_MODULE: &str = "jar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct StatusNode {
    pub name: String,
    pub icon: String,
    /// Extra text shown on demand, such as an error's debug dump.
    pub details: Option<String>,
    pub expand_by_default: bool,
    level: WarningLevel,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl StatusNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            icon: String::new(),
            details: None,
            expand_by_default: false,
            level: WarningLevel::None,
            parent,
            children: Vec::new(),
        }
    }

    pub fn level(&self) -> WarningLevel {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct StatusTab {
    pub root: NodeId,
    /// Minimum level shown in this tab.
    pub filter_level: WarningLevel,
}

#[derive(Debug, Clone)]
pub struct StatusTree {
    pub title: String,
    pub main_text: String,
    nodes: Vec<StatusNode>,
    tabs: Vec<StatusTab>,
}

impl StatusTree {
    pub fn new(title: impl Into<String>, main_text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            main_text: main_text.into(),
            nodes: Vec::new(),
            tabs: Vec::new(),
        }
    }

    /// Builds a single-tab tree from an error and its `source()` chain.
    pub fn from_error(title: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        let mut tree = Self::new(title, error.to_string());
        let root = tree.add_tab("Errors");
        tree.add_error(root, error);
        tree
    }

    /// Adds a tab and returns its root node.
    pub fn add_tab(&mut self, name: &str) -> NodeId {
        let root = self.alloc(StatusNode::new(name.to_string(), None));
        self.tabs.push(StatusTab {
            root,
            filter_level: WarningLevel::None,
        });
        root
    }

    pub fn tabs(&self) -> &[StatusTab] {
        &self.tabs
    }

    pub fn node(&self, id: NodeId) -> &StatusNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut StatusNode {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, node: StatusNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Adds a child parsed from the line syntax.
    ///
    /// Leading tabs nest the line under the last child at each depth, a
    /// level character followed by whitespace (`x`, `!`, `+`, `-`) sets the
    /// warning level, and a `$icon$` prefix sets the icon.
    pub fn add_child(&mut self, parent: NodeId, line: &str) -> NodeId {
        let indent = line.chars().take_while(|c| *c == '\t').count();
        let mut text = line[indent..].trim();

        let mut level = None;
        let mut chars = text.chars();
        if let (Some(first), Some(second)) = (chars.next(), chars.next()) {
            if second.is_whitespace() {
                if let Some(parsed) = WarningLevel::from_char(first) {
                    level = Some(parsed);
                    text = text[first.len_utf8()..].trim();
                }
            }
        }

        let mut icon = String::new();
        if text.len() > 3 && text.starts_with('$') {
            if let Some(end) = text[1..].find('$') {
                let candidate = &text[1..end + 1];
                if !candidate.is_empty()
                    && candidate
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || matches!(c, '.' | '+' | '-'))
                {
                    icon = candidate.to_string();
                    text = text[end + 2..].trim();
                }
            }
        }

        let mut target = parent;
        for _ in 0..indent {
            target = match self.nodes[target.0].children.last() {
                Some(last) => *last,
                None => self.push_child(target, String::new()),
            };
            self.nodes[target.0].expand_by_default = true;
        }

        let child = self.push_child(target, text.to_string());
        self.nodes[child.0].icon = icon;
        if let Some(level) = level {
            self.set_level(child, level);
        }
        child
    }

    fn push_child(&mut self, parent: NodeId, name: String) -> NodeId {
        let child = self.alloc(StatusNode::new(name, Some(parent)));
        self.nodes[parent.0].children.push(child);
        child
    }

    /// Raises `id` to `level`, propagating to ancestors. Never lowers a level.
    pub fn set_level(&mut self, id: NodeId, level: WarningLevel) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &mut self.nodes[node_id.0];
            if !level.is_higher_than(node.level) {
                break;
            }
            node.level = level;
            node.expand_by_default |= level.is_at_least(WarningLevel::Warn);
            current = node.parent;
        }
    }

    pub fn set_error(&mut self, id: NodeId) {
        self.set_level(id, WarningLevel::Error);
    }

    pub fn set_warning(&mut self, id: NodeId) {
        self.set_level(id, WarningLevel::Warn);
    }

    /// Adds an error node for `error`, with its `source()` chain nested below.
    pub fn add_error(&mut self, parent: NodeId, error: &(dyn Error + 'static)) -> NodeId {
        let message = error.to_string();
        let mut lines = message.lines();
        let first = lines.next().unwrap_or_default().to_string();

        let node = self.push_child(parent, first);
        self.nodes[node.0].details = Some(format!("{error:?}"));
        self.set_error(node);
        for line in lines {
            self.add_child(node, line);
        }
        if let Some(source) = error.source() {
            self.add_error(node, source);
        }
        node
    }

    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Re-parents `id` under `new_parent`. Refuses moves that would create a
    /// cycle or detach a tab root.
    pub fn move_to(&mut self, id: NodeId, new_parent: NodeId) -> bool {
        let Some(old_parent) = self.nodes[id.0].parent else {
            return false;
        };
        if self.is_ancestor(id, new_parent) {
            return false;
        }

        self.nodes[old_parent.0].children.retain(|child| *child != id);
        self.nodes[id.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.push(id);

        let level = self.nodes[id.0].level;
        self.set_level(new_parent, level);
        true
    }

    /// If `id` has exactly one child, folds it into `id`: names are joined
    /// with `join` and the grandchildren move up.
    pub fn merge_with_single_child(&mut self, id: NodeId, join: &str) {
        if self.nodes[id.0].children.len() != 1 {
            return;
        }
        let child = self.nodes[id.0].children.remove(0);
        let child_name = std::mem::take(&mut self.nodes[child.0].name);
        let grandchildren = std::mem::take(&mut self.nodes[child.0].children);
        self.nodes[child.0].parent = None;

        for grandchild in &grandchildren {
            self.nodes[grandchild.0].parent = Some(id);
        }

        let node = &mut self.nodes[id.0];
        node.name.push_str(join);
        node.name.push_str(&child_name);
        node.children.extend(grandchildren);
    }

    /// Renders every tab as indented text with level markers.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        if !self.main_text.is_empty() {
            let _ = writeln!(out, "{}", self.main_text);
        }
        for tab in &self.tabs {
            self.render_node(&mut out, tab.root, 0, tab.filter_level);
        }
        out
    }

    fn render_node(&self, out: &mut String, id: NodeId, depth: usize, filter: WarningLevel) {
        let node = &self.nodes[id.0];
        if !node.level.is_at_least(filter) {
            return;
        }
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}{} {}", node.level.marker(), node.name);
        for child in &node.children {
            self.render_node(out, *child, depth + 1, filter);
        }
    }

    /// Serializes the tree as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct TabView {
            level: WarningLevel,
            node: NodeView,
        }

        #[derive(Serialize)]
        struct TreeView<'a> {
            title: &'a str,
            main_text: &'a str,
            tabs: Vec<TabView>,
        }

        let view = TreeView {
            title: &self.title,
            main_text: &self.main_text,
            tabs: self
                .tabs
                .iter()
                .map(|tab| TabView {
                    level: tab.filter_level,
                    node: self.view(tab.root),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&view)
    }

    fn view(&self, id: NodeId) -> NodeView {
        let node = &self.nodes[id.0];
        NodeView {
            name: node.name.clone(),
            icon: node.icon.clone(),
            level: node.level,
            expand_by_default: node.expand_by_default,
            details: node.details.clone(),
            children: node.children.iter().map(|child| self.view(*child)).collect(),
        }
    }
}

#[derive(Serialize)]
struct NodeView {
    name: String,
    icon: String,
    level: WarningLevel,
    expand_by_default: bool,
    details: Option<String>,
    children: Vec<NodeView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_propagates_to_ancestors() {
        let mut tree = StatusTree::new("title", "main");
        let root = tree.add_tab("Errors");
        let module = tree.add_child(root, "mod-a");
        let reason = tree.add_child(module, "x missing dependency");

        assert_eq!(tree.node(reason).level(), WarningLevel::Error);
        assert_eq!(tree.node(module).level(), WarningLevel::Error);
        assert_eq!(tree.node(root).level(), WarningLevel::Error);
        assert!(tree.node(module).expand_by_default);

        // Lower levels never overwrite higher ones.
        tree.set_level(module, WarningLevel::Info);
        assert_eq!(tree.node(module).level(), WarningLevel::Error);
    }

    #[test]
    fn test_line_syntax_indent_and_icon() {
        let mut tree = StatusTree::new("t", "");
        let root = tree.add_tab("tab");
        let parent = tree.add_child(root, "$jar$ mod-a");
        let nested = tree.add_child(root, "\t! needs lib");

        assert_eq!(tree.node(parent).icon, ICON_MODULE);
        assert_eq!(tree.node(parent).name, "mod-a");
        assert_eq!(tree.node(nested).parent(), Some(parent));
        assert_eq!(tree.node(nested).name, "needs lib");
        assert_eq!(tree.node(parent).level(), WarningLevel::Warn);
    }

    #[test]
    fn test_move_and_merge_rewrite_indices() {
        let mut tree = StatusTree::new("t", "");
        let root = tree.add_tab("files");
        let a = tree.add_child(root, "a");
        let b = tree.add_child(a, "b");
        let c = tree.add_child(b, "c");
        let d = tree.add_child(root, "d");

        assert!(!tree.move_to(a, c), "moving under a descendant must be refused");
        assert!(tree.move_to(d, c));
        assert_eq!(tree.node(d).parent(), Some(c));
        assert_eq!(tree.node(root).children(), &[a]);

        tree.merge_with_single_child(a, "/");
        assert_eq!(tree.node(a).name, "a/b");
        assert_eq!(tree.node(a).children(), &[c]);
        assert_eq!(tree.node(c).parent(), Some(a));
    }

    #[test]
    fn test_render_and_json() {
        let mut tree = StatusTree::new("Failed", "2 problems");
        let root = tree.add_tab("Errors");
        let module = tree.add_child(root, "mod-a");
        tree.add_child(module, "x requires lib >=1.0");

        let text = tree.render_text();
        assert!(text.contains("[x] mod-a"));
        assert!(text.contains("    [x] requires lib >=1.0"));

        let json: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
        assert_eq!(json["tabs"][0]["node"]["children"][0]["name"], "mod-a");
        assert_eq!(json["tabs"][0]["node"]["level"], "error");
    }

    #[test]
    fn test_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer failure")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let tree = StatusTree::from_error("Crash", &err);
        let text = tree.render_text();
        assert!(text.contains("outer failure"));
        assert!(text.contains("disk gone"));

        let root = tree.tabs()[0].root;
        let outer = tree.node(root).children()[0];
        assert!(tree.node(outer).details.as_deref().is_some_and(|d| d.starts_with("Outer(")));
        assert!(tree.to_json().unwrap().contains("\"details\": \"Outer("));
    }
}
