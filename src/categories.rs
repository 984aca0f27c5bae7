//! Category tree engine and outline trees.
//!
//! Trees are loaded once into an arena keyed by ID with a `children_by_parent`
//! multimap, so walks never rescan the row list.

use crate::db::{Category, Database, Section};
use crate::error::{AppError, Result};
use std::collections::{HashMap, HashSet};

/// Row that belongs to a self-referencing tree.
pub trait TreeNode {
    /// Node ID.
    fn id(&self) -> i64;
    /// Parent ID, `None` for roots.
    fn parent_id(&self) -> Option<i64>;
}

impl TreeNode for Category {
    fn id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        // Legacy rows use 0 for "no parent".
        self.parent_id.filter(|p| *p != 0)
    }
}

impl TreeNode for Section {
    fn id(&self) -> i64 {
        self.id
    }

    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
}

/// Arena of tree nodes.
#[derive(Debug, Clone)]
pub struct Forest<T> {
    nodes: HashMap<i64, T>,
    children_by_parent: HashMap<Option<i64>, Vec<i64>>,
}

impl<T: TreeNode> Forest<T> {
    /// Build from rows; sibling order follows row order.
    pub fn from_rows(rows: Vec<T>) -> Self {
        let mut children_by_parent: HashMap<Option<i64>, Vec<i64>> = HashMap::new();
        let ids: HashSet<i64> = rows.iter().map(|r| r.id()).collect();

        for row in &rows {
            // A dangling parent makes the node a root.
            let parent = row.parent_id().filter(|p| ids.contains(p));
            children_by_parent.entry(parent).or_default().push(row.id());
        }

        let nodes = rows.into_iter().map(|r| (r.id(), r)).collect();
        Self {
            nodes,
            children_by_parent,
        }
    }

    /// Node by ID.
    pub fn get(&self, id: i64) -> Option<&T> {
        self.nodes.get(&id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `parent` (`None` for roots).
    pub fn children_of(&self, parent: Option<i64>) -> Vec<&T> {
        self.children_by_parent
            .get(&parent)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Root nodes.
    pub fn roots(&self) -> Vec<&T> {
        self.children_of(None)
    }

    /// Depth-first walk from the roots as `(depth, node)`.
    ///
    /// Nodes caught in a parent cycle are not reachable from a root and are
    /// left out; see [`Forest::unreachable`].
    pub fn walk(&self) -> Vec<(usize, &T)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        self.walk_from(None, 0, &mut visited, &mut out);
        out
    }

    fn walk_from<'a>(
        &'a self,
        parent: Option<i64>,
        depth: usize,
        visited: &mut HashSet<i64>,
        out: &mut Vec<(usize, &'a T)>,
    ) {
        for child in self.children_of(parent) {
            if !visited.insert(child.id()) {
                continue;
            }
            out.push((depth, child));
            self.walk_from(Some(child.id()), depth + 1, visited, out);
        }
    }

    /// Nodes never reached by [`Forest::walk`].
    pub fn unreachable(&self) -> Vec<&T> {
        let reached: HashSet<i64> = self.walk().into_iter().map(|(_, n)| n.id()).collect();
        let mut rest: Vec<&T> = self
            .nodes
            .values()
            .filter(|n| !reached.contains(&n.id()))
            .collect();
        rest.sort_by_key(|n| n.id());
        rest
    }

    /// Whether `node` lies in the subtree rooted at `ancestor` (itself included).
    pub fn is_in_subtree(&self, node: i64, ancestor: i64) -> bool {
        let mut current = Some(node);
        let mut seen = HashSet::new();
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            if !seen.insert(id) {
                return false;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent_id());
        }
        false
    }
}

/// Category arena.
pub type CategoryTree = Forest<Category>;

/// Section arena of one chapter.
pub type SectionTree = Forest<Section>;

impl SectionTree {
    /// Load the sections of a chapter.
    pub fn load(db: &Database, chapter_id: i64) -> Result<Self> {
        Ok(Self::from_rows(db.list_sections(chapter_id)?))
    }
}

/// Business rules over the category hierarchy.
#[derive(Clone)]
pub struct CategoryEngine {
    db: Database,
}

impl CategoryEngine {
    /// Create an engine over a catalog.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a category under an existing parent.
    pub fn create(
        &self,
        name: &str,
        parent_id: Option<i64>,
        description: Option<&str>,
    ) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Constraint("Category name is empty".to_string()));
        }
        if let Some(parent) = parent_id
            && self.db.get_category(parent)?.is_none()
        {
            return Err(AppError::NotFound(format!("Category {}", parent)));
        }

        let category = self.db.create_category(name, parent_id, description)?;
        tracing::info!(id = category.id, name = %category.name, parent = ?parent_id, "Created category");
        Ok(category)
    }

    /// Name-ordered children of `parent_id` (`None` for roots).
    pub fn children_of(&self, parent_id: Option<i64>) -> Result<Vec<Category>> {
        self.db.child_categories(parent_id)
    }

    /// Materialize the full tree.
    pub fn tree(&self) -> Result<CategoryTree> {
        Ok(CategoryTree::from_rows(self.db.list_categories()?))
    }

    /// Delete a category. Rejected while it has subcategories.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let children = self.db.count_child_categories(id)?;
        if children > 0 {
            return Err(AppError::Constraint(format!(
                "Category {} has {} subcategories",
                id, children
            )));
        }

        let deleted = self.db.delete_category(id)?;
        if deleted {
            tracing::info!(id, "Deleted category");
        }
        Ok(deleted)
    }

    /// Move a category under `new_parent` (`None` makes it a root).
    ///
    /// Rejects self-parenting and any move that would close a cycle.
    pub fn reparent(&self, id: i64, new_parent: Option<i64>) -> Result<bool> {
        let Some(mut category) = self.db.get_category(id)? else {
            return Ok(false);
        };

        if let Some(parent) = new_parent {
            if parent == id {
                return Err(AppError::Constraint(format!(
                    "Category '{}' cannot be its own parent",
                    category.name
                )));
            }
            let tree = self.tree()?;
            if tree.get(parent).is_none() {
                return Err(AppError::NotFound(format!("Category {}", parent)));
            }
            if tree.is_in_subtree(parent, id) {
                return Err(AppError::Constraint(format!(
                    "Moving '{}' under category {} would create a cycle",
                    category.name, parent
                )));
            }
        }

        category.parent_id = new_parent;
        self.db.update_category(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: i64, parent: Option<i64>, name: &str) -> Category {
        Category {
            id,
            parent_id: parent,
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_walk_depths() {
        let tree = CategoryTree::from_rows(vec![
            cat(1, None, "Math"),
            cat(2, Some(1), "Algebra"),
            cat(3, Some(2), "Groups"),
            cat(4, Some(0), "Physics"),
        ]);

        let walked: Vec<(usize, &str)> = tree
            .walk()
            .into_iter()
            .map(|(d, c)| (d, c.name.as_str()))
            .collect();
        assert_eq!(
            walked,
            vec![(0, "Math"), (1, "Algebra"), (2, "Groups"), (0, "Physics")]
        );
    }

    #[test]
    fn test_cycle_is_unreachable_not_infinite() {
        let tree = CategoryTree::from_rows(vec![
            cat(1, None, "Root"),
            cat(2, Some(3), "A"),
            cat(3, Some(2), "B"),
        ]);

        assert_eq!(tree.walk().len(), 1);
        let ids: Vec<i64> = tree.unreachable().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(!tree.is_in_subtree(2, 1));
    }

    #[test]
    fn test_is_in_subtree() {
        let tree = CategoryTree::from_rows(vec![
            cat(1, None, "Math"),
            cat(2, Some(1), "Algebra"),
            cat(3, Some(2), "Groups"),
        ]);
        assert!(tree.is_in_subtree(3, 1));
        assert!(tree.is_in_subtree(2, 2));
        assert!(!tree.is_in_subtree(1, 3));
    }
}
