//! Post-merge catalog: story ids, resolved dependencies and delivery order.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::models::Story;

/// Keys the catalog writes itself; stale copies in `Story::extra` are dropped.
const CATALOG_KEYS: [&str; 3] = ["id", "dependency_ids", "unresolved_dependencies"];

/// A merged story with its catalog id and resolved dependencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// `STORY-001`, `STORY-002`, ... in merged order
    pub id: String,

    #[serde(flatten)]
    pub story: Story,

    /// One entry per dependency: the story id, or the reference verbatim if unresolved
    pub dependency_ids: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved_dependencies: Vec<String>,
}

/// Totals over a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub stories: usize,
    pub story_points: u64,
    pub unresolved_dependencies: usize,
    pub cyclic_stories: usize,
}

/// Merged stories in dependency order.
#[derive(Debug, Clone, Serialize)]
pub struct StoryCatalog {
    pub entries: Vec<CatalogEntry>,
    /// Ids of stories caught in a dependency cycle
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cyclic: Vec<String>,
}

impl StoryCatalog {
    /// Assign ids, resolve dependencies by title and order the stories.
    pub fn build(stories: &[Story]) -> Self {
        let ids: Vec<String> = (1..=stories.len()).map(|n| format!("STORY-{n:03}")).collect();

        let mut exact: HashMap<&str, usize> = HashMap::new();
        let mut folded: HashMap<String, usize> = HashMap::new();
        for (idx, story) in stories.iter().enumerate() {
            exact.entry(story.title.as_str()).or_insert(idx);
            folded.entry(story.title.trim().to_lowercase()).or_insert(idx);
        }

        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); stories.len()];
        let mut entries: Vec<CatalogEntry> = Vec::with_capacity(stories.len());
        for (idx, story) in stories.iter().enumerate() {
            let mut dependency_ids = Vec::with_capacity(story.dependencies.len());
            let mut unresolved = Vec::new();
            for reference in &story.dependencies {
                let target = exact
                    .get(reference.as_str())
                    .copied()
                    .or_else(|| folded.get(&reference.trim().to_lowercase()).copied());
                match target {
                    Some(target) => {
                        dependency_ids.push(ids[target].clone());
                        if target != idx && !edges[target].contains(&idx) {
                            edges[target].push(idx);
                        }
                    }
                    None => {
                        dependency_ids.push(reference.clone());
                        unresolved.push(reference.clone());
                    }
                }
            }
            let mut story = story.clone();
            for key in CATALOG_KEYS {
                story.extra.remove(key);
            }
            entries.push(CatalogEntry {
                id: ids[idx].clone(),
                story,
                dependency_ids,
                unresolved_dependencies: unresolved,
            });
        }

        let (order, cyclic) = dependency_order(&edges);
        let cyclic_ids: Vec<String> = cyclic.iter().map(|&i| ids[i].clone()).collect();
        if !cyclic_ids.is_empty() {
            warn!(stories = ?cyclic_ids, "Dependency cycle detected; appending stories in merged order");
        }

        let mut slots: Vec<Option<CatalogEntry>> = entries.into_iter().map(Some).collect();
        let entries: Vec<CatalogEntry> = order
            .into_iter()
            .chain(cyclic)
            .filter_map(|idx| slots[idx].take())
            .collect();
        debug!(stories = entries.len(), "Built story catalog");

        Self {
            entries,
            cyclic: cyclic_ids,
        }
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            stories: self.entries.len(),
            story_points: self
                .entries
                .iter()
                .map(|e| u64::from(e.story.story_points))
                .sum(),
            unresolved_dependencies: self
                .entries
                .iter()
                .map(|e| e.unresolved_dependencies.len())
                .sum(),
            cyclic_stories: self.cyclic.len(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Stable Kahn ordering: among ready stories the earliest merged position goes
/// first. Returns the ordered prefix and the stories left over by cycles.
fn dependency_order(edges: &[Vec<usize>]) -> (Vec<usize>, Vec<usize>) {
    let mut in_degree = vec![0usize; edges.len()];
    for dependents in edges {
        for &dependent in dependents {
            in_degree[dependent] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &edges[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    let cyclic = (0..edges.len()).filter(|&idx| in_degree[idx] > 0).collect();
    (order, cyclic)
}
