//! Schema-graph path finder.
//!
//! Projects column-level schema edges onto table-to-table adjacency and
//! enumerates **all simple paths** between two anchor tables with a
//! breadth-first search bounded by depth and an expansion budget. Callers
//! building a JOIN want the alternative bridge tables, not just the
//! shortest route, so the search keeps going past the first match.
//!
//! Traversal is direction-agnostic; each reported hop is oriented along
//! the path while keeping the edge's own cardinality and inferred flag.
//! Budget exhaustion truncates the enumeration (flagged on the result)
//! instead of failing; relationship graphs can fan out combinatorially
//! even inside the depth bound.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::error::{AtlasError, Result};
use crate::models::RelationshipKind;
use crate::store::{EdgeEnds, Store};

/// A path-finding request. Anchors accept a table slug or physical name.
#[derive(Debug, Clone)]
pub struct PathRequest {
    pub source: String,
    pub target: String,
    pub datasource_slug: Option<String>,
    pub max_depth: usize,
}

/// One endpoint of a hop.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub table_slug: String,
    pub table_name: String,
    pub column_slug: String,
    pub column_name: String,
}

/// One traversed relationship, oriented along the path.
#[derive(Debug, Clone, Serialize)]
pub struct PathHop {
    pub source: GraphNode,
    pub target: GraphNode,
    pub relationship: RelationshipKind,
    pub is_inferred: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub source_table: String,
    pub target_table: String,
    pub paths: Vec<Vec<PathHop>>,
    pub total_paths: usize,
    /// True when the expansion budget ran out before the enumeration did.
    pub truncated: bool,
}

/// One traversal step kept while searching: the table stepped onto, which
/// edge was used, and whether it was walked source→target.
#[derive(Debug, Clone)]
struct Step {
    table_id: String,
    edge_idx: usize,
    forward: bool,
}

/// Enumerate all simple paths between two tables.
///
/// `max_expansions` bounds the number of neighbor expansions across the
/// whole search. Unresolvable anchors or datasource are `NotFound`;
/// `max_depth == 0` is `InvalidArgument`. A request with identical anchors
/// returns exactly one empty path.
pub async fn find_paths<S: Store>(
    store: &S,
    req: &PathRequest,
    max_expansions: usize,
) -> Result<PathResult> {
    if req.max_depth == 0 {
        return Err(AtlasError::invalid("max_depth must be >= 1"));
    }

    let datasource_id = match &req.datasource_slug {
        Some(slug) => Some(
            store
                .datasource_id_by_slug(slug)
                .await?
                .ok_or_else(|| AtlasError::not_found(format!("datasource '{}'", slug)))?,
        ),
        None => None,
    };

    let source = store
        .table_by_anchor(datasource_id.as_deref(), &req.source)
        .await?
        .ok_or_else(|| AtlasError::not_found(format!("source table '{}'", req.source)))?;
    let target = store
        .table_by_anchor(datasource_id.as_deref(), &req.target)
        .await?
        .ok_or_else(|| AtlasError::not_found(format!("target table '{}'", req.target)))?;

    if source.id == target.id {
        return Ok(PathResult {
            source_table: source.physical_name,
            target_table: target.physical_name,
            paths: vec![Vec::new()],
            total_paths: 1,
            truncated: false,
        });
    }

    let mut edges = store.edge_endpoints(datasource_id.as_deref()).await?;
    edges.sort_by(|a, b| a.edge.id.cmp(&b.edge.id));

    // Table-level adjacency, both orientations of every edge.
    let mut adjacency: HashMap<&str, Vec<(usize, &str, bool)>> = HashMap::new();
    for (idx, ends) in edges.iter().enumerate() {
        adjacency
            .entry(ends.source_table_id.as_str())
            .or_default()
            .push((idx, ends.target_table_id.as_str(), true));
        adjacency
            .entry(ends.target_table_id.as_str())
            .or_default()
            .push((idx, ends.source_table_id.as_str(), false));
    }

    let mut queue: VecDeque<(String, Vec<Step>)> = VecDeque::new();
    queue.push_back((source.id.clone(), Vec::new()));

    let mut found: Vec<Vec<Step>> = Vec::new();
    let mut expansions = 0usize;
    let mut truncated = false;

    'search: while let Some((current, path)) = queue.pop_front() {
        if current == target.id && !path.is_empty() {
            found.push(path);
            continue;
        }
        if path.len() == req.max_depth {
            continue;
        }

        let Some(neighbors) = adjacency.get(current.as_str()) else {
            continue;
        };

        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(source.id.as_str());
        for step in &path {
            visited.insert(step.table_id.as_str());
        }

        for &(edge_idx, neighbor, forward) in neighbors {
            if visited.contains(neighbor) {
                continue;
            }
            expansions += 1;
            if expansions > max_expansions {
                truncated = true;
                break 'search;
            }
            let mut next = path.clone();
            next.push(Step {
                table_id: neighbor.to_string(),
                edge_idx,
                forward,
            });
            queue.push_back((neighbor.to_string(), next));
        }
    }

    let paths = hydrate_paths(store, &source.id, &edges, &found).await?;
    let total_paths = paths.len();

    Ok(PathResult {
        source_table: source.physical_name,
        target_table: target.physical_name,
        paths,
        total_paths,
        truncated,
    })
}

/// Turn raw step sequences into labeled hops with two batched loads
/// (columns then tables) for everything the found paths touch.
async fn hydrate_paths<S: Store>(
    store: &S,
    source_id: &str,
    edges: &[EdgeEnds],
    found: &[Vec<Step>],
) -> Result<Vec<Vec<PathHop>>> {
    let mut column_ids: HashSet<String> = HashSet::new();
    let mut table_ids: HashSet<String> = HashSet::new();
    table_ids.insert(source_id.to_string());

    for path in found {
        for step in path {
            let ends = &edges[step.edge_idx];
            column_ids.insert(ends.edge.source_column_id.clone());
            column_ids.insert(ends.edge.target_column_id.clone());
            table_ids.insert(ends.source_table_id.clone());
            table_ids.insert(ends.target_table_id.clone());
        }
    }

    let columns = store
        .columns_by_ids(&column_ids.into_iter().collect::<Vec<_>>())
        .await?;
    let tables = store
        .tables_by_ids(&table_ids.into_iter().collect::<Vec<_>>())
        .await?;

    let col_by_id: HashMap<&str, &crate::models::ColumnNode> =
        columns.iter().map(|c| (c.id.as_str(), c)).collect();
    let table_by_id: HashMap<&str, &crate::models::TableNode> =
        tables.iter().map(|t| (t.id.as_str(), t)).collect();

    let node = |table_id: &str, column_id: &str| -> GraphNode {
        let (table_slug, table_name) = table_by_id
            .get(table_id)
            .map(|t| (t.slug.clone(), t.physical_name.clone()))
            .unwrap_or_else(|| ("unknown".into(), "unknown".into()));
        let (column_slug, column_name) = col_by_id
            .get(column_id)
            .map(|c| (c.slug.clone(), c.name.clone()))
            .unwrap_or_else(|| ("unknown".into(), "unknown".into()));
        GraphNode {
            table_slug,
            table_name,
            column_slug,
            column_name,
        }
    };

    let mut out = Vec::with_capacity(found.len());
    for path in found {
        let mut hops = Vec::with_capacity(path.len());
        let mut current = source_id.to_string();
        for step in path {
            let ends = &edges[step.edge_idx];
            // Orient the hop along the walk; the relationship tag stays
            // the edge's own.
            let (src_col, dst_col) = if step.forward {
                (&ends.edge.source_column_id, &ends.edge.target_column_id)
            } else {
                (&ends.edge.target_column_id, &ends.edge.source_column_id)
            };
            hops.push(PathHop {
                source: node(&current, src_col),
                target: node(&step.table_id, dst_col),
                relationship: ends.edge.relationship,
                is_inferred: ends.edge.is_inferred,
                description: ends.edge.description.clone(),
            });
            current = step.table_id.clone();
        }
        out.push(hops);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnNode, Datasource, EngineDialect, SchemaEdge, TableNode};
    use crate::store::memory::MemoryStore;

    fn table(id: &str, ds: &str, slug: &str) -> TableNode {
        TableNode {
            id: id.into(),
            datasource_id: ds.into(),
            physical_name: format!("t_{}", slug),
            slug: slug.into(),
            semantic_name: slug.into(),
            description: None,
            ddl_context: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn column(id: &str, table_id: &str, name: &str) -> ColumnNode {
        ColumnNode {
            id: id.into(),
            table_id: table_id.into(),
            name: name.into(),
            slug: name.replace('_', "-"),
            semantic_name: None,
            data_type: "INT".into(),
            is_primary_key: name == "id",
            description: None,
            context_note: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn edge(id: &str, src_col: &str, dst_col: &str) -> SchemaEdge {
        SchemaEdge {
            id: id.into(),
            source_column_id: src_col.into(),
            target_column_id: dst_col.into(),
            relationship: RelationshipKind::ManyToOne,
            is_inferred: false,
            description: None,
            context_note: None,
            created_at: 0,
        }
    }

    /// Diamond: orders → customers directly, and orders → addresses →
    /// customers as a two-hop alternative.
    fn diamond() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_datasource(Datasource {
            id: "ds1".into(),
            name: "Sales".into(),
            slug: "sales".into(),
            description: None,
            engine: EngineDialect::Postgres,
            context_signature: None,
            created_at: 0,
            updated_at: 0,
        });
        store.insert_table(table("t1", "ds1", "orders"));
        store.insert_table(table("t2", "ds1", "customers"));
        store.insert_table(table("t3", "ds1", "addresses"));
        store.insert_column(column("c1", "t1", "customer_id"));
        store.insert_column(column("c2", "t2", "id"));
        store.insert_column(column("c3", "t1", "ship_addr_id"));
        store.insert_column(column("c4", "t3", "id"));
        store.insert_column(column("c5", "t3", "customer_id"));
        store.insert_edge(edge("e1", "c1", "c2"));
        store.insert_edge(edge("e2", "c3", "c4"));
        store.insert_edge(edge("e3", "c5", "c2"));
        store
    }

    fn request(source: &str, target: &str, depth: usize) -> PathRequest {
        PathRequest {
            source: source.into(),
            target: target.into(),
            datasource_slug: Some("sales".into()),
            max_depth: depth,
        }
    }

    #[tokio::test]
    async fn test_enumerates_all_simple_paths() {
        let store = diamond();
        let result = find_paths(&store, &request("orders", "customers", 3), 10_000)
            .await
            .unwrap();

        assert_eq!(result.total_paths, 2);
        assert!(!result.truncated);

        // No table appears twice within any path, and depth is respected.
        for path in &result.paths {
            assert!(path.len() <= 3);
            let mut seen = std::collections::HashSet::new();
            seen.insert(path[0].source.table_slug.clone());
            for hop in path {
                assert!(seen.insert(hop.target.table_slug.clone()));
            }
        }
    }

    #[tokio::test]
    async fn test_depth_bound_prunes_long_route() {
        let store = diamond();
        let result = find_paths(&store, &request("orders", "customers", 1), 10_000)
            .await
            .unwrap();
        assert_eq!(result.total_paths, 1);
        assert_eq!(result.paths[0].len(), 1);
    }

    #[tokio::test]
    async fn test_trivial_path_when_source_equals_target() {
        let store = diamond();
        let result = find_paths(&store, &request("orders", "orders", 3), 10_000)
            .await
            .unwrap();
        assert_eq!(result.total_paths, 1);
        assert!(result.paths[0].is_empty());
    }

    #[tokio::test]
    async fn test_unknown_anchor_is_not_found() {
        let store = diamond();
        let err = find_paths(&store, &request("orders", "ghosts", 3), 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AtlasError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_zero_depth_is_invalid() {
        let store = diamond();
        let err = find_paths(&store, &request("orders", "customers", 0), 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_truncates() {
        let store = diamond();
        let result = find_paths(&store, &request("orders", "customers", 3), 1)
            .await
            .unwrap();
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_physical_name_resolves_as_anchor() {
        let store = diamond();
        let result = find_paths(&store, &request("t_orders", "t_customers", 2), 10_000)
            .await
            .unwrap();
        assert!(result.total_paths >= 1);
        assert_eq!(result.source_table, "t_orders");
    }

    #[tokio::test]
    async fn test_reverse_hop_is_oriented_along_walk() {
        let store = diamond();
        let result = find_paths(&store, &request("customers", "orders", 1), 10_000)
            .await
            .unwrap();
        assert_eq!(result.total_paths, 1);
        let hop = &result.paths[0][0];
        // Walked against the edge direction: endpoints swap, tag stays.
        assert_eq!(hop.source.table_slug, "customers");
        assert_eq!(hop.target.table_slug, "orders");
        assert_eq!(hop.relationship, RelationshipKind::ManyToOne);
    }
}
