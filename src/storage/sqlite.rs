//! SQLite storage backend for the FMEA graph

use super::traits::{GraphStore, NodeFilter, OpenStore, StorageError, StorageResult};
use crate::graph::{Edge, Node, NodeKind, NodeRef, Relationship};
use crate::normalize::normalize;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed graph store
///
/// Uses one database file with a `nodes` table keyed by (kind, id) and an
/// `edges` table keyed by (source, target, relationship). The edge primary
/// key is what makes edge writes idempotent.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

type NodeRow = (String, i64, Option<String>, String);
type EdgeRow = (String, i64, String, i64, String, String);

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                kind TEXT NOT NULL,
                id INTEGER NOT NULL,
                name TEXT,
                properties_json TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_name
                ON nodes(kind, name);

            CREATE TABLE IF NOT EXISTS edges (
                source_kind TEXT NOT NULL,
                source_id INTEGER NOT NULL,
                target_kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                relationship TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                PRIMARY KEY (source_kind, source_id, target_kind, target_id, relationship)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON edges(target_kind, target_id);
            CREATE INDEX IF NOT EXISTS idx_edges_relationship
                ON edges(relationship);

            -- Enable WAL mode so retrieval reads never block on the importer
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn row_to_node(row: NodeRow) -> StorageResult<Node> {
        let (kind, id, name, properties_json) = row;
        Ok(Node {
            kind: parse_kind(&kind)?,
            id,
            name,
            properties: serde_json::from_str(&properties_json)?,
        })
    }

    fn row_to_edge(row: EdgeRow) -> StorageResult<Edge> {
        let (source_kind, source_id, target_kind, target_id, relationship, properties_json) = row;
        Ok(Edge {
            source: NodeRef::new(parse_kind(&source_kind)?, source_id),
            target: NodeRef::new(parse_kind(&target_kind)?, target_id),
            relationship: relationship
                .parse::<Relationship>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            properties: serde_json::from_str(&properties_json)?,
        })
    }

    fn query_edges(
        &self,
        anchor_columns: (&str, &str),
        node: NodeRef,
        relationship: Option<Relationship>,
    ) -> StorageResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = format!(
            "SELECT source_kind, source_id, target_kind, target_id, relationship, properties_json
             FROM edges WHERE {} = ?1 AND {} = ?2",
            anchor_columns.0, anchor_columns.1
        );
        if relationship.is_some() {
            sql.push_str(" AND relationship = ?3");
        }
        sql.push_str(" ORDER BY source_kind, source_id, target_kind, target_id");

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        };
        let rows = match relationship {
            Some(rel) => stmt
                .query_map(params![node.kind.as_str(), node.id, rel.as_str()], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![node.kind.as_str(), node.id], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };

        rows.into_iter().map(Self::row_to_edge).collect()
    }
}

fn parse_kind(kind: &str) -> StorageResult<NodeKind> {
    kind.parse::<NodeKind>()
        .map_err(|e| StorageError::Corrupt(e.to_string()))
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteStore {
    // === Lifecycle ===

    fn clear(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DELETE FROM edges; DELETE FROM nodes;")?;
        Ok(())
    }

    // === Node Operations ===

    fn upsert_node(&self, node: &Node) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let properties = serde_json::to_string(&node.properties)?;

        conn.execute(
            r#"
            INSERT INTO nodes (kind, id, name, properties_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(kind, id) DO UPDATE SET
                name = excluded.name,
                properties_json = excluded.properties_json
            "#,
            params![node.kind.as_str(), node.id, node.name, properties],
        )?;

        Ok(())
    }

    fn load_node(&self, node_ref: NodeRef) -> StorageResult<Option<Node>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<NodeRow> = conn
            .query_row(
                "SELECT kind, id, name, properties_json FROM nodes WHERE kind = ?1 AND id = ?2",
                params![node_ref.kind.as_str(), node_ref.id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(Self::row_to_node).transpose()
    }

    fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<Node>> {
        let rows: Vec<NodeRow> = {
            let conn = self.conn.lock().unwrap();
            let mut sql = String::from("SELECT kind, id, name, properties_json FROM nodes");
            if filter.kind.is_some() {
                sql.push_str(" WHERE kind = ?1");
            }
            sql.push_str(" ORDER BY kind, id");

            let mut stmt = conn.prepare(&sql)?;
            let map_row = |row: &rusqlite::Row<'_>| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            };
            match filter.kind {
                Some(kind) => stmt
                    .query_map(params![kind.as_str()], map_row)?
                    .collect::<Result<Vec<_>, _>>()?,
                None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
            }
        };

        // Unicode-aware case folding happens here rather than in SQL
        let mut nodes = Vec::new();
        for row in rows {
            let node = Self::row_to_node(row)?;
            if filter.matches(&node) {
                nodes.push(node);
                if filter.limit.is_some_and(|limit| nodes.len() >= limit) {
                    break;
                }
            }
        }
        Ok(nodes)
    }

    fn count_nodes(&self, kind: NodeKind) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn normalize_names(&self) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let rows: Vec<(String, i64, String)> = {
            let mut stmt =
                tx.prepare("SELECT kind, id, name FROM nodes WHERE name IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut changed = 0;
        for (kind, id, name) in rows {
            let cleaned = normalize(&name);
            if cleaned != name {
                tx.execute(
                    "UPDATE nodes SET name = ?1 WHERE kind = ?2 AND id = ?3",
                    params![cleaned, kind, id],
                )?;
                changed += 1;
            }
        }

        tx.commit()?;
        Ok(changed)
    }

    // === Edge Operations ===

    fn upsert_edge(&self, edge: &Edge) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let properties = serde_json::to_string(&edge.properties)?;

        let rows = conn.execute(
            r#"
            INSERT INTO edges (source_kind, source_id, target_kind, target_id, relationship, properties_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(source_kind, source_id, target_kind, target_id, relationship) DO NOTHING
            "#,
            params![
                edge.source.kind.as_str(),
                edge.source.id,
                edge.target.kind.as_str(),
                edge.target.id,
                edge.relationship.as_str(),
                properties
            ],
        )?;

        Ok(rows > 0)
    }

    fn edges_from(
        &self,
        node: NodeRef,
        relationship: Option<Relationship>,
    ) -> StorageResult<Vec<Edge>> {
        self.query_edges(("source_kind", "source_id"), node, relationship)
    }

    fn edges_to(
        &self,
        node: NodeRef,
        relationship: Option<Relationship>,
    ) -> StorageResult<Vec<Edge>> {
        self.query_edges(("target_kind", "target_id"), node, relationship)
    }

    fn count_edges(&self, relationship: Option<Relationship>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = match relationship {
            Some(rel) => conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE relationship = ?1",
                params![rel.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }
}
