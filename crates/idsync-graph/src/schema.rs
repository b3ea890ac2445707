//! Schema management for the identity graph.

use tracing::{error, info};

use crate::client::AlterOp;
use crate::error::GraphResult;
use crate::store::GraphStore;

/// Predicates, hash indexes and node types the store depends on.
///
/// Applying it again is a no-op for the backend.
pub const SCHEMA: &str = r#"
cookie: string @index(hash) .
issued: datetime .
Browser: [uid] .
Partner: [uid] .
addr: string @index(hash) .
useragent: string @index(hash) .
count: int .
pid: string .
pcookie: string @index(hash) .

type Browser {
    addr
    useragent
    count
}

type Partner {
    pid
    pcookie
}

type Cookie {
    cookie
    issued
    Browser
    Partner
}
"#;

impl GraphStore {
    pub async fn create_schema(&self) -> GraphResult<()> {
        self.client()
            .alter(AlterOp::Schema(SCHEMA.to_string()))
            .await
            .inspect_err(|e| error!(component = "dgraph", error = %e, "schema"))?;
        info!(component = "dgraph", "schema applied");
        Ok(())
    }

    /// Drop schema and data. Destructive; for tests and administration.
    pub async fn drop_schema(&self) -> GraphResult<()> {
        self.client().alter(AlterOp::DropAll).await?;
        info!(component = "dgraph", "schema dropped");
        Ok(())
    }

    /// Drop all data but keep the schema.
    pub async fn drop_data(&self) -> GraphResult<()> {
        self.client().alter(AlterOp::DropData).await?;
        info!(component = "dgraph", "data dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_indexes_lookup_predicates() {
        for predicate in ["cookie", "addr", "useragent", "pcookie"] {
            let line = format!("{}: string @index(hash) .", predicate);
            assert!(SCHEMA.contains(&line), "missing index for {}", predicate);
        }
        for node in ["type Cookie", "type Browser", "type Partner"] {
            assert!(SCHEMA.contains(node));
        }
    }
}
