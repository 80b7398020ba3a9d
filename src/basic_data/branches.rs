//! Bank-branch feed.
//!
//! Unlike the status-table feeds, this interface pages a source query by
//! keyset cursor and pushes each page wrapped in the ESB envelope. The
//! loop ends when the cursor stops advancing or on the first transport
//! failure; the rows carry no status column, so there is no retry phase.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::basic_data::profile::ProfileStore;
use crate::broker::{Job, JobHandler};
use crate::database::{exec, ConnectionManager, DbOutcome};
use crate::esb::EsbClient;
use crate::ora::binds::{BindMap, BoundParam};
use crate::ora::mapper::SqlType;
use crate::ora::{CompiledStatement, StatementOptions};

pub const INTERFACE_NAME: &str = "branches";
pub const TRANSPORT_QUEUE: &str = "branches-transport";

/// Interface code stamped into every page payload.
pub const IF_CODE: &str = "BANK_BRANCH_IMP";

/// Keyset page over the branch master source. The window carries its own
/// `NEXT_CURSOR` column so the caller can tell whether it advanced.
const PAGE_QUERY: &str = "\
SELECT BANK_BRANCH_CODE,
       BANK_BRANCH_NAME,
       BANK_CODE,
       BANK_NAME,
       ENABLE_FLAG,
       MAX(BANK_BRANCH_CODE) OVER () AS NEXT_CURSOR
  FROM (SELECT b.BANK_BRANCH_CODE,
               b.BANK_BRANCH_NAME,
               b.BANK_CODE,
               b.BANK_NAME,
               'Y' AS ENABLE_FLAG
          FROM CUX.CUX_BANK_BRANCH_V b
         WHERE b.BANK_BRANCH_CODE > NVL(:cursorValue,
                 (SELECT MIN(z.BANK_BRANCH_CODE) FROM CUX.CUX_BANK_BRANCH_V z))
         ORDER BY b.BANK_BRANCH_CODE)
 WHERE ROWNUM <= :pageSize";

/// One keyset page.
#[derive(Debug, Clone, Default)]
pub struct CursorPage {
    pub list: Vec<Map<String, Value>>,
    pub has_next: bool,
    pub next_cursor: Option<String>,
}

/// Source-query seam so the paging loop is testable without Oracle.
#[async_trait]
pub trait CursorSource: Send + Sync {
    async fn page(&self, cursor: Option<&str>, page_size: u32) -> DbOutcome<CursorPage>;
}

/// Production source over the branch view.
pub struct SqlCursorSource {
    manager: Arc<ConnectionManager>,
    pool_alias: &'static str,
}

impl SqlCursorSource {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            pool_alias: "TGS",
        }
    }
}

#[async_trait]
impl CursorSource for SqlCursorSource {
    async fn page(&self, cursor: Option<&str>, page_size: u32) -> DbOutcome<CursorPage> {
        let mut binds = BindMap::new();
        let _ = binds.insert(
            "cursorValue",
            BoundParam::input(
                cursor.map_or(Value::Null, |c| Value::String(c.to_string())),
                Some(SqlType::Varchar2),
            ),
        );
        let _ = binds.insert(
            "pageSize",
            BoundParam::input(Value::from(i64::from(page_size)), Some(SqlType::Number)),
        );
        let statement = CompiledStatement {
            sql: PAGE_QUERY.to_string(),
            binds,
            options: StatementOptions::default(),
        };

        let outcome = exec::query(&self.manager, self.pool_alias, statement).await;
        if !outcome.success {
            return outcome.cast_failure();
        }
        let rows = outcome.data.unwrap_or_default();
        DbOutcome::ok(assemble_page(rows, cursor))
    }
}

/// Strip the window column and decide whether the cursor advanced.
pub fn assemble_page(rows: Vec<Map<String, Value>>, cursor: Option<&str>) -> CursorPage {
    let mut next_cursor = None;
    let mut list = Vec::with_capacity(rows.len());
    for mut row in rows {
        if let Some(value) = row.remove("NEXT_CURSOR") {
            if let Some(text) = value.as_str() {
                next_cursor = Some(text.to_string());
            }
        }
        list.push(row);
    }

    let has_next = match (&next_cursor, cursor) {
        _ if list.is_empty() => false,
        (None, _) => false,
        (Some(next), Some(current)) => next.as_str() > current,
        (Some(_), None) => true,
    };

    CursorPage {
        list,
        has_next,
        next_cursor,
    }
}

/// One-shot paging worker.
pub struct BranchFeedWorker {
    pub source: Arc<dyn CursorSource>,
    pub profiles: Arc<ProfileStore>,
    pub esb: EsbClient,
    pub page_size: u32,
    /// Pause between pages; production keeps the legacy 30s cadence.
    pub page_pause: Duration,
}

impl BranchFeedWorker {
    pub fn new(source: Arc<dyn CursorSource>, profiles: Arc<ProfileStore>) -> Self {
        Self {
            source,
            profiles,
            esb: EsbClient::new(),
            page_size: 100,
            page_pause: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl JobHandler for BranchFeedWorker {
    async fn handle(&self, _job: &Job) -> crate::error::Result<()> {
        let profile = self.profiles.get(INTERFACE_NAME).await;
        let Some(profile) = profile.data else {
            warn!(interface = INTERFACE_NAME, "job profile unavailable");
            return Ok(());
        };
        let url = profile.url.clone().unwrap_or_default();
        let auth = profile.esb_auth();

        info!(interface = INTERFACE_NAME, "cursor feed started");
        let mut cursor: Option<String> = None;
        loop {
            let page = self.source.page(cursor.as_deref(), self.page_size).await;
            if !page.success {
                warn!(
                    interface = INTERFACE_NAME,
                    message = page.message.as_deref().unwrap_or(""),
                    "page query failed"
                );
                return Ok(());
            }
            let page = page.data.unwrap_or_default();
            if page.list.is_empty() {
                info!(interface = INTERFACE_NAME, "feed drained");
                return Ok(());
            }

            let body = json!({
                "IF_CODE": IF_CODE,
                "RECORD": page.list,
            });
            let outcome = self.esb.post(&url, &auth, body).await;
            if !outcome.success {
                warn!(
                    interface = INTERFACE_NAME,
                    msg = outcome
                        .response
                        .esb_info
                        .return_msg
                        .as_deref()
                        .unwrap_or(""),
                    "page push failed, feed aborted"
                );
                return Ok(());
            }

            if !page.has_next {
                info!(interface = INTERFACE_NAME, "cursor did not advance, feed complete");
                return Ok(());
            }
            cursor = page.next_cursor;
            tokio::time::sleep(self.page_pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(code: &str, next: &str) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("BANK_BRANCH_CODE".into(), json!(code));
        row.insert("NEXT_CURSOR".into(), json!(next));
        row
    }

    #[test]
    fn test_assemble_page_strips_window_column() {
        let page = assemble_page(vec![row("001", "002"), row("002", "002")], None);
        assert_eq!(page.list.len(), 2);
        assert!(page.list.iter().all(|r| !r.contains_key("NEXT_CURSOR")));
        assert_eq!(page.next_cursor.as_deref(), Some("002"));
        assert!(page.has_next);
    }

    #[test]
    fn test_cursor_that_does_not_advance_ends_feed() {
        let page = assemble_page(vec![row("002", "002")], Some("002"));
        assert!(!page.has_next);
    }

    #[test]
    fn test_empty_page_has_no_next() {
        let page = assemble_page(vec![], Some("001"));
        assert!(!page.has_next);
        assert!(page.list.is_empty());
    }
}
