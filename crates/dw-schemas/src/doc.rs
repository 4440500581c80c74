use serde::{Deserialize, Serialize};

/// A tracked document, as discovered by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocHandle {
    pub doc_id: String,
    pub display_name: String,
}

/// One row of a document's Commands table.
///
/// `text` is the only user-owned cell. `id`, `status`, `approval_url`,
/// `result` and `error` are derived cells owned by the agent; human edits to
/// them are corrected on the next sync tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocRow {
    pub row_index: i64,
    pub id: Option<String>,
    pub text: String,
    pub status: Option<String>,
    pub approval_url: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Batch patch of one row's derived cells. `None` leaves a cell untouched;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct DocCellPatch {
    pub id: Option<Option<String>>,
    pub status: Option<Option<String>>,
    pub approval_url: Option<Option<String>>,
    pub result: Option<Option<String>>,
    pub error: Option<Option<String>>,
}

impl DocCellPatch {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.status.is_none()
            && self.approval_url.is_none()
            && self.result.is_none()
            && self.error.is_none()
    }
}
