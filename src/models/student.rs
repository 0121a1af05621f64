use serde::{Deserialize, Serialize};

/// An enrolled subject. Immutable after registration; removed as a whole by
/// delete, together with its reference image on disk.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub department: String,
    pub image_path: String,
    pub label_id: i32,
    pub created_at: i64,
}
