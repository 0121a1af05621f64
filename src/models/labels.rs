use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::db::registry::StudentRegistry;
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct LabelEntry {
    pub name: String,
    pub department: String,
}

/// In-memory projection of the registry keyed by label ID. Rebuilt at the
/// start of every recognition session and after registry mutations; the
/// recognition loop works on an immutable snapshot.
#[derive(Default)]
pub struct LabelMap {
    inner: RwLock<HashMap<i32, LabelEntry>>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(&self, registry: &StudentRegistry) -> Result<usize, Error> {
        let students = registry.list()?;
        let mut map = HashMap::with_capacity(students.len());
        for student in students {
            map.insert(
                student.label_id,
                LabelEntry { name: student.name, department: student.department },
            );
        }
        let count = map.len();
        *self.inner.write() = map;
        info!("loaded {count} label mappings from the registry");
        Ok(count)
    }

    pub fn get(&self, label: i32) -> Option<LabelEntry> {
        self.inner.read().get(&label).cloned()
    }

    pub fn contains(&self, label: i32) -> bool {
        self.inner.read().contains_key(&label)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<i32, LabelEntry> {
        self.inner.read().clone()
    }
}
