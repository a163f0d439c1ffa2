//! Name index: resolves container names to the id of their latest trace.

use dashmap::DashMap;

/// Concurrent `name → id` map.
///
/// Written by the collector when a capture starts and by the startup reload;
/// read by retrieval. The last writer wins when a name is reused.
#[derive(Debug, Default)]
pub struct NameIndex {
    ids: DashMap<String, String>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, id: impl Into<String>) {
        self.ids.insert(name.into(), id.into());
    }

    pub fn resolve(&self, name: &str) -> Option<String> {
        self.ids.get(name).map(|id| id.value().clone())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_last_writer_wins() {
        let index = NameIndex::new();
        index.insert("web", "id-1");
        index.insert("web", "id-2");
        assert_eq!(index.resolve("web").as_deref(), Some("id-2"));
        assert_eq!(index.len(), 1);
        assert!(index.resolve("db").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let index = Arc::new(NameIndex::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    index.insert(format!("w{i}-{j}"), format!("id{i}-{j}"));
                    let _ = index.resolve(&format!("w{}-{j}", (i + 1) % 16));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(index.len(), 1600);
        assert_eq!(index.resolve("w3-42").as_deref(), Some("id3-42"));
    }
}
