use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 200;

/// One finished request as listed by `GET /admin/recent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRequest {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Bounded ring of the most recent requests; the oldest entry is evicted first.
pub struct RecentRequests {
    items: Mutex<VecDeque<RecentRequest>>,
    capacity: usize,
}

impl Default for RecentRequests {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecentRequests {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub async fn append(&self, item: RecentRequest) {
        let mut items = self.items.lock().await;
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Oldest first.
    pub async fn snapshot(&self) -> Vec<RecentRequest> {
        self.items.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u16) -> RecentRequest {
        RecentRequest {
            method: "GET".to_string(),
            path: format!("/p/{n}"),
            status: 200,
            duration_ms: 1,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            request_id: None,
        }
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest() {
        let recent = RecentRequests::new(3);
        for n in 0..5 {
            recent.append(item(n)).await;
        }
        let paths: Vec<_> = recent
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["/p/2", "/p/3", "/p/4"]);
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(item(1)).unwrap();
        assert_eq!(value["durationMs"], 1);
        assert!(value.get("requestId").is_none());
    }
}
