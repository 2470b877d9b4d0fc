use crate::delay::store::DelayStore;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local store; one lock makes every operation atomic
#[derive(Debug, Default)]
pub struct InMemoryDelayStore {
    sets: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl InMemoryDelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members of `key` ordered by score, then member
    pub fn members(&self, key: &str) -> Vec<(String, i64)> {
        let sets = self.sets.lock();
        let mut members: Vec<(String, i64)> = sets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }
}

#[async_trait]
impl DelayStore for InMemoryDelayStore {
    async fn add(&self, key: &str, score: i64, member: &str) -> Result<()> {
        self.sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut sets = self.sets.lock();
        Ok(sets
            .get_mut(key)
            .and_then(|set| set.remove(member))
            .is_some())
    }

    async fn move_due(
        &self,
        src: &str,
        dst: &str,
        max_score: i64,
        limit: usize,
        new_score: i64,
    ) -> Result<Vec<String>> {
        let mut sets = self.sets.lock();

        let mut due: Vec<(String, i64)> = match sets.get(src) {
            Some(set) => set
                .iter()
                .filter(|(_, score)| **score <= max_score)
                .map(|(m, s)| (m.clone(), *s))
                .collect(),
            None => return Ok(Vec::new()),
        };
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        due.truncate(limit);

        let moved: Vec<String> = due.into_iter().map(|(m, _)| m).collect();
        if let Some(set) = sets.get_mut(src) {
            for member in &moved {
                set.remove(member);
            }
        }
        let target = sets.entry(dst.to_string()).or_default();
        for member in &moved {
            target.insert(member.clone(), new_score);
        }

        Ok(moved)
    }

    async fn release(
        &self,
        from: &str,
        old_member: &str,
        to: &str,
        score: i64,
        new_member: &str,
    ) -> Result<()> {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get_mut(from) {
            set.remove(old_member);
        }
        sets.entry(to.to_string())
            .or_default()
            .insert(new_member.to_string(), score);
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<u64> {
        Ok(self.sets.lock().get(key).map_or(0, |set| set.len() as u64))
    }

    async fn score(&self, key: &str, member: &str) -> Result<Option<i64>> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .and_then(|set| set.get(member).copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_due_respects_score_and_limit() {
        let store = InMemoryDelayStore::new();
        store.add("p", 5, "c").await.unwrap();
        store.add("p", 1, "a").await.unwrap();
        store.add("p", 3, "b").await.unwrap();
        store.add("p", 9, "late").await.unwrap();

        let moved = store.move_due("p", "c", 5, 2, 6).await.unwrap();
        assert_eq!(moved, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.members("c"), vec![("a".into(), 6), ("b".into(), 6)]);
        assert_eq!(store.len("p").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_release_swaps_sets() {
        let store = InMemoryDelayStore::new();
        store.add("claimed", 10, "old").await.unwrap();

        store.release("claimed", "old", "pending", 70, "new").await.unwrap();

        assert_eq!(store.score("claimed", "old").await.unwrap(), None);
        assert_eq!(store.score("pending", "new").await.unwrap(), Some(70));
        assert!(!store.remove("claimed", "old").await.unwrap());
    }
}
