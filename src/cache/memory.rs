//! Process-local cache store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStorage, StoredEntry, check_name, insert_entry};
use crate::error::Result;
use crate::http::{Request, Response};

#[derive(Debug)]
struct Generation {
    name: String,
    /// Entries keyed by URL; several may coexist when responses `Vary`.
    entries: HashMap<String, Vec<StoredEntry>>,
}

impl Generation {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, entry: StoredEntry) {
        insert_entry(self.entries.entry(entry.url.clone()).or_default(), entry);
    }
}

/// In-memory [`CacheStorage`]. Generations are kept in creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    generations: RwLock<Vec<Generation>>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_or_create<'a>(generations: &'a mut Vec<Generation>, name: &str) -> &'a mut Generation {
    let index = match generations.iter().position(|g| g.name == name) {
        Some(index) => index,
        None => {
            generations.push(Generation::new(name));
            generations.len() - 1
        }
    };
    &mut generations[index]
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        check_name(name)?;
        find_or_create(&mut *self.generations.write().await, name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.generations.read().await.iter().any(|g| g.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .generations
            .read()
            .await
            .iter()
            .map(|g| g.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let before = generations.len();
        generations.retain(|g| g.name != name);
        Ok(generations.len() != before)
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        if !request.is_get() {
            return Ok(None);
        }
        let generations = self.generations.read().await;
        let Some(generation) = generations.iter().find(|g| g.name == name) else {
            return Ok(None);
        };
        Ok(generation
            .entries
            .get(&request.cache_url())
            .and_then(|list| list.iter().find(|e| e.matches_request(request)))
            .map(StoredEntry::to_response))
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
        check_name(name)?;
        let entry = StoredEntry::new(request, response)?;
        find_or_create(&mut *self.generations.write().await, name).insert(entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        check_name(name)?;
        let entries = entries
            .into_iter()
            .map(|(request, response)| StoredEntry::new(&request, response))
            .collect::<Result<Vec<_>>>()?;

        let mut generations = self.generations.write().await;
        let generation = find_or_create(&mut generations, name);
        for entry in entries {
            generation.insert(entry);
        }
        Ok(())
    }

    async fn requests(&self, name: &str) -> Result<Vec<String>> {
        let generations = self.generations.read().await;
        let mut urls: Vec<String> = generations
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.entries.keys().cloned().collect())
            .unwrap_or_default();
        urls.sort();
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use reqwest::{Method, StatusCode};
    use url::Url;

    fn request(path: &str) -> Request {
        Request::get(Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn open_is_idempotent_and_ordered() {
        let cache = MemoryCacheStorage::new();
        cache.open("v1").await.unwrap();
        cache.open("v2").await.unwrap();
        cache.open("v1").await.unwrap();
        assert_eq!(cache.keys().await.unwrap(), vec!["v1", "v2"]);
        assert!(cache.has("v2").await.unwrap());
        assert!(!cache.has("v3").await.unwrap());
    }

    #[tokio::test]
    async fn empty_name_rejected() {
        let cache = MemoryCacheStorage::new();
        assert!(matches!(cache.open("").await, Err(Error::EmptyCacheName)));
    }

    #[tokio::test]
    async fn put_then_match() {
        let cache = MemoryCacheStorage::new();
        cache
            .put("v1", &request("/a"), Response::basic(StatusCode::OK, "a"))
            .await
            .unwrap();

        let hit = cache.match_in("v1", &request("/a")).await.unwrap().unwrap();
        assert_eq!(&hit.body()[..], b"a");
        assert!(cache.match_in("v1", &request("/b")).await.unwrap().is_none());
        assert!(cache.match_in("v2", &request("/a")).await.unwrap().is_none());
        assert!(cache.match_any(&request("/a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_rejects_non_get() {
        let cache = MemoryCacheStorage::new();
        let post = Request::new(Method::POST, Url::parse("https://example.com/a").unwrap());
        let result = cache
            .put("v1", &post, Response::basic(StatusCode::OK, "a"))
            .await;
        assert!(matches!(result, Err(Error::MethodNotCacheable(_))));
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn match_ignores_non_get() {
        let cache = MemoryCacheStorage::new();
        cache
            .put("v1", &request("/a"), Response::basic(StatusCode::OK, "a"))
            .await
            .unwrap();
        let head = Request::new(Method::HEAD, Url::parse("https://example.com/a").unwrap());
        assert!(cache.match_any(&head).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_all_rejects_whole_batch() {
        let cache = MemoryCacheStorage::new();
        let post = Request::new(Method::POST, Url::parse("https://example.com/b").unwrap());
        let result = cache
            .put_all(
                "v1",
                vec![
                    (request("/a"), Response::basic(StatusCode::OK, "a")),
                    (post, Response::basic(StatusCode::OK, "b")),
                ],
            )
            .await;
        assert!(result.is_err());
        assert!(!cache.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_and_requests() {
        let cache = MemoryCacheStorage::new();
        cache
            .put_all(
                "v1",
                vec![
                    (request("/b"), Response::basic(StatusCode::OK, "b")),
                    (request("/a"), Response::basic(StatusCode::OK, "a")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            cache.requests("v1").await.unwrap(),
            vec!["https://example.com/a", "https://example.com/b"]
        );
        assert!(cache.delete("v1").await.unwrap());
        assert!(!cache.delete("v1").await.unwrap());
        assert!(cache.requests("v1").await.unwrap().is_empty());
    }
}
