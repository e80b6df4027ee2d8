//! Cache LRU borné pour les données dérivées des couvertures
//!
//! Les palettes de couleurs calculées à partir d'une pochette coûtent un
//! téléchargement et un décodage d'image. Ce module les mémorise par URL
//! d'artwork, avec une capacité fixe et une éviction de l'entrée la moins
//! récemment utilisée.

use indexmap::IndexMap;
use std::hash::Hash;

/// Capacité par défaut du cache de couleurs.
pub const DEFAULT_COLOR_CACHE_SIZE: usize = 100;

/// Cache LRU à capacité fixe.
///
/// L'ordre d'insertion de l'`IndexMap` sert d'ordre de récence : la première
/// entrée est la moins récemment utilisée, la dernière la plus récente.
/// Aucune éviction en tâche de fond, tout est piloté par les accès.
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    entries: IndexMap<K, V>,
    capacity: usize,
}

/// Palettes (`#rrggbb`) indexées par URL d'artwork.
pub type ColorCache = LruCache<String, Vec<String>>;

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// Crée un cache vide. Une capacité nulle est ramenée à 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Retourne la valeur et promeut l'entrée en plus récemment utilisée.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, v)| v.clone())
    }

    /// Insère ou remplace une entrée.
    ///
    /// Si la clé est nouvelle et que le cache est plein, l'entrée la moins
    /// récemment utilisée est évincée avant l'insertion.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(index) = self.entries.get_index_of(&key) {
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
            if let Some((_, slot)) = self.entries.get_index_mut(last) {
                *slot = value;
            }
            return;
        }

        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }

    /// Présence d'une clé, sans modifier l'ordre de récence.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clés de la moins récente à la plus récente.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

impl<K: Hash + Eq, V: Clone> Default for LruCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_COLOR_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colors(tag: &str) -> Vec<String> {
        vec![format!("#{tag}")]
    }

    #[test]
    fn test_get_miss() {
        let mut cache = ColorCache::new(3);
        assert_eq!(cache.get(&"url1".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_access_protects_from_eviction() {
        let mut cache = ColorCache::new(3);
        cache.put("url1".to_string(), colors("1"));
        cache.put("url2".to_string(), colors("2"));
        cache.put("url3".to_string(), colors("3"));

        assert_eq!(cache.get(&"url1".to_string()), Some(colors("1")));

        cache.put("url4".to_string(), colors("4"));

        assert!(cache.contains(&"url1".to_string()));
        assert!(!cache.contains(&"url2".to_string()));
        assert!(cache.contains(&"url3".to_string()));
        assert!(cache.contains(&"url4".to_string()));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_eviction_without_access_drops_oldest() {
        let mut cache = ColorCache::new(2);
        cache.put("a".to_string(), colors("a"));
        cache.put("b".to_string(), colors("b"));
        cache.put("c".to_string(), colors("c"));

        let keys: Vec<_> = cache.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = ColorCache::new(2);
        cache.put("a".to_string(), colors("a"));
        cache.put("b".to_string(), colors("b"));
        cache.put("a".to_string(), colors("a2"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()), Some(colors("a2")));
        // "a" vient d'être réécrit, "b" devient le plus ancien
        cache.put("c".to_string(), colors("c"));
        assert!(!cache.contains(&"b".to_string()));
    }

    #[test]
    fn test_default_capacity() {
        let cache = ColorCache::default();
        assert_eq!(cache.capacity(), DEFAULT_COLOR_CACHE_SIZE);
    }

    #[test]
    fn test_zero_capacity_still_holds_one_entry() {
        let mut cache: LruCache<u32, u32> = LruCache::new(0);
        cache.put(1, 10);
        cache.put(2, 20);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2), Some(20));
    }
}
