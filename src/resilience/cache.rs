//! 响应缓存：TTL + LRU 淘汰，进程内共享
//!
//! 键 = 归一化的用户输入 + 上下文指纹（SHA-256）。每个条目独立 TTL；容量满时淘汰最久未访问的条目。
//! 可选模糊查找（编辑距离相似度 >= 阈值）只用于低风险的对话类缓存，绝不用于有副作用的技能调用；
//! 模糊查找只在同一作用域（写入时给出的上下文指纹）内比较，不同用户/会话的条目互不可见。
//!
//! 与熔断器一样使用 std Mutex，锁不跨越 `.await`。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 缓存统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// 容量满时的 LRU 淘汰数
    pub evictions: u64,
    /// 过期清理数（惰性 + 后台清扫）
    pub expired: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

struct CacheEntry<V> {
    value: V,
    /// 归一化原文，供模糊查找
    text: Option<String>,
    /// 作用域（上下文指纹），模糊查找只匹配同一作用域
    scope: Option<String>,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    last_accessed: Instant,
    /// 单调递增的访问序号，LRU 比较用（避免 Instant 精度导致并列）
    access_seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    seq: u64,
}

impl<V> CacheState<V> {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// TTL + LRU 响应缓存
pub struct ResponseCache<V> {
    state: Mutex<CacheState<V>>,
    capacity: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

/// 归一化输入：小写、合并空白、去掉首尾标点
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_ascii_punctuation() || c == '¿' || c == '¡')
        .trim()
        .to_string()
}

/// 由归一化输入与上下文指纹生成确定性缓存键
pub fn cache_key(utterance: &str, context_fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(utterance).as_bytes());
    hasher.update(b"|");
    hasher.update(context_fingerprint.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 相似度比：1 - 编辑距离 / 较长串字符数；两个空串视为完全相同
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

impl<V: Clone + Send + 'static> ResponseCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                seq: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// 精确查找；过期条目惰性删除并计为未命中
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock();
        let seq = state.next_seq();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                entry.access_seq = seq;
                let value = entry.value.clone();
                tracing::debug!(hits = entry.hit_count, "response cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 写入；ttl 为 None 时使用默认 TTL
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        self.insert(key.into(), None, value, ttl);
    }

    /// 写入并记录原文与作用域，使条目可被同一作用域的 find_similar 命中
    pub fn set_with_text(
        &self,
        key: impl Into<String>,
        text: &str,
        scope: &str,
        value: V,
        ttl: Option<Duration>,
    ) {
        self.insert(key.into(), Some((normalize(text), scope.to_string())), value, ttl);
    }

    fn insert(&self, key: String, text: Option<(String, String)>, value: V, ttl: Option<Duration>) {
        let (text, scope) = match text {
            Some((text, scope)) => (Some(text), Some(scope)),
            None => (None, None),
        };
        let now = Instant::now();
        let mut state = self.lock();
        let seq = state.next_seq();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            // 先清掉过期的，仍然满则按 LRU 淘汰
            let before = state.entries.len();
            state.entries.retain(|_, e| !e.is_expired(now));
            let purged = before - state.entries.len();
            if purged > 0 {
                self.expired.fetch_add(purged as u64, Ordering::Relaxed);
            }
            if state.entries.len() >= self.capacity {
                let victim = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.access_seq)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    state.entries.remove(&victim);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                value,
                text,
                scope,
                created_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                hit_count: 0,
                last_accessed: now,
                access_seq: seq,
            },
        );
    }

    /// 模糊查找：在同一作用域、带原文的未过期条目中取相似度最高且 >= threshold 的一个
    pub fn find_similar(&self, text: &str, scope: &str, threshold: f64) -> Option<V> {
        let now = Instant::now();
        let needle = normalize(text);
        let mut state = self.lock();
        let seq = state.next_seq();

        let best = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now) && e.scope.as_deref() == Some(scope))
            .filter_map(|(k, e)| {
                e.text
                    .as_deref()
                    .map(|t| (k.clone(), similarity(&needle, t)))
            })
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((key, score)) = best else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                entry.access_seq = seq;
                tracing::debug!(similarity = score, "response cache fuzzy hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().entries.remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// 删除所有过期条目，返回删除数
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, e| !e.is_expired(now));
        let purged = before - state.entries.len();
        if purged > 0 {
            self.expired.fetch_add(purged as u64, Ordering::Relaxed);
        }
        purged
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheMetrics {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries: self.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// 后台清扫：每 interval 清理一次过期条目，直到 cancel 触发
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired();
                        let m = cache.metrics();
                        tracing::debug!(
                            purged,
                            entries = m.entries,
                            hit_rate = format!("{:.2}", m.hit_rate),
                            "response cache sweep"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        cache.set("k", "v".to_string(), None);
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.metrics().hits, 1);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        cache.set("k", 1u32, Some(Duration::from_millis(30)));
        assert_eq!(cache.get("k"), Some(1));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().expired, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", 1u32, None);
        cache.set("b", 2u32, None);
        // a 最早插入但刚被访问，应淘汰 b
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3u32, None);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set("a", 1u32, None);
        cache.set("b", 2u32, None);
        cache.set("a", 10u32, None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.metrics().evictions, 0);
    }

    #[test]
    fn test_find_similar() {
        let cache = ResponseCache::new(8, Duration::from_secs(60));
        cache.set_with_text("k1", "Ciao, come stai?", "u1|s1", "bene".to_string(), None);
        cache.set("k2", "no text".to_string(), None);

        assert_eq!(
            cache.find_similar("ciao come stai", "u1|s1", 0.85),
            Some("bene".to_string())
        );
        assert_eq!(cache.find_similar("quanto costa un bilocale", "u1|s1", 0.85), None);
    }

    #[test]
    fn test_find_similar_stays_within_scope() {
        let cache = ResponseCache::new(8, Duration::from_secs(60));
        cache.set_with_text("k1", "what did we discuss last time?", "u1|s1", "Villa Rossi".to_string(), None);

        assert_eq!(cache.find_similar("what did we discuss last time", "u2|s9", 0.85), None);
        assert_eq!(cache.find_similar("what did we discuss last time", "u1|s2", 0.85), None);
        assert_eq!(
            cache.find_similar("what did we discuss last time", "u1|s1", 0.85),
            Some("Villa Rossi".to_string())
        );
    }

    #[tokio::test]
    async fn test_concurrent_set_get_keeps_counters_consistent() {
        let cache = Arc::new(ResponseCache::new(64, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for task in 0..8u32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    let key = format!("k{}", (task * 50 + i) % 100);
                    cache.set(key.clone(), i, None);
                    cache.get(&key);
                    cache.get("never-set");
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let m = cache.metrics();
        // 每次 get 恰好计一次命中或未命中
        assert_eq!(m.hits + m.misses, 8 * 50 * 2);
        assert!(m.misses >= 8 * 50);
        assert!(m.entries <= 64);
        assert!(m.entries as u64 + m.evictions >= 100);
    }

    #[test]
    fn test_cache_key_normalizes_input() {
        let a = cache_key("  Hello   World! ", "ctx");
        let b = cache_key("hello world", "ctx");
        let c = cache_key("hello world", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_hit_rate() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        cache.set("k", 1u8, None);
        cache.get("k");
        cache.get("missing");
        let m = cache.metrics();
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 1);
        assert!((m.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired() {
        let cache = Arc::new(ResponseCache::new(4, Duration::from_millis(10)));
        cache.set("k", 1u8, None);
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(cache.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }
}
