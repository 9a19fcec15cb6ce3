use procsift::cache::{stats_key, PatternEngine, ResultCache};
use procsift::patterns::analyze;
use procsift::stats::FreqTable;

fn table(pairs: &[(&str, usize)]) -> FreqTable {
    pairs.iter().map(|(v, c)| (v.to_string(), *c)).collect()
}

#[test]
fn stores_and_returns_values() {
    let mut cache: ResultCache<String> = ResultCache::new(4);
    assert!(cache.insert(1, "one".to_string()));
    assert_eq!(cache.get(1), Some(&"one".to_string()));
    assert!(cache.get(2).is_none());
}

#[test]
fn rejects_new_keys_once_full() {
    let mut cache: ResultCache<u32> = ResultCache::new(2);
    assert!(cache.insert(1, 10));
    assert!(cache.insert(2, 20));
    assert!(cache.is_full());
    assert!(!cache.insert(3, 30));
    assert!(cache.get(3).is_none());
    assert_eq!(cache.len(), 2);
}

#[test]
fn replacing_an_existing_key_is_allowed_at_capacity() {
    let mut cache: ResultCache<u32> = ResultCache::new(1);
    assert!(cache.insert(1, 10));
    assert!(cache.insert(1, 11));
    assert_eq!(cache.get(1), Some(&11));
}

#[test]
fn key_is_deterministic_for_equal_tables() {
    let a = table(&[("cmd.exe", 5), ("svchost.exe", 2)]);
    let b = table(&[("cmd.exe", 5), ("svchost.exe", 2)]);
    let ops = table(&[("ReadFile", 7)]);
    let results = table(&[("ACCESS DENIED", 7)]);
    assert_eq!(stats_key(&a, &ops, &results), stats_key(&b, &ops, &results));
}

#[test]
fn key_changes_when_totals_change() {
    let ops = table(&[("ReadFile", 7)]);
    let results = table(&[("ACCESS DENIED", 7)]);
    let a = table(&[("cmd.exe", 5)]);
    let b = table(&[("cmd.exe", 6)]);
    assert_ne!(stats_key(&a, &ops, &results), stats_key(&b, &ops, &results));
}

#[test]
fn engine_hit_matches_fresh_computation_exactly() {
    let processes = table(&[("chatty.exe", 600), ("quiet.exe", 50)]);
    let operations = table(&[("ReadFile", 650)]);
    let results = table(&[("ACCESS DENIED", 60), ("SUCCESS", 10)]);

    let mut engine = PatternEngine::default();
    let first = engine.analyze(&processes, &operations, &results);
    let second = engine.analyze(&processes, &operations, &results);
    assert_eq!(engine.cached_results(), 1);
    assert_eq!(first, second);
    assert_eq!(first, analyze(&processes, &operations, &results));
}

#[test]
fn engine_caches_distinct_inputs_separately() {
    let operations = table(&[("ReadFile", 1)]);
    let results = FreqTable::default();
    let mut engine = PatternEngine::default();
    engine.analyze(&table(&[("a", 1)]), &operations, &results);
    engine.analyze(&table(&[("b", 2)]), &operations, &results);
    assert_eq!(engine.cached_results(), 2);
}
