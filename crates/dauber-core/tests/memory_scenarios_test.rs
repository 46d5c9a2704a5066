//! Memory lifecycle scenarios driven through the public session API

use dauber_core::descriptor::FactTypeDescriptor;
use dauber_core::*;
use std::sync::Arc;

fn session() -> SessionMemory {
    SessionMemory::new(MemoryConfig::default()).unwrap()
}

fn pair(id: &str, n: i64, s: &str) -> Arc<FactObject> {
    FactObject::new("Pair", id, FactData::new().with("n", n).with("s", s))
}

fn keyed_pairs(session: &mut SessionMemory) -> FactTypeDescriptor {
    let lhs = session
        .compile_lhs(LhsBuilder::new().fact("p", "Pair").key("p", "n").key("p", "s"))
        .unwrap();
    lhs.fact_types[0].clone()
}

fn store<'a>(session: &'a SessionMemory, fact: &FactTypeDescriptor) -> &'a HashIndexedKeyStore {
    session
        .type_memory(fact.type_id)
        .unwrap()
        .fields_memory(&fact.key)
        .unwrap()
        .get(&fact.alpha)
        .unwrap()
        .store()
}

#[test]
fn test_duplicate_tuples_share_a_new_key_row() {
    let mut session = session();
    let fact = keyed_pairs(&mut session);

    session.insert(pair("f1", 1, "a"));
    session.insert(pair("f2", 1, "a"));
    session.insert(pair("f3", 2, "b"));
    session.propagate_deltas();

    let rows: Vec<&ValueRow> = store(&session, &fact).key_iter(KeyMode::NewKeysNewFacts).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 2);
    assert_eq!(rows[0].key(), &[FactValue::Integer(1), FactValue::String("a".into())]);
    assert_eq!(rows[1].len(), 1);
}

#[test]
fn test_deleted_row_reported_until_commit() {
    let mut session = session();
    let fact = keyed_pairs(&mut session);

    let f = pair("f", 1, "a");
    session.insert(Arc::clone(&f));
    session.commit_changes();

    session.retract(&f);
    session.perform_deletes();
    {
        let store = store(&session, &fact);
        assert!(store.has_deleted_keys());
        let row = store
            .row(KeyMode::KnownKeysKnownFacts, &[FactValue::Integer(1), FactValue::String("a".into())])
            .unwrap();
        assert!(store.is_key_deleted(row));
        assert_eq!(store.deleted_keys().count(), 1);
    }

    session.commit_changes();
    let store = store(&session, &fact);
    assert!(!store.has_deleted_keys());
    assert_eq!(store.key_iter(KeyMode::KnownKeysKnownFacts).count(), 0);
}

#[test]
fn test_update_of_unknown_object_is_a_no_op() {
    let mut session = session();
    keyed_pairs(&mut session);
    session.insert(pair("known", 1, "a"));

    let before = session.stats();
    assert_eq!(session.update(pair("never-inserted", 9, "z")), None);
    assert_eq!(session.retract(&pair("never-inserted", 9, "z")), None);
    assert_eq!(session.stats(), before);

    let memory = session.type_memory_by_name("Pair").unwrap();
    assert_eq!(memory.buffer_len(Action::Insert), 1);
    assert_eq!(memory.buffer_len(Action::Retract), 0);
    assert_eq!(memory.buffer_len(Action::Update), 0);
}

#[test]
fn test_second_commit_leaves_views_unchanged() {
    let mut session = session();
    let fact = keyed_pairs(&mut session);
    for i in 0..20 {
        session.insert(pair(&format!("f{i}"), i % 5, "x"));
    }
    session.commit_changes();
    let main: Vec<ValueRow> =
        store(&session, &fact).key_iter(KeyMode::KnownKeysKnownFacts).cloned().collect();

    session.commit_changes();
    let store = store(&session, &fact);
    let again: Vec<ValueRow> = store.key_iter(KeyMode::KnownKeysKnownFacts).cloned().collect();
    assert_eq!(main, again);
    assert_eq!(main.len(), 5);
    assert_eq!(store.key_iter(KeyMode::KnownKeysNewFacts).count(), 0);
    assert_eq!(store.key_iter(KeyMode::NewKeysNewFacts).count(), 0);
}

#[test]
fn test_new_alpha_bucket_back_fills_matching_facts_only() {
    let mut session = session();
    let all = keyed_pairs(&mut session);
    for i in 0..10 {
        session.insert(pair(&format!("f{i}"), i, if i % 3 == 0 { "hit" } else { "miss" }));
    }
    session.commit_changes();
    let main_rows_before = store(&session, &all).stats().main_rows;

    let lhs = session
        .compile_lhs(
            LhsBuilder::new()
                .fact("p", "Pair")
                .key("p", "n")
                .key("p", "s")
                .filter("p", AlphaCondition::value("s", Operator::Equal, "hit")),
        )
        .unwrap();
    let hits = &lhs.fact_types[0];
    assert_eq!(hits.key, all.key);
    assert_ne!(hits.alpha.bucket_index(), all.alpha.bucket_index());

    let rows: Vec<&ValueRow> = store(&session, hits).key_iter(KeyMode::KnownKeysKnownFacts).collect();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row.key()[1] == FactValue::String("hit".into())));
    assert_eq!(store(&session, &all).stats().main_rows, main_rows_before);
}

#[test]
fn test_update_moves_fact_to_its_new_key() {
    let mut session = session();
    let fact = keyed_pairs(&mut session);
    session.insert(pair("f", 1, "a"));
    session.commit_changes();

    let next = session.update(pair("f", 2, "b")).unwrap();
    assert_eq!(next.version, 1);
    session.propagate_deltas();
    session.perform_deletes();
    session.commit_changes();

    let store = store(&session, &fact);
    let old_key = [FactValue::Integer(1), FactValue::from("a")];
    assert!(store.row(KeyMode::KnownKeysKnownFacts, &old_key).is_none());
    let new_key = [FactValue::Integer(2), FactValue::from("b")];
    let row = store.row(KeyMode::KnownKeysKnownFacts, &new_key).unwrap();
    assert_eq!(row.facts(), &[next]);
}

#[test]
fn test_schema_change_mid_cycle_is_rejected() {
    let mut session = session();
    keyed_pairs(&mut session);
    session.insert(pair("f", 1, "a"));

    let err = session
        .compile_lhs(LhsBuilder::new().fact("p", "Pair").key("p", "extra"))
        .unwrap_err();
    assert!(matches!(err, DauberError::SchemaChangeMidCycle { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_config_from_toml_reaches_key_stores() {
    let config = MemoryConfig::from_toml_str("initial_key_capacity = 64\nmax_load_factor = 0.5\n").unwrap();
    let mut session = SessionMemory::new(config).unwrap();
    let fact = keyed_pairs(&mut session);
    assert_eq!(store(&session, &fact).stats().capacity, 3 * 64);
}
