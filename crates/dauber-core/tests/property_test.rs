//! Property tests for memory net effect, key uniqueness and join planning

use dauber_core::descriptor::FactTypeDescriptor;
use dauber_core::*;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
enum Op {
    Insert(u8, i64),
    Retract(u8),
    Update(u8, i64),
    Propagate,
    Delete,
    Commit,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6, 0i64..3).prop_map(|(id, n)| Op::Insert(id, n)),
        2 => (0u8..6).prop_map(Op::Retract),
        2 => (0u8..6, 0i64..3).prop_map(|(id, n)| Op::Update(id, n)),
        1 => Just(Op::Propagate),
        1 => Just(Op::Delete),
        1 => Just(Op::Commit),
    ]
}

fn item(id: u8, n: i64) -> std::sync::Arc<FactObject> {
    FactObject::new("Item", format!("item-{id}"), FactData::new().with("n", n))
}

fn pair(id: &str, n: i64, s: &str) -> std::sync::Arc<FactObject> {
    FactObject::new("Pair", id, FactData::new().with("n", n).with("s", s))
}

struct Views {
    keyed: FactTypeDescriptor,
    plain: FactTypeDescriptor,
}

fn views(session: &mut SessionMemory) -> Views {
    let keyed = session.compile_lhs(LhsBuilder::new().fact("i", "Item").key("i", "n")).unwrap();
    let plain = session.compile_lhs(LhsBuilder::new().fact("i", "Item")).unwrap();
    Views { keyed: keyed.fact_types[0].clone(), plain: plain.fact_types[0].clone() }
}

fn keyed_store<'a>(session: &'a SessionMemory, views: &Views) -> &'a HashIndexedKeyStore {
    session
        .type_memory(views.keyed.type_id)
        .unwrap()
        .fields_memory(&views.keyed.key)
        .unwrap()
        .get(&views.keyed.alpha)
        .unwrap()
        .store()
}

proptest! {
    #[test]
    fn committed_memory_matches_net_effect(ops in prop::collection::vec(op(), 0..60)) {
        let mut session = SessionMemory::new(MemoryConfig::default()).unwrap();
        let views = views(&mut session);
        let mut model: HashMap<u8, i64> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(id, n) => {
                    let accepted = session.insert(item(id, n)).is_some();
                    prop_assert_eq!(accepted, !model.contains_key(&id));
                    model.entry(id).or_insert(n);
                }
                Op::Retract(id) => {
                    let accepted = session.retract(&item(id, 0)).is_some();
                    prop_assert_eq!(accepted, model.remove(&id).is_some());
                }
                Op::Update(id, n) => {
                    let accepted = session.update(item(id, n)).is_some();
                    prop_assert_eq!(accepted, model.contains_key(&id));
                    if accepted {
                        model.insert(id, n);
                    }
                }
                Op::Propagate => {
                    session.propagate_deltas();
                }
                Op::Delete => {
                    session.perform_deletes();
                }
                Op::Commit => session.commit_changes(),
            }
        }
        session.commit_changes();

        prop_assert_eq!(session.stats().committed_facts(), model.len());

        let store = keyed_store(&session, &views);
        prop_assert!(!store.has_deleted_keys());
        prop_assert_eq!(store.key_iter(KeyMode::KnownKeysNewFacts).count(), 0);
        prop_assert_eq!(store.key_iter(KeyMode::NewKeysNewFacts).count(), 0);
        for n in 0i64..3 {
            let expected = model.values().filter(|v| **v == n).count();
            let actual = store
                .row(KeyMode::KnownKeysKnownFacts, &[FactValue::Integer(n)])
                .map_or(0, ValueRow::len);
            prop_assert_eq!(actual, expected);
        }

        let plain = session
            .type_memory(views.plain.type_id)
            .unwrap()
            .alpha_bucket(&views.plain.alpha)
            .unwrap();
        prop_assert_eq!(plain.main().len(), model.len());
        prop_assert!(plain.delta().is_empty());
    }

    #[test]
    fn key_tuples_are_unique_across_partitions(
        committed in prop::collection::vec((0i64..4, "[ab]"), 0..30),
        pending in prop::collection::vec((0i64..4, "[ab]"), 0..30),
    ) {
        let mut session = SessionMemory::new(MemoryConfig::default()).unwrap();
        let lhs = session
            .compile_lhs(LhsBuilder::new().fact("p", "Pair").key("p", "n").key("p", "s"))
            .unwrap();
        let fact = &lhs.fact_types[0];

        let tuples: Vec<&(i64, String)> = committed.iter().chain(pending.iter()).collect();
        for (i, (n, s)) in committed.iter().enumerate() {
            session.insert(pair(&format!("c{i}"), *n, s));
        }
        session.commit_changes();
        for (i, (n, s)) in pending.iter().enumerate() {
            session.insert(pair(&format!("p{i}"), *n, s));
        }
        session.propagate_deltas();

        let store = session
            .type_memory(fact.type_id)
            .unwrap()
            .fields_memory(&fact.key)
            .unwrap()
            .get(&fact.alpha)
            .unwrap()
            .store();

        let rows = |mode: KeyMode| -> Vec<Vec<FactValue>> {
            store.key_iter(mode).map(|row| row.key().to_vec()).collect()
        };
        let main = rows(KeyMode::KnownKeysKnownFacts);
        let known = rows(KeyMode::KnownKeysNewFacts);
        let new = rows(KeyMode::NewKeysNewFacts);

        let main_keys: HashSet<&Vec<FactValue>> = main.iter().collect();
        prop_assert_eq!(main_keys.len(), main.len());
        prop_assert_eq!(known.iter().collect::<HashSet<_>>().len(), known.len());
        prop_assert_eq!(new.iter().collect::<HashSet<_>>().len(), new.len());
        prop_assert!(known.iter().all(|key| main_keys.contains(key)));
        prop_assert!(new.iter().all(|key| !main_keys.contains(key)));

        let distinct: HashSet<&(i64, String)> = tuples.iter().copied().collect();
        prop_assert_eq!(main.len() + new.len(), distinct.len());
        prop_assert_eq!(store.stats().fact_refs, tuples.len());
    }

    #[test]
    fn allocation_is_stable_and_covers_every_condition(
        raw in prop::collection::vec((0usize..6, 0usize..6, 1u32..50), 1..12),
    ) {
        let conditions: Vec<ConditionCost> = raw
            .iter()
            .enumerate()
            .map(|(i, (a, b, cost))| ConditionCost {
                vars: vec![*a, *b],
                cost: f64::from(*cost),
                label: format!("c{i}"),
            })
            .collect();
        let allocator = ConditionAllocator::new();
        let first = allocator.allocate(&conditions).unwrap();
        prop_assert_eq!(&allocator.allocate(&conditions).unwrap(), &first);

        let mut attached: Vec<usize> = first
            .iter()
            .flat_map(|unit| unit.steps.iter().flat_map(|step| step.conditions.iter().copied()))
            .collect();
        attached.sort_unstable();
        prop_assert_eq!(attached, (0..conditions.len()).collect::<Vec<_>>());

        let mut bound = HashSet::new();
        for unit in &first {
            for var in unit.vars() {
                prop_assert!(bound.insert(var), "var {} joined by two units", var);
            }
        }
    }
}
