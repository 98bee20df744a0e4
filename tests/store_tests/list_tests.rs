//! Tests for ListEntity
//!
//! These tests verify:
//! - Push/pop ordering at both ends
//! - All-or-nothing multi-element pops
//! - Growth across wrapped layouts
//! - Size/capacity invariants under random operation mixes
//! - Range queries
//! - Reconstruction command output
//! - Capacity ceiling

use aofkv::error::KvError;
use aofkv::store::{ListEntity, DEFAULT_CAP, ITEMS_PER_CMD};
use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Helper Functions
// =============================================================================

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn list_of(items: &[&str]) -> ListEntity {
    ListEntity::new(b("mylist"), items.iter().map(|s| b(s)).collect()).unwrap()
}

fn contents(list: &ListEntity) -> Vec<Bytes> {
    list.iter().cloned().collect()
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_new_empty_list() {
    let list = list_of(&[]);

    assert_eq!(list.len(), 0);
    assert!(list.is_empty());
    assert_eq!(list.capacity(), DEFAULT_CAP);
    assert_eq!(list.key(), &b("mylist"));
}

#[test]
fn test_new_with_elements_keeps_order() {
    let list = list_of(&["a", "b", "c"]);

    assert_eq!(contents(&list), vec![b("a"), b("b"), b("c")]);
}

#[test]
fn test_new_larger_than_default_rounds_capacity() {
    let items: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    let refs: Vec<&str> = items.iter().map(String::as_str).collect();
    let list = list_of(&refs);

    assert_eq!(list.len(), 20);
    assert_eq!(list.capacity(), 32);
}

// =============================================================================
// Push / Pop Tests
// =============================================================================

#[test]
fn test_push_right_then_left_ordering() {
    let mut list = list_of(&[]);

    list.push_right(b("a")).unwrap();
    list.push_right(b("b")).unwrap();
    list.push_left(b("c")).unwrap();

    assert_eq!(contents(&list), vec![b("c"), b("a"), b("b")]);
}

#[test]
fn test_pop_left_and_right() {
    let mut list = list_of(&["a", "b", "c", "d"]);

    assert_eq!(list.pop_left(1), Some(vec![b("a")]));
    assert_eq!(list.pop_right(1), Some(vec![b("d")]));
    assert_eq!(contents(&list), vec![b("b"), b("c")]);
}

#[test]
fn test_pop_right_returns_left_to_right_order() {
    let mut list = list_of(&["a", "b", "c", "d"]);

    assert_eq!(list.pop_right(3), Some(vec![b("b"), b("c"), b("d")]));
    assert_eq!(contents(&list), vec![b("a")]);
}

#[test]
fn test_pop_more_than_len_is_all_or_nothing() {
    let mut list = list_of(&["a", "b"]);

    assert_eq!(list.pop_left(3), None);
    assert_eq!(list.pop_right(3), None);
    assert_eq!(contents(&list), vec![b("a"), b("b")]);
}

#[test]
fn test_pop_zero_is_empty() {
    let mut list = list_of(&["a"]);

    assert_eq!(list.pop_left(0), Some(vec![]));
    assert_eq!(list.len(), 1);
}

#[test]
fn test_pop_from_empty_list() {
    let mut list = list_of(&[]);

    assert_eq!(list.pop_left(1), None);
    assert_eq!(list.pop_right(1), None);
}

#[test]
fn test_drain_then_reuse() {
    let mut list = list_of(&["a", "b"]);

    list.pop_left(2).unwrap();
    assert!(list.is_empty());

    list.push_left(b("x")).unwrap();
    list.push_right(b("y")).unwrap();
    assert_eq!(contents(&list), vec![b("x"), b("y")]);
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_growth_with_alternating_pushes() {
    let mut list = list_of(&[]);
    let mut expected = std::collections::VecDeque::new();

    for i in 0..(2 * DEFAULT_CAP + 1) {
        let value = b(&i.to_string());
        if i % 2 == 0 {
            list.push_left(value.clone()).unwrap();
            expected.push_front(value);
        } else {
            list.push_right(value.clone()).unwrap();
            expected.push_back(value);
        }
    }

    assert_eq!(list.len(), 2 * DEFAULT_CAP + 1);
    assert_eq!(list.capacity(), 4 * DEFAULT_CAP);
    assert!(list.capacity().is_power_of_two());
    assert_eq!(contents(&list), expected.into_iter().collect::<Vec<_>>());
}

#[test]
fn test_growth_after_wraparound() {
    let mut list = list_of(&[]);

    // Move head away from slot 0 before filling up
    for i in 0..10 {
        list.push_right(b(&i.to_string())).unwrap();
    }
    list.pop_left(8).unwrap();
    for i in 10..30 {
        list.push_right(b(&i.to_string())).unwrap();
    }

    let expected: Vec<Bytes> = (8..30).map(|i| b(&i.to_string())).collect();
    assert_eq!(contents(&list), expected);
    assert_eq!(list.capacity(), 32);
}

#[test]
fn test_random_ops_keep_ring_invariants() {
    for seed in [1u64, 7, 42, 1234] {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut list = list_of(&[]);
        let mut model = std::collections::VecDeque::new();
        let (mut pushes, mut pops) = (0usize, 0usize);

        for step in 0..5000 {
            let value = b(&step.to_string());
            // Pushes outweigh pops so the ring grows while wrapping
            match rng.gen_range(0..6) {
                0 | 1 => {
                    list.push_left(value.clone()).unwrap();
                    model.push_front(value);
                    pushes += 1;
                }
                2 | 3 => {
                    list.push_right(value.clone()).unwrap();
                    model.push_back(value);
                    pushes += 1;
                }
                4 => {
                    let n = rng.gen_range(1..3);
                    match list.pop_left(n) {
                        Some(out) => {
                            let expected: Vec<Bytes> = model.drain(..n).collect();
                            assert_eq!(out, expected);
                            pops += n;
                        }
                        None => assert!(model.len() < n),
                    }
                }
                _ => {
                    let n = rng.gen_range(1..3);
                    match list.pop_right(n) {
                        Some(out) => {
                            let expected: Vec<Bytes> = model.drain(model.len() - n..).collect();
                            assert_eq!(out, expected);
                            pops += n;
                        }
                        None => assert!(model.len() < n),
                    }
                }
            }

            assert_eq!(list.len(), pushes - pops, "seed {} step {}", seed, step);
            assert!(list.len() <= list.capacity());
            assert!(list.capacity().is_power_of_two());
        }
        assert!(list.capacity() > DEFAULT_CAP);
        assert_eq!(contents(&list), model.into_iter().collect::<Vec<_>>());
    }
}

// =============================================================================
// Range / Index Tests
// =============================================================================

#[test]
fn test_get_by_index() {
    let mut list = list_of(&["b", "c"]);
    list.push_left(b("a")).unwrap();

    assert_eq!(list.get(0), Some(&b("a")));
    assert_eq!(list.get(2), Some(&b("c")));
    assert_eq!(list.get(3), None);
}

#[test]
fn test_range_whole_list_with_minus_one() {
    let list = list_of(&["a", "b", "c"]);

    assert_eq!(list.range(0, -1), Some(vec![b("a"), b("b"), b("c")]));
}

#[test]
fn test_range_sub_slice() {
    let list = list_of(&["a", "b", "c", "d"]);

    assert_eq!(list.range(1, 2), Some(vec![b("b"), b("c")]));
    assert_eq!(list.range(3, 3), Some(vec![b("d")]));
}

#[test]
fn test_range_invalid_bounds() {
    let list = list_of(&["a", "b", "c"]);

    assert_eq!(list.range(-1, 2), None);
    assert_eq!(list.range(3, -1), None);
    assert_eq!(list.range(2, 1), None);
    assert_eq!(list.range(0, 3), None);
    assert_eq!(list.range(0, -2), None);
}

#[test]
fn test_range_on_empty_list() {
    let list = list_of(&[]);

    assert_eq!(list.range(0, -1), None);
}

// =============================================================================
// Reconstruction Tests
// =============================================================================

#[test]
fn test_to_cmds_is_rpush_in_order() {
    let mut list = list_of(&["a", "b"]);
    list.push_left(b("c")).unwrap();

    assert_eq!(
        list.to_cmds(),
        vec![vec![b("rpush"), b("mylist"), b("c"), b("a"), b("b")]]
    );
}

#[test]
fn test_to_cmds_rebuilds_same_contents() {
    let mut list = list_of(&[]);
    for i in 0..40 {
        if i % 3 == 0 {
            list.push_left(b(&i.to_string())).unwrap();
        } else {
            list.push_right(b(&i.to_string())).unwrap();
        }
    }
    list.pop_left(5).unwrap();

    let mut rebuilt = list_of(&[]);
    for cmd in list.to_cmds() {
        for value in &cmd[2..] {
            rebuilt.push_right(value.clone()).unwrap();
        }
    }

    assert_eq!(contents(&rebuilt), contents(&list));
}

#[test]
fn test_to_cmds_splits_long_lists() {
    let total = 2 * ITEMS_PER_CMD + 10;
    let items: Vec<String> = (0..total).map(|i| i.to_string()).collect();
    let refs: Vec<&str> = items.iter().map(String::as_str).collect();
    let list = list_of(&refs);

    let cmds = list.to_cmds();

    assert_eq!(cmds.len(), 3);
    assert_eq!(cmds[0].len(), 2 + ITEMS_PER_CMD);
    assert_eq!(cmds[2].len(), 2 + 10);
    for cmd in &cmds {
        assert_eq!(cmd[0], b("rpush"));
        assert_eq!(cmd[1], b("mylist"));
    }
    let replayed: Vec<Bytes> = cmds.iter().flat_map(|cmd| cmd[2..].to_vec()).collect();
    assert_eq!(replayed, contents(&list));
}

#[test]
fn test_to_cmds_of_empty_list_is_empty() {
    let list = list_of(&[]);

    assert!(list.to_cmds().is_empty());
}

// =============================================================================
// Capacity Ceiling Tests
// =============================================================================

#[test]
fn test_push_beyond_ceiling_fails_without_change() {
    let mut list = ListEntity::with_limits(b("small"), Vec::new(), 4).unwrap();

    for i in 0..4 {
        list.push_right(b(&i.to_string())).unwrap();
    }
    assert!(!list.can_hold(1));

    let err = list.push_left(b("overflow")).unwrap_err();
    assert!(matches!(err, KvError::CapacityExceeded { max: 4 }));
    assert_eq!(list.len(), 4);
    assert_eq!(list.get(0), Some(&b("0")));
}

#[test]
fn test_with_limits_rejects_oversized_initial_elements() {
    let items = vec![b("a"), b("b"), b("c")];

    let result = ListEntity::with_limits(b("small"), items, 2);

    assert!(matches!(result, Err(KvError::CapacityExceeded { .. })));
}
