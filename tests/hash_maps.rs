//! Hash-map contracts: growth, callbacks, union values and cursors.

use std::cell::RefCell;
use std::rc::Rc;

use dynfi::map::{MapOptions, RemovedCallback, Value};
use dynfi::{LongMap, StringMap};

#[test]
fn default_options_give_a_usable_map() {
    let mut map: StringMap<i64> = StringMap::with_options(MapOptions::default());
    assert_eq!(map.capacity(), 16);
    assert!(map.is_empty());
    map.put("alpha", 1);
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("alpha"), Some(&1));
}

#[test]
fn initial_capacity_rounds_up_to_a_power_of_two() {
    let map: LongMap<()> = LongMap::with_options(MapOptions {
        initial_capacity: 17,
        ..MapOptions::default()
    });
    assert_eq!(map.capacity(), 32);
}

#[test]
fn many_keys_survive_growth() {
    let mut map: StringMap<i64> = StringMap::with_options(MapOptions {
        initial_capacity: 2,
        ..MapOptions::default()
    });
    for i in 0..1000 {
        assert_eq!(map.put(&format!("key-{i}"), i), None);
    }
    assert_eq!(map.len(), 1000);
    for i in 0..1000 {
        assert_eq!(map.get(&format!("key-{i}")), Some(&i), "key-{i}");
    }
    for i in (0..1000).step_by(2) {
        assert!(map.remove(&format!("key-{i}")));
    }
    assert_eq!(map.len(), 500);
    assert!(!map.has_key("key-0"));
    assert!(map.has_key("key-1"));
}

#[test]
fn long_keys_use_the_full_width() {
    let mut map: LongMap<i64> = LongMap::new();
    let keys = [0i64, -1, 1, i64::MIN, i64::MAX, 1 << 33, -(1 << 33)];
    for (i, k) in keys.iter().enumerate() {
        map.put(*k, i as i64);
    }
    assert_eq!(map.len(), keys.len());
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(map.get(*k), Some(&(i as i64)));
    }
}

#[test]
fn put_reports_displaced_values() {
    let mut map = StringMap::new();
    assert!(!map.put_long("x", 1));
    assert!(map.put_long("x", 2));
    assert_eq!(map.get_long("x", 0), 2);

    // overwriting with another union member changes what the getters see
    map.put_bool("x", true);
    assert_eq!(map.get_long("x", -1), -1);
    assert!(map.get_bool("x", false));
}

#[test]
fn union_values_keep_their_member() {
    let mut map = LongMap::new();
    map.put(1, Value::Long(42));
    map.put(2, Value::Double(0.5));
    map.put(3, Value::Bool(false));
    map.put(4, Value::Ptr(std::ptr::null_mut()));
    assert_eq!(map.get_long(1, 0), 42);
    assert_eq!(map.get_double(2, 0.0), 0.5);
    assert!(!map.get_bool(3, true));
    assert_eq!(map.get_ptr(4), Some(std::ptr::null_mut()));
    assert_eq!(map.get_ptr(1), None);
}

#[test]
fn keyed_callback_sees_keys_and_values() {
    let removed: Rc<RefCell<Vec<(String, i64)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&removed);
    let mut map: StringMap<i64> = StringMap::with_options(MapOptions {
        removed: Some(RemovedCallback::Keyed(Box::new(move |k, v| {
            sink.borrow_mut().push((k.to_string(), *v));
        }))),
        ..MapOptions::default()
    });
    map.put("one", 1);
    map.put("two", 2);
    map.remove("one");
    map.clear();
    let seen = removed.borrow();
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&("one".to_string(), 1)));
    assert!(seen.contains(&("two".to_string(), 2)));
}

#[test]
fn overwrite_does_not_fire_the_removed_callback() {
    let hits = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&hits);
    let mut map: LongMap<i64> = LongMap::with_options(MapOptions {
        removed: Some(RemovedCallback::Simple(Box::new(move |_| {
            *sink.borrow_mut() += 1;
        }))),
        ..MapOptions::default()
    });
    map.put(7, 1);
    map.put(7, 2); // displaced value is returned, not dropped via the hook
    assert_eq!(*hits.borrow(), 0);
    map.remove(7);
    assert_eq!(*hits.borrow(), 1);
}

#[test]
fn cursor_visits_everything_exactly_once() {
    let mut map: LongMap<i64> = LongMap::new();
    for i in 0..100 {
        map.put(i, i);
    }
    let mut seen = vec![false; 100];
    let mut cursor = map.cursor();
    let mut steps = 0;
    while !cursor.is_end() {
        let k = *cursor.key().unwrap();
        assert!(!seen[k as usize]);
        seen[k as usize] = true;
        assert_eq!(cursor.index(), steps);
        cursor.next();
        steps += 1;
    }
    assert_eq!(steps, 100);
    assert!(seen.iter().all(|s| *s));
}

#[test]
fn cursor_can_mutate_values_in_place() {
    let mut map: StringMap<i64> = StringMap::new();
    map.put("a", 1);
    map.put("b", 2);
    let mut cursor = map.cursor();
    while !cursor.is_end() {
        *cursor.value_mut().unwrap() *= 10;
        cursor.next();
    }
    drop(cursor);
    assert_eq!(map.get("a"), Some(&10));
    assert_eq!(map.get("b"), Some(&20));
}

#[test]
fn cursor_removal_fires_callbacks() {
    let hits = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&hits);
    let mut map: LongMap<i64> = LongMap::with_options(MapOptions {
        removed: Some(RemovedCallback::Simple(Box::new(move |_| {
            *sink.borrow_mut() += 1;
        }))),
        ..MapOptions::default()
    });
    for i in 0..10 {
        map.put(i, i);
    }
    let mut cursor = map.cursor();
    while !cursor.is_end() {
        if *cursor.value().unwrap() < 5 {
            cursor.remove();
        } else {
            cursor.next();
        }
    }
    drop(cursor);
    assert_eq!(map.len(), 5);
    assert_eq!(*hits.borrow(), 5);
}

#[test]
fn iteration_can_drive_bulk_state() {
    // the descriptor engines keep auxiliary lookups in these maps; make
    // sure iteration composes with ordinary rust collection code
    let mut map: StringMap<i64> = StringMap::new();
    for (i, name) in ["header", "annotations", "types", "methods"]
        .iter()
        .enumerate()
    {
        map.put(name, i as i64);
    }
    let mut names: Vec<&str> = map.iter().map(|(k, _)| &**k).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["annotations", "header", "methods", "types"]);
    let total: i64 = map.iter().map(|(_, v)| *v).sum();
    assert_eq!(total, 6);
}
