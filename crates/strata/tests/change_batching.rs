//! Change-block coalescing across layer mutations.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use strata::{ChangeBlock, ChangeEvent, ChangeKind, Layer, ScenePath, SpecType, Token, Value, register_listener};

fn p(text: &str) -> ScenePath {
    ScenePath::from_string(text)
}

#[test]
fn nested_blocks_deliver_one_composite_notification() {
    let layer = Layer::create_anonymous("batching");
    layer.create_spec(&p("/Counter"), SpecType::Prim);
    let identifier = layer.identifier();

    let calls = Arc::new(AtomicUsize::new(0));
    let batches: Arc<Mutex<Vec<Vec<ChangeEvent>>>> = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let calls = Arc::clone(&calls);
        let batches = Arc::clone(&batches);
        let identifier = identifier.clone();
        register_listener(move |batch| {
            let mine: Vec<ChangeEvent> = batch.iter().filter(|e| e.layer == identifier).cloned().collect();
            if !mine.is_empty() {
                calls.fetch_add(1, Ordering::SeqCst);
                batches.lock().unwrap().push(mine);
            }
        })
    };

    {
        let _outer = ChangeBlock::new();
        {
            let _inner = ChangeBlock::new();
            for i in 0..50 {
                layer.set_field(&p("/Counter"), Token::new(&format!("f{i}")), Value::from(i));
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0, "inner close must not notify");
        for i in 50..100 {
            layer.set_field(&p("/Counter"), Token::new(&format!("f{i}")), Value::from(i));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0, "outer block still open");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one composite notification");
    let batches = batches.lock().unwrap();
    let field_changes = batches[0]
        .iter()
        .filter(|e| matches!(e.change, ChangeKind::FieldChanged(_)))
        .count();
    assert_eq!(field_changes, 100, "the batch covers every mutation");
    drop(handle);
}

#[test]
fn repeated_edits_to_one_field_coalesce() {
    let layer = Layer::create_anonymous("batching-dedup");
    layer.create_spec(&p("/P"), SpecType::Prim);
    let identifier = layer.identifier();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let seen = Arc::clone(&seen);
        let identifier = identifier.clone();
        register_listener(move |batch| {
            seen.lock()
                .unwrap()
                .extend(batch.iter().filter(|e| e.layer == identifier).cloned());
        })
    };

    {
        let _block = ChangeBlock::new();
        for value in 0..10 {
            layer.set_field(&p("/P"), Token::new("hot"), Value::from(value));
        }
    }
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "identical events coalesce to one entry");
    assert_eq!(
        seen[0].change,
        ChangeKind::FieldChanged(Token::new("hot")),
        "the surviving entry names the field"
    );
    drop(handle);
}

#[test]
fn spec_lifecycle_events_carry_their_paths() {
    let layer = Layer::create_anonymous("batching-lifecycle");
    let identifier = layer.identifier();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = {
        let seen = Arc::clone(&seen);
        let identifier = identifier.clone();
        register_listener(move |batch| {
            seen.lock()
                .unwrap()
                .extend(batch.iter().filter(|e| e.layer == identifier).cloned());
        })
    };

    {
        let _block = ChangeBlock::new();
        layer.create_spec(&p("/A"), SpecType::Prim);
        layer.rename_spec(&p("/A"), Token::new("B"));
        layer.remove_spec(&p("/B"));
    }

    let seen = seen.lock().unwrap();
    let kinds: Vec<&ChangeKind> = seen.iter().map(|e| &e.change).collect();
    assert!(kinds.iter().any(|k| matches!(k, ChangeKind::SpecCreated)));
    assert!(
        kinds
            .iter()
            .any(|k| matches!(k, ChangeKind::SpecMoved { new_path } if *new_path == p("/B")))
    );
    assert!(kinds.iter().any(|k| matches!(k, ChangeKind::SpecRemoved)));
    drop(handle);
}
