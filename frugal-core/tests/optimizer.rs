//! Query rewriting, pass-through and association learning

mod support;

use frugal_core::prelude::*;
use frugal_core::Bypass;
use std::sync::Arc;
use support::{call_from, names, optimizer, optimizer_with, post, read};

#[test]
fn test_filter_values_share_callsite() {
    let optimizer = optimizer();
    let a = FindOptions::new().conditions("published = 1").limit(2);
    let b = FindOptions::new().conditions("published = 0").limit(20).offset(40);

    let first = optimizer.optimize_query(&post(), a, &call_from(10));
    let second = optimizer.optimize_query(&post(), b, &call_from(10));

    assert_eq!(first.context.signature(), second.context.signature());
    assert_eq!(optimizer.registry().len(), 1);
}

#[test]
fn test_structure_changes_callsite() {
    let optimizer = optimizer();
    optimizer.optimize_query(&post(), FindOptions::new(), &call_from(10));
    optimizer.optimize_query(&post(), FindOptions::new().order("title"), &call_from(10));

    assert_eq!(optimizer.registry().len(), 2);
}

#[test]
fn test_disabled_passes_through() {
    let config = OptimizerConfig {
        enabled: false,
        ..OptimizerConfig::default()
    };
    let optimizer = optimizer_with(config);

    let query = optimizer.optimize_query(&post(), FindOptions::new(), &call_from(10));
    assert_eq!(query.bypass, Some(Bypass::Disabled));
    assert_eq!(query.options, FindOptions::new());
    assert!(optimizer.registry().is_empty());
}

#[test]
fn test_preload_scope_passes_through() {
    let optimizer = optimizer();
    let mut ctx = call_from(10);

    {
        let scope = ctx.enter_preload();
        let query = optimizer.optimize_query(&post(), FindOptions::new(), &scope);
        assert_eq!(query.bypass, Some(Bypass::Reentrant));
    }

    let query = optimizer.optimize_query(&post(), FindOptions::new(), &ctx);
    assert!(query.is_optimized());
}

#[test]
fn test_missing_primary_key_passes_through() {
    let optimizer = optimizer();
    let query = optimizer.optimize_query(&EntityType::new("Legacy"), FindOptions::new(), &call_from(10));
    assert_eq!(query.bypass, Some(Bypass::NoPrimaryKey));
}

#[test]
fn test_unknown_entity_passes_through() {
    let optimizer = optimizer();
    let query = optimizer.optimize_query(&EntityType::new("Ghost"), FindOptions::new(), &call_from(10));
    assert_eq!(query.bypass, Some(Bypass::UnknownEntity));
    assert_eq!(optimizer.metrics().bypassed, 1);
}

#[test]
fn test_explicit_select_augmented_after_learning() {
    let optimizer = optimizer();
    let options = FindOptions::new().select(["id", "title"]);

    let mut rows = optimizer
        .find(&post(), options.clone(), &call_from(20))
        .unwrap();
    let select = optimizer.adapter().last_select().unwrap().options.select;
    assert_eq!(
        select,
        Some(vec!["id".to_string(), "title".to_string(), "type".to_string()])
    );

    read(&optimizer, &mut rows[0], "body");

    optimizer.find(&post(), options, &call_from(20)).unwrap();
    let select = optimizer.adapter().last_select().unwrap().options.select;
    assert_eq!(
        select,
        Some(vec![
            "id".to_string(),
            "title".to_string(),
            "type".to_string(),
            "body".to_string()
        ])
    );
}

#[test]
fn test_explicit_select_keeps_primary_key() {
    let optimizer = optimizer();
    let mut rows = optimizer
        .find(&post(), FindOptions::new().select(["title"]), &call_from(21))
        .unwrap();
    let row = &mut rows[0];

    assert_eq!(names(row.tracking().unwrap().own_columns()), vec!["id", "title", "type"]);
    assert_eq!(row.get("id"), Some("1"));

    let access = optimizer.record_column_miss(row, "body").unwrap();
    assert_eq!(access, ColumnAccess::Escalated);
    assert_eq!(row.get("body"), Some("body-1"));
    assert_eq!(optimizer.adapter().reload_count(), 1);
}

#[test]
fn test_star_select_uses_callsite_columns() {
    let optimizer = optimizer();
    let query = optimizer.optimize_query(&post(), FindOptions::new().select(["*"]), &call_from(30));
    assert_eq!(
        query.options.select,
        Some(vec!["id".to_string(), "type".to_string()])
    );
}

#[test]
fn test_association_learning_feeds_includes() {
    let optimizer = optimizer();
    let mut rows = optimizer
        .find(&post(), FindOptions::new(), &call_from(40))
        .unwrap();

    assert!(optimizer.record_association(&mut rows[0], "author"));
    assert!(!optimizer.record_association(&mut rows[0], "author"));
    assert!(!optimizer.record_association(&mut rows[1], "author"));
    assert!(!optimizer.record_association(&mut rows[0], "comments"));
    assert!(!optimizer.record_association(&mut rows[0], "taggable"));

    let query = optimizer.optimize_query(&post(), FindOptions::new(), &call_from(40));
    assert_eq!(query.options.include, Some(Includes::list(["author"])));

    assert_eq!(optimizer.metrics().learned_associations, 1);
}

#[test]
fn test_learned_associations_join_requested_list() {
    let optimizer = optimizer();
    let options = FindOptions::new().include(Includes::from("category"));

    let mut rows = optimizer.find(&post(), options.clone(), &call_from(41)).unwrap();
    optimizer.record_association(&mut rows[0], "author");

    let query = optimizer.optimize_query(&post(), options, &call_from(41));
    assert_eq!(query.options.include, Some(Includes::list(["category", "author"])));
}

#[test]
fn test_nested_includes_untouched() {
    let optimizer = optimizer();
    let nested = Includes::nested("comments", Includes::from("author"));
    let options = FindOptions::new().include(nested.clone());

    let mut rows = optimizer.find(&post(), options.clone(), &call_from(50)).unwrap();
    optimizer.record_association(&mut rows[0], "author");

    let query = optimizer.optimize_query(&post(), options, &call_from(50));
    assert_eq!(query.options.include, Some(nested));
}

#[test]
fn test_failed_optimized_select_falls_back() {
    let optimizer = optimizer();
    optimizer.adapter().fail_optimized_selects(true);

    let rows = optimizer
        .find(&post(), FindOptions::new(), &call_from(60))
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert!(rows[0].tracking().is_none());
    assert_eq!(rows[0].values.len(), 6);

    let selects = optimizer.adapter().selects();
    assert_eq!(selects.len(), 2);
    assert!(selects[0].optimized);
    assert!(!selects[1].optimized);
    assert_eq!(optimizer.metrics().fallbacks, 1);
}

#[test]
fn test_flush_forgets_learning() {
    let optimizer = optimizer();
    let mut rows = optimizer
        .find(&post(), FindOptions::new(), &call_from(70))
        .unwrap();
    read(&optimizer, &mut rows[0], "title");

    optimizer.flush_callsites(&post());

    let query = optimizer.optimize_query(&post(), FindOptions::new(), &call_from(70));
    assert_eq!(
        query.options.select,
        Some(vec!["id".to_string(), "type".to_string()])
    );
}

#[test]
fn test_concurrent_finds_share_callsite() {
    let optimizer = Arc::new(optimizer());

    let handles: Vec<_> = ["title", "body", "published", "author_id"]
        .into_iter()
        .map(|column| {
            let optimizer = Arc::clone(&optimizer);
            std::thread::spawn(move || {
                let mut rows = optimizer
                    .find(&post(), FindOptions::new(), &call_from(80))
                    .unwrap();
                read(&optimizer, &mut rows[0], column);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(optimizer.registry().len(), 1);
    let callsites = optimizer.registry().callsites(&post());
    assert_eq!(callsites[0].select_columns().len(), 6);
}
