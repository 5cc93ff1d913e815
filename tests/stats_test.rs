mod common;

use serde_json::json;

use common::make_default_test_data;
use shardset::schema::{DataType, Field};
use shardset::{DatasetError, Item, Schema};

#[test]
fn string_leaf_stats() {
    let schema = Schema::new([("name".to_string(), Field::leaf(DataType::String))]);
    let items = vec![
        json!({"name": "aa"}),
        json!({"name": "bbbb"}),
        json!({"name": "aa"}),
        json!({"name": null}),
    ];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let stats = dataset.stats("name").unwrap();
    assert_eq!(stats.total_count, 3);
    assert_eq!(stats.approx_count_distinct, 2);
    let avg = stats.avg_text_length.expect("strings have an average length");
    assert!((avg - 8.0 / 3.0).abs() < 1e-9);
    assert!(stats.min_val.is_none());
    assert!(stats.max_val.is_none());
}

#[test]
fn ordinal_leaf_min_max() {
    let schema = Schema::new([("age".to_string(), Field::leaf(DataType::Int64))]);
    let items = vec![
        json!({"age": 5}),
        json!({"age": 1}),
        json!({"age": 3}),
        json!({}),
    ];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let stats = dataset.stats("age").unwrap();
    assert_eq!(stats.total_count, 3);
    assert_eq!(stats.min_val, Some(Item::from(1)));
    assert_eq!(stats.max_val, Some(Item::from(5)));
    assert!(stats.avg_text_length.is_none());
}

#[test]
fn repeated_leaf_counts_elements() {
    let schema = Schema::new([(
        "texts".to_string(),
        Field::repeated(Field::leaf(DataType::String)),
    )]);
    let items = vec![
        json!({"texts": ["a", "b"]}),
        json!({"texts": ["c"]}),
        json!({}),
    ];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let stats = dataset.stats("texts.*").unwrap();
    assert_eq!(stats.total_count, 3);
}

#[test]
fn stats_requires_a_leaf_path() {
    let schema = Schema::new([(
        "nested".to_string(),
        Field::structure([("name".to_string(), Field::leaf(DataType::String))]),
    )]);
    let items = vec![json!({"nested": {"name": "x"}})];
    let (_root, dataset) = make_default_test_data(&items, schema);

    assert!(matches!(
        dataset.stats("nested").unwrap_err(),
        DatasetError::PathNotLeaf(_)
    ));
    assert!(matches!(
        dataset.stats("nested.missing").unwrap_err(),
        DatasetError::PathNotInSchema(_)
    ));
}
