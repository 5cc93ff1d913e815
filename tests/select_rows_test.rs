mod common;

use std::sync::Arc;

use serde_json::json;

use common::{make_default_test_data, transform_column, LengthSignal};
use shardset::schema::{DataType, Field};
use shardset::{
    BinaryOp, ColumnId, DatasetError, Filter, Item, Schema, SelectRowsOptions, SortOrder,
};

fn flat_schema() -> Schema {
    Schema::new([
        ("name".to_string(), Field::leaf(DataType::String)),
        ("age".to_string(), Field::leaf(DataType::Int32)),
        ("active".to_string(), Field::leaf(DataType::Bool)),
    ])
}

fn flat_items() -> Vec<Item> {
    vec![
        json!({"name": "Name1", "age": 34, "active": false}),
        json!({"name": "Name2", "age": 45, "active": true}),
        json!({"age": 17, "active": true}),
        json!({"name": "Name3", "active": true}),
        json!({"name": "Name4", "age": 55}),
    ]
}

#[test]
fn uuid_filter_round_trips_one_row() {
    let (_root, dataset) = make_default_test_data(&flat_items(), flat_schema());

    let result = dataset
        .select_rows(SelectRowsOptions {
            filters: vec![Filter::new("uuid", BinaryOp::Equals, "2")],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(result.len(), 1);
    let row = &result.rows()[0];
    assert_eq!(row["uuid"], json!("2"));
    assert_eq!(row["name"], json!("Name2"));
    assert_eq!(row["age"], json!(45));
    assert_eq!(row["active"], json!(true));
}

#[test]
fn default_projection_appends_uuid_and_surfaces_nulls() {
    let (_root, dataset) = make_default_test_data(&flat_items(), flat_schema());

    let result = dataset.select_rows(SelectRowsOptions::default()).unwrap();
    assert_eq!(result.len(), 5);
    let rows = result.rows();
    assert!(rows.iter().all(|row| row.contains_key("uuid")));
    assert_eq!(rows[2]["name"], json!(null));
    assert_eq!(rows[3]["age"], json!(null));
    assert_eq!(rows[4]["active"], json!(null));
}

#[test]
fn sort_limit_offset() {
    let (_root, dataset) = make_default_test_data(&flat_items(), flat_schema());

    let result = dataset
        .select_rows(SelectRowsOptions {
            sort_by: vec!["age".to_string()],
            sort_order: SortOrder::Desc,
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    let ages: Vec<Item> = result.into_iter().map(|row| row["age"].clone()).collect();
    assert_eq!(ages, vec![json!(55), json!(45)]);

    let result = dataset
        .select_rows(SelectRowsOptions {
            sort_by: vec!["age".to_string()],
            sort_order: SortOrder::Asc,
            limit: Some(2),
            offset: 1,
            ..Default::default()
        })
        .unwrap();
    let ages: Vec<Item> = result.into_iter().map(|row| row["age"].clone()).collect();
    assert_eq!(ages, vec![json!(34), json!(45)]);
}

#[test]
fn unknown_sort_alias_is_rejected() {
    let (_root, dataset) = make_default_test_data(&flat_items(), flat_schema());
    let err = dataset
        .select_rows(SelectRowsOptions {
            sort_by: vec!["missing".to_string()],
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DatasetError::SortAliasUnknown { .. }));
}

fn texts_schema() -> Schema {
    Schema::new([(
        "texts".to_string(),
        Field::repeated(Field::leaf(DataType::String)),
    )])
}

fn texts_items() -> Vec<Item> {
    vec![
        json!({"texts": ["abc", "d"]}),
        json!({"texts": ["ef"]}),
        json!({}),
    ]
}

#[test]
fn repeated_column_selection_keeps_nesting() {
    let (_root, dataset) = make_default_test_data(&texts_items(), texts_schema());

    let result = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![ColumnId::from("texts.*")]),
            ..Default::default()
        })
        .unwrap();
    let rows = result.rows();
    assert_eq!(rows[0]["texts.*"], json!(["abc", "d"]));
    assert_eq!(rows[1]["texts.*"], json!(["ef"]));
    assert_eq!(rows[2]["texts.*"], json!(null));
}

#[test]
fn wildcard_and_index_selections_rejected() {
    let (_root, dataset) = make_default_test_data(&texts_items(), texts_schema());

    let err = dataset
        .select_rows(SelectRowsOptions {
            filters: vec![Filter::new("texts.*", BinaryOp::Equals, "abc")],
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DatasetError::FilterOnRepeatedPath(_)));

    let err = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![ColumnId::from("texts.0")]),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DatasetError::IndexIntoRepeated(_)));
}

#[test]
fn signal_transform_runs_after_projection() {
    let schema = Schema::new([("name".to_string(), Field::leaf(DataType::String))]);
    let items = vec![
        json!({"name": "a"}),
        json!({"name": "abc"}),
        json!({"name": null}),
    ];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let result = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![
                ColumnId::from("name"),
                ColumnId::from(transform_column("name", "name_len", Arc::new(LengthSignal))),
            ]),
            ..Default::default()
        })
        .unwrap();
    let rows = result.rows();
    assert_eq!(rows[0]["name_len"], json!(1));
    assert_eq!(rows[1]["name_len"], json!(3));
    assert_eq!(rows[2]["name_len"], json!(null));
    assert_eq!(rows[0]["name"], json!("a"));
}

#[test]
fn transform_filters_apply_to_signal_outputs() {
    let schema = Schema::new([("name".to_string(), Field::leaf(DataType::String))]);
    let items = vec![
        json!({"name": "a"}),
        json!({"name": "abc"}),
        json!({"name": "abcd"}),
    ];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let result = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![
                ColumnId::from("name"),
                ColumnId::from(transform_column("name", "name_len", Arc::new(LengthSignal))),
            ]),
            filters: vec![Filter::new("name_len", BinaryOp::Greater, 1i64)],
            ..Default::default()
        })
        .unwrap();
    let names: Vec<Item> = result.into_iter().map(|row| row["name"].clone()).collect();
    assert_eq!(names, vec![json!("abc"), json!("abcd")]);
}

#[test]
fn transform_over_repeated_leaf_preserves_shape() {
    let (_root, dataset) = make_default_test_data(&texts_items(), texts_schema());

    let result = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![ColumnId::from(transform_column(
                "texts.*",
                "texts_len",
                Arc::new(LengthSignal),
            ))]),
            ..Default::default()
        })
        .unwrap();
    let rows = result.rows();
    assert_eq!(rows[0]["texts_len"], json!([3, 1]));
    assert_eq!(rows[1]["texts_len"], json!([2]));
    assert_eq!(rows[2]["texts_len"], json!(null));
}

#[test]
fn signal_transform_requires_a_leaf() {
    let schema = Schema::new([(
        "nested".to_string(),
        Field::structure([("name".to_string(), Field::leaf(DataType::String))]),
    )]);
    let items = vec![json!({"nested": {"name": "x"}})];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let err = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![ColumnId::from(transform_column(
                "nested",
                "nested_len",
                Arc::new(LengthSignal),
            ))]),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DatasetError::PathNotLeaf(_)));
}

#[test]
fn transform_dtype_mismatch_rejected() {
    let schema = Schema::new([("age".to_string(), Field::leaf(DataType::Int64))]);
    let items = vec![json!({"age": 3})];
    let (_root, dataset) = make_default_test_data(&items, schema);

    let err = dataset
        .select_rows(SelectRowsOptions {
            columns: Some(vec![ColumnId::from(transform_column(
                "age",
                "age_len",
                Arc::new(LengthSignal),
            ))]),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, DatasetError::EnrichmentTypeMismatch { .. }));
}
