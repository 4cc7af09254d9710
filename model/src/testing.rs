//! Test utilities and proptest strategies for model types.
//!
//! This module is only available when the `testing` feature is enabled.

use crate::query::Query;
use crate::record::{Record, RecordSet, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Runs an async property body on a fresh current-thread runtime.
/// Panics are treated as test failures.
pub fn test_prop<F, Fut>(f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    rt.block_on(async {
        f().await;
    });
}

pub fn arb_column_name() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z][a-z0-9_]{0,11}").unwrap()
}

pub fn arb_label_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Int),
        proptest::string::string_regex("[A-Za-z0-9 _-]{0,16}")
            .unwrap()
            .prop_map(Value::Text),
    ]
}

pub fn arb_numeric_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-1_000_000i64..1_000_000).prop_map(Value::Int),
        (-1e6f64..1e6).prop_map(Value::Float),
        (-1_000i32..1_000).prop_map(|n| Value::Text(n.to_string())),
    ]
}

/// Label columns with values, never containing `value_column`.
pub fn arb_labels(value_column: &'static str) -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(arb_column_name(), arb_label_value(), 0..4)
        .prop_filter("labels must not shadow the value column", move |labels| {
            !labels.contains_key(value_column)
        })
}

prop_compose! {
    /// Strategy for a result set whose rows share one label schema and carry
    /// their value in `value_column`.
    pub fn arb_record_set(value_column: &'static str)(
        columns in prop::collection::btree_set(arb_column_name(), 1..4)
            .prop_filter("labels must not shadow the value column", move |cols| !cols.contains(value_column)),
        rows in 1..8usize,
    )(
        rows in prop::collection::vec(
            (prop::collection::vec(arb_label_value(), columns.len()), arb_numeric_value()),
            rows,
        ),
        label_columns in Just(columns),
    ) -> RecordSet {
        rows.into_iter()
            .map(|(labels, value)| {
                label_columns
                    .iter()
                    .cloned()
                    .zip(labels)
                    .chain(std::iter::once((value_column.to_string(), value)))
                    .collect::<Record>()
            })
            .collect::<Vec<_>>()
            .into()
    }
}

prop_compose! {
    /// Strategy for valid query descriptors.
    pub fn arb_query()(
        name in proptest::string::string_regex("[a-z][a-z0-9_]{0,15}").unwrap(),
        driver in prop_oneof![Just("postgres"), Just("mysql"), Just("sqlite")],
        interval_secs in 1..3600u64,
        timeout_secs in 1..120u64,
        data_field in arb_column_name(),
    ) -> Query {
        Query::new(name, driver, "SELECT 1")
            .with_interval(Duration::from_secs(interval_secs))
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_data_field(&data_field)
    }
}
