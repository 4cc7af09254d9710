use crate::setup::{Harness, users_query};
use model::query::Query;
use model::record::{Record, RecordSet};
use std::time::Duration;
use test_utils::StatusCode;

fn by_region(rows: &[(&str, serde_json::Value)]) -> RecordSet {
    rows.iter()
        .map(|(region, count)| {
            let count: model::record::Value =
                serde_json::from_value(count.clone()).expect("Count should decode");
            Record::new().with("region", *region).with("count", count)
        })
        .collect::<Vec<_>>()
        .into()
}

#[tokio::test]
async fn test_series_follow_result_rows() {
    let mut harness = Harness::start().await;
    harness
        .agent
        .then_rows(&by_region(&[("eu", 3.into()), ("us", 5.into())]));
    harness.agent.always_rows(&by_region(&[("eu", 4.into())]));
    harness.spawn(users_query(Duration::from_millis(300)));

    harness
        .wait_for("both regions", |body| {
            body.contains(r#"query_result_users{region="eu"} 3"#)
                && body.contains(r#"query_result_users{region="us"} 5"#)
        })
        .await;
    let body = harness
        .wait_for("the us series to be retired", |body| {
            !body.contains(r#"region="us""#)
        })
        .await;
    assert!(body.contains(r#"query_result_users{region="eu"} 4"#));
    assert!(body.contains("# HELP query_result_users Result of an SQL query"));

    let request = &harness.agent.requests()[0];
    assert_eq!(request["driver"], "postgres");
    assert_eq!(
        request["sql"],
        "SELECT region, count(*) AS count FROM users GROUP BY region"
    );

    let report = harness.supervisor.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.finished, 1);
}

#[tokio::test]
async fn test_value_on_error_while_agent_fails() {
    let mut harness = Harness::start().await;
    harness.agent.always_status(StatusCode::INTERNAL_SERVER_ERROR);
    harness.spawn(
        Query::new("up", "postgres", "SELECT 1")
            .with_interval(Duration::from_secs(60))
            .with_value_on_error("-1"),
    );

    harness
        .wait_for("the error value", |body| body.contains("query_result_up -1"))
        .await;

    harness
        .agent
        .always_rows(&RecordSet::new(vec![Record::new().with("value", 7)]));
    let body = harness
        .wait_for("recovery", |body| body.contains("query_result_up 7"))
        .await;
    assert!(!body.contains("query_result_up -1"));

    harness.supervisor.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_malformed_rows_keep_published_series() {
    let mut harness = Harness::start().await;
    harness.agent.then_rows(&by_region(&[("eu", 3.into())]));
    harness
        .agent
        .always_rows(&by_region(&[("eu", "abc".into()), ("us", 1.into())]));
    harness.spawn(users_query(Duration::from_millis(50)));

    harness
        .wait_for("the first round", |body| {
            body.contains(r#"query_result_users{region="eu"} 3"#)
        })
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.agent.requests().len() >= 3);

    let body = harness.scrape();
    assert!(body.contains(r#"query_result_users{region="eu"} 3"#));
    assert!(!body.contains(r#"region="us""#));

    harness.supervisor.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_queries_share_one_registry() {
    let mut harness = Harness::start().await;
    harness
        .agent
        .always_rows(&RecordSet::new(vec![Record::new().with("value", 1)]));
    harness.spawn(Query::new("first", "postgres", "SELECT 1").with_interval(Duration::from_secs(60)));
    harness.spawn(Query::new("second", "postgres", "SELECT 1").with_interval(Duration::from_secs(60)));

    harness
        .wait_for("both queries", |body| {
            body.contains("query_result_first 1") && body.contains("query_result_second 1")
        })
        .await;

    let report = harness.supervisor.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.finished, 2);
    assert_eq!(report.aborted, 0);
}
