use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use flowplan_common::{PlannerConfig, Properties, Record};
use flowplan_execution::TwoPhaseEnricher;
use flowplan_planner::{compile, sql_to_statement, Stage, TableKind, TableSource};
use serde_json::json;

fn stream(cols: &[&str]) -> TableSource {
    TableSource {
        kind: TableKind::Stream,
        schema: Arc::new(Schema::new(
            cols.iter()
                .map(|c| Field::new(*c, DataType::Int64, true))
                .collect::<Vec<_>>(),
        )),
    }
}

#[test]
fn window_boundaries_flow_from_sql_to_records() {
    let mut catalog = HashMap::new();
    catalog.insert("A".to_string(), stream(&["id", "ts"]));
    catalog.insert("B".to_string(), stream(&["aid", "v"]));

    let stmt = sql_to_statement(
        "SELECT A.id, SUM(B.v) AS total, window_start() AS ws, window_end() AS we \
         FROM A JOIN B ON A.id = B.aid GROUP BY A.id",
    )
    .expect("statement");
    let plan = compile(&stmt, &catalog, &PlannerConfig::default()).expect("compile");
    let group = match plan.root.last_stage() {
        Some(Stage::GroupBy(g)) => g,
        other => panic!("expected group by, got {other:?}"),
    };

    let enricher = TwoPhaseEnricher::for_stage(group).expect("enricher");
    assert_eq!(enricher.output_names(), vec!["ws", "we"]);

    let mut rec = Record::from_json(&json!({"A.id": 1, "total": 10}));
    enricher
        .pre_aggregate(&json!({"id": 1, "ts": 5}), &mut rec)
        .expect("pre");
    assert!(!rec.contains("ws"));

    let mut ctx = Properties::new();
    ctx.insert("window_start".to_string(), json!(0));
    ctx.insert("window_end".to_string(), json!(60_000));
    enricher.post_aggregate(Some(&mut rec), &ctx).expect("post");
    assert_eq!(rec.get("ws"), Some(&json!(0)));
    assert_eq!(rec.get("we"), Some(&json!(60_000)));
    assert_eq!(rec.get("total"), Some(&json!(10)));

    assert!(enricher.post_aggregate(None, &ctx).is_err());
}
