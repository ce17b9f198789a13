mod common;

use std::sync::Arc;

use holo_graph::expr::{Expression, RelOp};
use holo_graph::memory::MemoryCluster;
use holo_graph::plan::{LookupPlanBuilder, NodeKind, PlanContext, StoragePlan};
use holo_graph::types::{
    ColumnDef, ColumnHint, IndexItem, IndexQueryContext, IndexSpec, LookupIndexRequest, NewTag,
    NewVertex, PropertyType, ScanType, SchemaRef, Value,
};
use holo_graph::{
    AddEdgesAtomicProcessor, AddVerticesProcessor, ErrorCode, LookupProcessor, ProcessorConfig,
    StorageEnv,
};

use common::*;

fn vertex_ctx(env: &StorageEnv) -> Arc<PlanContext> {
    Arc::new(PlanContext {
        env: env.clone(),
        space_id: SPACE,
        vid_len: VID_LEN,
        is_edge: false,
        schema_id: PLAYER,
    })
}

fn query(filter: Option<Expression>, column_hints: Vec<ColumnHint>) -> IndexQueryContext {
    IndexQueryContext {
        index_id: PLAYER_INDEX,
        filter: filter.map(|expr| expr.encode()).unwrap_or_default(),
        column_hints,
    }
}

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn build(
    env: &StorageEnv,
    contexts: &[IndexQueryContext],
    yields: &[&str],
) -> Result<StoragePlan, ErrorCode> {
    let yields = cols(yields);
    LookupPlanBuilder::new(vertex_ctx(env), contexts, &yields).build()
}

fn c2_is(value: &str) -> Expression {
    Expression::rel(RelOp::Eq, Expression::prop("c2"), Expression::constant(value))
}

fn prefix(column: &str, value: impl Into<Value>) -> ColumnHint {
    ColumnHint {
        column_name: column.to_string(),
        scan: ScanType::Prefix(value.into()),
    }
}

fn range(column: &str, begin: impl Into<Value>, end: impl Into<Value>) -> ColumnHint {
    ColumnHint {
        column_name: column.to_string(),
        scan: ScanType::Range {
            begin: begin.into(),
            end: end.into(),
        },
    }
}

#[test]
fn covered_yield_scans_straight_to_output() {
    let cluster = indexed_cluster(1);
    let plan = build(&cluster.env, &[query(None, Vec::new())], &["c1", "c2"]).unwrap();

    assert_eq!(
        plan.kinds(),
        vec![NodeKind::IndexScan, NodeKind::Output, NodeKind::Aggregate]
    );
    assert_eq!(plan.branch_kinds(1), vec![NodeKind::IndexScan, NodeKind::Output]);
    assert_eq!(plan.data().col_names, cols(&["_vid", "c1", "c2"]));
}

#[test]
fn uncovered_yield_joins_the_row() {
    let cluster = indexed_cluster(1);
    let plan = build(&cluster.env, &[query(None, Vec::new())], &["c3"]).unwrap();

    assert_eq!(
        plan.branch_kinds(2),
        vec![NodeKind::IndexScan, NodeKind::DataJoinVertex, NodeKind::Output]
    );
}

#[test]
fn filter_shapes_follow_data_need() {
    let cluster = indexed_cluster(1);

    let plan = build(&cluster.env, &[query(Some(c2_is("x")), Vec::new())], &["c1"]).unwrap();
    assert_eq!(
        plan.branch_kinds(2),
        vec![NodeKind::IndexScan, NodeKind::Filter, NodeKind::Output]
    );

    let plan = build(&cluster.env, &[query(Some(c2_is("x")), Vec::new())], &["c3"]).unwrap();
    assert_eq!(
        plan.branch_kinds(3),
        vec![
            NodeKind::IndexScan,
            NodeKind::DataJoinVertex,
            NodeKind::Filter,
            NodeKind::Output
        ]
    );
}

#[test]
fn every_branch_feeds_one_aggregate() {
    let cluster = indexed_cluster(1);
    let contexts = [query(None, Vec::new()), query(Some(c2_is("x")), Vec::new())];
    let plan = build(&cluster.env, &contexts, &["c1"]).unwrap();

    let aggregate = plan.len() - 1;
    assert_eq!(plan.kind(aggregate), Some(NodeKind::Aggregate));
    assert_eq!(plan.dependencies(aggregate), &[1, 4]);
    let order = plan.execution_order();
    assert_eq!(order.len(), plan.len());
    assert_eq!(order.last(), Some(&aggregate));
    for id in 0..plan.len() {
        let at = order.iter().position(|n| *n == id).unwrap();
        for dep in plan.dependencies(id) {
            assert!(order.iter().position(|n| n == dep).unwrap() < at);
        }
    }
}

#[test]
fn missing_tag_schema_fails_only_when_data_is_needed() {
    let cluster = MemoryCluster::new(SPACE, 1, VID_LEN, local_host(), ProcessorConfig::default());
    cluster.catalog.add_index(SPACE, player_index());

    assert!(build(&cluster.env, &[query(None, Vec::new())], &["c1"]).is_ok());
    assert_eq!(
        build(&cluster.env, &[query(None, Vec::new())], &["c3"]).err(),
        Some(ErrorCode::TagNotFound)
    );
}

#[test]
fn construction_failures_are_reported_without_a_plan() {
    let cluster = indexed_cluster(1);

    let unknown = IndexQueryContext {
        index_id: 999,
        ..query(None, Vec::new())
    };
    assert_eq!(build(&cluster.env, &[unknown], &[]).err(), Some(ErrorCode::IndexNotFound));

    let wrong_kind = IndexQueryContext {
        index_id: FOLLOW_INDEX,
        ..query(None, Vec::new())
    };
    assert_eq!(
        build(&cluster.env, &[wrong_kind], &[]).err(),
        Some(ErrorCode::IndexNotFound)
    );

    let garbage = IndexQueryContext {
        filter: b"not an expression".to_vec(),
        ..query(None, Vec::new())
    };
    assert_eq!(build(&cluster.env, &[garbage], &[]).err(), Some(ErrorCode::InvalidFilter));

    assert_eq!(build(&cluster.env, &[], &[]).err(), Some(ErrorCode::InvalidOperation));
}

#[test]
fn hints_must_follow_index_columns() {
    let cluster = indexed_cluster(1);

    let out_of_order = query(None, vec![prefix("c2", "x")]);
    assert_eq!(
        build(&cluster.env, &[out_of_order], &[]).err(),
        Some(ErrorCode::InvalidOperation)
    );

    let range_not_last = query(None, vec![range("c1", 1_i64, 5_i64), prefix("c2", "x")]);
    assert_eq!(
        build(&cluster.env, &[range_not_last], &[]).err(),
        Some(ErrorCode::InvalidOperation)
    );

    let ok = query(None, vec![prefix("c1", 1_i64), range("c2", "a", "m")]);
    assert!(build(&cluster.env, &[ok], &[]).is_ok());
}

fn player_with_c3(id: &str, c1: i64, c2: &str, c3: i64) -> NewVertex {
    NewVertex {
        id: id.to_string(),
        tags: vec![NewTag {
            tag_id: PLAYER,
            props: vec![Value::Int(c1), Value::from(c2), Value::Int(c3)],
        }],
    }
}

async fn seeded(config: ProcessorConfig) -> MemoryCluster {
    let cluster = cluster_with_config(2, config);
    cluster.catalog.add_index(SPACE, player_index());
    cluster.catalog.add_index(SPACE, follow_index());
    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![
            (1, vec![player("a", 1, "x"), player_with_c3("b", 2, "y", 7)]),
            (2, vec![player_with_c3("c", 3, "z", 9)]),
        ]))
        .await;
    assert!(response.succeeded(), "{response:?}");
    cluster
}

fn lookup_request(
    parts: Vec<i32>,
    contexts: Vec<IndexQueryContext>,
    yields: &[&str],
) -> LookupIndexRequest {
    LookupIndexRequest {
        space_id: SPACE,
        parts,
        indices: IndexSpec {
            contexts,
            is_edge: false,
            tag_or_edge_id: PLAYER,
        },
        return_columns: cols(yields),
    }
}

fn vids(rows: &[Vec<Value>]) -> Vec<Value> {
    rows.iter().map(|row| row[0].clone()).collect()
}

#[tokio::test]
async fn lookup_merges_partitions_in_order() {
    let cluster = seeded(ProcessorConfig::default()).await;
    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(vec![2, 1], vec![query(None, Vec::new())], &["c1", "c2"]))
        .await;

    assert!(response.result.succeeded());
    assert_eq!(response.data.col_names, cols(&["_vid", "c1", "c2"]));
    assert_eq!(
        response.data.rows,
        vec![
            vec![Value::from("a"), Value::Int(1), Value::from("x")],
            vec![Value::from("b"), Value::Int(2), Value::from("y")],
            vec![Value::from("c"), Value::Int(3), Value::from("z")],
        ]
    );
}

#[tokio::test]
async fn column_hints_narrow_the_scan() {
    let cluster = seeded(ProcessorConfig::default()).await;

    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(
            vec![1, 2],
            vec![query(None, vec![prefix("c1", 2_i64)])],
            &[],
        ))
        .await;
    assert_eq!(vids(&response.data.rows), vec![Value::from("b")]);

    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(
            vec![1, 2],
            vec![query(None, vec![range("c1", 2_i64, 4_i64)])],
            &[],
        ))
        .await;
    assert_eq!(vids(&response.data.rows), vec![Value::from("b"), Value::from("c")]);
}

const NAME_INDEX: i32 = 102;

/// Index over `player(c2)` alone, so the string column is the range column.
fn name_index() -> IndexItem {
    IndexItem {
        index_id: NAME_INDEX,
        index_name: "player_c2".to_string(),
        schema: SchemaRef::Tag(PLAYER),
        fields: vec![ColumnDef::new("c2", PropertyType::String)],
    }
}

#[tokio::test]
async fn string_range_keeps_values_that_prefix_the_upper_bound() {
    let cluster = cluster(1);
    cluster.catalog.add_index(SPACE, name_index());
    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![(
            1,
            vec![
                player("v1", 1, "a"),
                player("v2", 2, "aa"),
                player("v3", 3, "ab"),
                player("v4", 4, "b"),
                player("v5", 5, ""),
            ],
        )]))
        .await;
    assert!(response.succeeded(), "{response:?}");

    let lookup = IndexQueryContext {
        index_id: NAME_INDEX,
        filter: Vec::new(),
        column_hints: vec![range("c2", "a", "ab")],
    };
    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(vec![1], vec![lookup], &["c2"]))
        .await;

    assert!(response.result.succeeded(), "{response:?}");
    // Key order: raw string bytes, then the padded vid.
    assert_eq!(
        response.data.rows,
        vec![
            vec![Value::from("v2"), Value::from("aa")],
            vec![Value::from("v1"), Value::from("a")],
        ]
    );
}

#[tokio::test]
async fn rejected_lookup_without_partitions_is_not_a_success() {
    let cluster = seeded(ProcessorConfig::default()).await;
    let unknown = IndexQueryContext {
        index_id: 999,
        ..query(None, Vec::new())
    };

    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(Vec::new(), vec![unknown], &[]))
        .await;

    assert!(response.result.failed_parts.is_empty());
    assert_eq!(response.result.request_code, Some(ErrorCode::IndexNotFound));
    assert!(!response.result.succeeded());
    assert!(response.data.rows.is_empty());
}

#[tokio::test]
async fn filters_run_on_index_values_or_joined_rows() {
    let cluster = seeded(ProcessorConfig::default()).await;

    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(
            vec![1, 2],
            vec![query(Some(c2_is("z")), Vec::new())],
            &["c2"],
        ))
        .await;
    assert_eq!(
        response.data.rows,
        vec![vec![Value::from("c"), Value::from("z")]]
    );

    let c3_over_five = Expression::rel(
        RelOp::Gt,
        Expression::prop("c3"),
        Expression::constant(5_i64),
    );
    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(
            vec![1, 2],
            vec![query(Some(c3_over_five), Vec::new())],
            &["c3"],
        ))
        .await;
    assert_eq!(
        response.data.rows,
        vec![
            vec![Value::from("b"), Value::Int(7)],
            vec![Value::from("c"), Value::Int(9)],
        ]
    );
}

#[tokio::test]
async fn row_limit_truncates_the_merged_result() {
    let config = ProcessorConfig {
        lookup_max_rows: 2,
        ..ProcessorConfig::default()
    };
    let cluster = seeded(config).await;
    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(vec![1, 2], vec![query(None, Vec::new())], &[]))
        .await;

    assert!(response.result.succeeded());
    assert_eq!(vids(&response.data.rows), vec![Value::from("a"), Value::from("b")]);
}

#[tokio::test]
async fn unknown_partition_fails_alone() {
    let cluster = seeded(ProcessorConfig::default()).await;
    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(vec![1, 7], vec![query(None, Vec::new())], &[]))
        .await;

    assert_eq!(failed_parts(&response.result), vec![7]);
    assert_eq!(response.result.code_for(7), Some(ErrorCode::PartNotFound));
    assert_eq!(vids(&response.data.rows), vec![Value::from("a"), Value::from("b")]);
}

#[tokio::test]
async fn unknown_space_fails_every_partition_but_keeps_the_header() {
    let cluster = seeded(ProcessorConfig::default()).await;
    let mut req = lookup_request(vec![1, 2], vec![query(None, Vec::new())], &["c1"]);
    req.space_id = 99;
    let response = LookupProcessor::new(cluster.env.clone()).process(req).await;

    assert_eq!(failed_parts(&response.result), vec![1, 2]);
    assert!(response
        .result
        .failed_parts
        .iter()
        .all(|r| r.code == ErrorCode::InvalidSpaceVidLen));
    assert_eq!(response.data.col_names, cols(&["_vid", "c1"]));
    assert!(response.data.rows.is_empty());
}

#[tokio::test]
async fn empty_contexts_are_an_invalid_operation() {
    let cluster = seeded(ProcessorConfig::default()).await;
    let response = LookupProcessor::new(cluster.env.clone())
        .process(lookup_request(vec![1, 2], Vec::new(), &[]))
        .await;

    assert!(response
        .result
        .failed_parts
        .iter()
        .all(|r| r.code == ErrorCode::InvalidOperation));
    assert_eq!(response.result.failed_parts.len(), 2);
}

#[tokio::test]
async fn edge_lookup_yields_edge_columns() {
    let cluster = seeded(ProcessorConfig::default()).await;
    let mut env = cluster.env.clone();
    env.locator = MapLocator::new(&[("b", 1), ("c", 2)]);
    let response = AddEdgesAtomicProcessor::new(env)
        .process(edges_request(vec![(
            1,
            vec![follow("a", "b", 0, 90), follow("a", "c", 1, 40)],
        )]))
        .await;
    assert!(response.succeeded(), "{response:?}");

    let req = LookupIndexRequest {
        space_id: SPACE,
        parts: vec![1, 2],
        indices: IndexSpec {
            contexts: vec![IndexQueryContext {
                index_id: FOLLOW_INDEX,
                filter: Vec::new(),
                column_hints: vec![range("degree", 50_i64, 100_i64)],
            }],
            is_edge: true,
            tag_or_edge_id: FOLLOW,
        },
        return_columns: cols(&["degree", "note"]),
    };
    let response = LookupProcessor::new(cluster.env.clone()).process(req).await;

    assert!(response.result.succeeded());
    assert_eq!(
        response.data.col_names,
        cols(&["_src", "_ranking", "_dst", "degree", "note"])
    );
    assert_eq!(
        response.data.rows,
        vec![vec![
            Value::from("a"),
            Value::Int(0),
            Value::from("b"),
            Value::Int(90),
            Value::from(""),
        ]]
    );
}
