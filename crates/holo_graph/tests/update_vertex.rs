mod common;

use holo_graph::expr::{ArithOp, Expression, RelOp};
use holo_graph::memory::MemoryCluster;
use holo_graph::types::{
    ColumnHint, IndexQueryContext, IndexSpec, LookupIndexRequest, ScanType, UpdateVertexRequest,
    UpdatedProp, Value,
};
use holo_graph::{
    AddVerticesProcessor, EngineCode, ErrorCode, LookupProcessor, UpdateVertexProcessor,
};

use common::*;

async fn seeded() -> MemoryCluster {
    let cluster = indexed_cluster(2);
    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![(1, vec![player("a", 1, "x")])]))
        .await;
    assert!(response.succeeded(), "{response:?}");
    cluster
}

fn set(name: &str, value: Expression) -> UpdatedProp {
    UpdatedProp {
        name: name.to_string(),
        value,
    }
}

fn update(
    vid: &str,
    updated_props: Vec<UpdatedProp>,
    return_props: &[&str],
) -> UpdateVertexRequest {
    UpdateVertexRequest {
        space_id: SPACE,
        part_id: 1,
        vertex_id: vid.to_string(),
        tag_id: PLAYER,
        updated_props,
        return_props: return_props.iter().map(|name| name.to_string()).collect(),
        ..Default::default()
    }
}

fn bump_c1() -> UpdatedProp {
    set(
        "c1",
        Expression::arith(ArithOp::Add, Expression::prop("c1"), Expression::constant(10_i64)),
    )
}

/// Vids found on partition 1 by a `c1` prefix scan of the player index.
async fn vids_with_c1(cluster: &MemoryCluster, c1: i64) -> Vec<Value> {
    let response = LookupProcessor::new(cluster.env.clone())
        .process(LookupIndexRequest {
            space_id: SPACE,
            parts: vec![1],
            indices: IndexSpec {
                contexts: vec![IndexQueryContext {
                    index_id: PLAYER_INDEX,
                    filter: Vec::new(),
                    column_hints: vec![ColumnHint {
                        column_name: "c1".to_string(),
                        scan: ScanType::Prefix(Value::Int(c1)),
                    }],
                }],
                is_edge: false,
                tag_or_edge_id: PLAYER,
            },
            return_columns: Vec::new(),
        })
        .await;
    assert!(response.result.succeeded(), "{response:?}");
    response.data.rows.into_iter().map(|row| row[0].clone()).collect()
}

fn only_code(response: &holo_graph::types::UpdateResponse) -> ErrorCode {
    assert_eq!(response.result.failed_parts.len(), 1, "{response:?}");
    assert_eq!(response.result.failed_parts[0].part_id, 1);
    response.result.failed_parts[0].code
}

#[tokio::test]
async fn update_rewrites_the_row_and_returns_props() {
    let cluster = seeded().await;
    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(update("a", vec![bump_c1()], &["c1", "c2", "c3", "_vid"]))
        .await;

    assert!(response.result.succeeded(), "{response:?}");
    let props = response.props.unwrap();
    assert_eq!(props.col_names, vec!["_inserted", "c1", "c2", "c3", "_vid"]);
    assert_eq!(
        props.rows,
        vec![vec![
            Value::Bool(false),
            Value::Int(11),
            Value::from("x"),
            Value::Null,
            Value::from("a"),
        ]]
    );
}

#[tokio::test]
async fn later_updates_see_earlier_ones() {
    let cluster = seeded().await;
    let double = set(
        "c3",
        Expression::arith(ArithOp::Mul, Expression::prop("c1"), Expression::constant(2_i64)),
    );
    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(update("a", vec![bump_c1(), double], &["c3"]))
        .await;

    assert!(response.result.succeeded(), "{response:?}");
    assert_eq!(response.props.unwrap().rows[0][1], Value::Int(22));
}

#[tokio::test]
async fn index_entry_follows_the_new_value() {
    let cluster = seeded().await;
    assert_eq!(cluster.store.len(SPACE, 1), 2);

    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(update("a", vec![bump_c1()], &[]))
        .await;
    assert!(response.result.succeeded(), "{response:?}");

    assert_eq!(cluster.store.len(SPACE, 1), 2);
    assert!(vids_with_c1(&cluster, 1).await.is_empty());
    assert_eq!(vids_with_c1(&cluster, 11).await, vec![Value::from("a")]);
}

#[tokio::test]
async fn rejected_condition_writes_nothing_and_returns_current_props() {
    let cluster = seeded().await;
    let puts_before = cluster.store.put_calls();
    let mut req = update("a", vec![bump_c1()], &["c1"]);
    req.condition =
        Expression::rel(RelOp::Gt, Expression::prop("c1"), Expression::constant(5_i64)).encode();

    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(req)
        .await;

    assert_eq!(only_code(&response), ErrorCode::FilterOut);
    assert_eq!(
        response.props.unwrap().rows,
        vec![vec![Value::Bool(false), Value::Int(1)]]
    );
    assert_eq!(cluster.store.put_calls(), puts_before);
    assert_eq!(vids_with_c1(&cluster, 1).await, vec![Value::from("a")]);
}

#[tokio::test]
async fn accepted_condition_applies_the_update() {
    let cluster = seeded().await;
    let mut req = update("a", vec![bump_c1()], &["c1"]);
    req.condition =
        Expression::rel(RelOp::Eq, Expression::prop("c2"), Expression::constant("x")).encode();

    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(req)
        .await;

    assert!(response.result.succeeded(), "{response:?}");
    assert_eq!(response.props.unwrap().rows[0][1], Value::Int(11));
}

#[tokio::test]
async fn missing_vertex_needs_insertable() {
    let cluster = seeded().await;
    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(update("zed", vec![bump_c1()], &["c1"]))
        .await;

    assert_eq!(only_code(&response), ErrorCode::VertexNotFound);
    assert!(response.props.is_none());
}

#[tokio::test]
async fn insertable_update_inserts_and_skips_the_condition() {
    let cluster = seeded().await;
    let mut req = update(
        "zed",
        vec![
            set("c1", Expression::constant(4_i64)),
            set("c2", Expression::constant("w")),
        ],
        &["c1", "c3"],
    );
    req.insertable = true;
    req.condition =
        Expression::rel(RelOp::Gt, Expression::prop("c1"), Expression::constant(100_i64)).encode();

    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(req)
        .await;

    assert!(response.result.succeeded(), "{response:?}");
    assert_eq!(
        response.props.unwrap().rows,
        vec![vec![Value::Bool(true), Value::Int(4), Value::Null]]
    );
    assert_eq!(vids_with_c1(&cluster, 4).await, vec![Value::from("zed")]);
}

#[tokio::test]
async fn inserted_row_must_set_required_props() {
    let cluster = seeded().await;
    let mut req = update("zed", vec![set("c1", Expression::constant(4_i64))], &[]);
    req.insertable = true;

    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(req)
        .await;

    assert_eq!(only_code(&response), ErrorCode::FieldUnset);
    assert!(vids_with_c1(&cluster, 4).await.is_empty());
}

#[tokio::test]
async fn bad_requests_are_rejected_before_reading() {
    let cluster = seeded().await;
    let env = cluster.env.clone();

    let response = UpdateVertexProcessor::new(env.clone())
        .process(update("a", vec![set("nope", Expression::constant(1_i64))], &[]))
        .await;
    assert_eq!(only_code(&response), ErrorCode::TagPropNotFound);

    let response = UpdateVertexProcessor::new(env.clone())
        .process(update("a", vec![bump_c1()], &["nope"]))
        .await;
    assert_eq!(only_code(&response), ErrorCode::TagPropNotFound);

    let mut req = update("a", vec![bump_c1()], &[]);
    req.condition = b"not an expression".to_vec();
    let response = UpdateVertexProcessor::new(env.clone()).process(req).await;
    assert_eq!(only_code(&response), ErrorCode::InvalidFilter);

    let mut req = update("a", vec![bump_c1()], &[]);
    req.tag_id = 99;
    let response = UpdateVertexProcessor::new(env.clone()).process(req).await;
    assert_eq!(only_code(&response), ErrorCode::TagNotFound);

    let mut req = update("a", vec![bump_c1()], &[]);
    req.space_id = 42;
    let response = UpdateVertexProcessor::new(env.clone()).process(req).await;
    assert_eq!(only_code(&response), ErrorCode::InvalidSpaceVidLen);

    let response = UpdateVertexProcessor::new(env)
        .process(update("a", vec![set("c1", Expression::constant("eleven"))], &[]))
        .await;
    assert_eq!(only_code(&response), ErrorCode::DataTypeMismatch);

    assert_eq!(vids_with_c1(&cluster, 1).await, vec![Value::from("a")]);
}

#[tokio::test]
async fn engine_failure_is_reported_without_props() {
    let cluster = seeded().await;
    cluster.store.fail_part(SPACE, 1, EngineCode::ConsensusError);

    let response = UpdateVertexProcessor::new(cluster.env.clone())
        .process(update("a", vec![bump_c1()], &["c1"]))
        .await;

    assert_eq!(only_code(&response), ErrorCode::ConsensusError);
    assert!(response.props.is_none());
    cluster.store.heal_part(SPACE, 1);
    assert_eq!(vids_with_c1(&cluster, 1).await, vec![Value::from("a")]);
}
