mod common;

use std::collections::BTreeMap;

use holo_graph::types::{
    DeleteEdgesRequest, DeleteVerticesRequest, EdgeKey, NewEdge, NewTag, NewVertex, Value,
};
use holo_graph::{
    AddEdgesProcessor, AddVerticesProcessor, DeleteEdgesProcessor, DeleteVerticesProcessor,
    EngineCode, ErrorCode,
};

use common::*;

fn delete_vertices(parts: Vec<(i32, Vec<&str>)>) -> DeleteVerticesRequest {
    DeleteVerticesRequest {
        space_id: SPACE,
        parts: parts
            .into_iter()
            .map(|(part, vids)| (part, vids.into_iter().map(str::to_string).collect()))
            .collect(),
    }
}

#[tokio::test]
async fn add_vertices_writes_rows_and_index_entries() {
    let cluster = indexed_cluster(2);
    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![
            (1, vec![player("a", 1, "x"), player("b", 2, "y")]),
            (2, vec![player("c", 3, "z")]),
        ]))
        .await;

    assert!(response.succeeded(), "{response:?}");
    assert_eq!(cluster.store.len(SPACE, 1), 4);
    assert_eq!(cluster.store.len(SPACE, 2), 2);
    assert_eq!(cluster.store.put_calls(), 2);
}

#[tokio::test]
async fn add_vertices_maps_row_writer_failures() {
    let cluster = cluster(4);
    let mut req = vertices_request(vec![
        (1, vec![player("a", 1, "x")]),
        (
            2,
            vec![NewVertex {
                id: "b".to_string(),
                tags: vec![NewTag {
                    tag_id: PLAYER,
                    props: vec![Value::from("one"), Value::from("y"), Value::Null],
                }],
            }],
        ),
        (3, vec![player("much-too-long", 3, "z")]),
        (
            4,
            vec![NewVertex {
                id: "d".to_string(),
                tags: vec![NewTag {
                    tag_id: 9,
                    props: Vec::new(),
                }],
            }],
        ),
    ]);
    req.prop_names.insert(9, Vec::new());

    let response = AddVerticesProcessor::new(cluster.env.clone()).process(req).await;

    assert_eq!(failed_parts(&response), vec![2, 3, 4]);
    assert_eq!(response.code_for(2), Some(ErrorCode::DataTypeMismatch));
    assert_eq!(response.code_for(3), Some(ErrorCode::InvalidVid));
    assert_eq!(response.code_for(4), Some(ErrorCode::TagNotFound));
    assert_eq!(cluster.store.len(SPACE, 1), 1);
    assert_eq!(cluster.store.put_calls(), 1);
}

#[tokio::test]
async fn unknown_property_name_is_a_tag_prop_error() {
    let cluster = cluster(1);
    let mut req = vertices_request(vec![(1, vec![player("a", 1, "x")])]);
    req.prop_names = BTreeMap::from([(
        PLAYER,
        vec!["c1".to_string(), "nope".to_string(), "c3".to_string()],
    )]);

    let response = AddVerticesProcessor::new(cluster.env.clone()).process(req).await;
    assert_eq!(response.code_for(1), Some(ErrorCode::TagPropNotFound));
}

#[tokio::test]
async fn engine_failure_reaches_the_response() {
    let cluster = cluster(2);
    cluster.store.fail_part(SPACE, 2, EngineCode::ConsensusError);

    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![
            (1, vec![player("a", 1, "x")]),
            (2, vec![player("b", 2, "y")]),
        ]))
        .await;

    assert_eq!(failed_parts(&response), vec![2]);
    assert_eq!(response.code_for(2), Some(ErrorCode::ConsensusError));
}

#[tokio::test]
async fn index_listing_failure_fails_the_whole_request() {
    let cluster = indexed_cluster(2);
    cluster.catalog.break_index_listing(SPACE);

    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![
            (1, vec![player("a", 1, "x")]),
            (2, vec![player("b", 2, "y")]),
        ]))
        .await;

    assert_eq!(failed_parts(&response), vec![1, 2]);
    assert_eq!(response.code_for(1), Some(ErrorCode::SpaceNotFound));
    assert_eq!(cluster.store.put_calls(), 0);
}

#[tokio::test]
async fn add_edges_writes_to_the_source_partition() {
    let cluster = indexed_cluster(2);
    let response = AddEdgesProcessor::new(cluster.env.clone())
        .process(edges_request(vec![
            (1, vec![follow("a", "b", 0, 1), follow("a", "b", 1, 2)]),
            (2, vec![follow("c", "a", 0, 3)]),
        ]))
        .await;

    assert!(response.succeeded(), "{response:?}");
    assert_eq!(cluster.store.len(SPACE, 1), 4);
    assert_eq!(cluster.store.len(SPACE, 2), 2);
    assert_eq!(cluster.chain_writer.calls(), 0);
}

#[tokio::test]
async fn add_edges_reports_edge_flavoured_errors() {
    let cluster = cluster(2);
    let mut req = edges_request(vec![
        (1, vec![follow("a", "b", 0, 1)]),
        (
            2,
            vec![NewEdge {
                key: EdgeKey::new("c", 77, 0, "d"),
                props: vec![Value::Int(1)],
            }],
        ),
    ]);
    req.prop_names = vec!["weight".to_string()];

    let response = AddEdgesProcessor::new(cluster.env.clone()).process(req).await;

    assert_eq!(response.code_for(1), Some(ErrorCode::EdgePropNotFound));
    assert_eq!(response.code_for(2), Some(ErrorCode::EdgeNotFound));
}

#[tokio::test]
async fn delete_vertices_removes_rows_and_their_index_entries() {
    let cluster = indexed_cluster(2);
    let response = AddVerticesProcessor::new(cluster.env.clone())
        .process(vertices_request(vec![
            (1, vec![player("a", 1, "x"), player("b", 2, "y")]),
            (2, vec![player("c", 3, "z")]),
        ]))
        .await;
    assert!(response.succeeded());

    let response = DeleteVerticesProcessor::new(cluster.env.clone())
        .process(delete_vertices(vec![(1, vec!["a"]), (2, vec!["c", "ghost"])]))
        .await;

    assert!(response.succeeded(), "{response:?}");
    assert_eq!(cluster.store.len(SPACE, 1), 2);
    assert!(cluster.store.is_empty(SPACE, 2));
}

#[tokio::test]
async fn delete_vertices_fails_partitions_that_cannot_be_read() {
    let cluster = indexed_cluster(1);
    let response = DeleteVerticesProcessor::new(cluster.env.clone())
        .process(delete_vertices(vec![(1, vec!["a"]), (5, vec!["b"])]))
        .await;

    assert_eq!(failed_parts(&response), vec![5]);
    assert_eq!(response.code_for(5), Some(ErrorCode::PartNotFound));
}

#[tokio::test]
async fn delete_edges_removes_rows_and_their_index_entries() {
    let cluster = indexed_cluster(1);
    let response = AddEdgesProcessor::new(cluster.env.clone())
        .process(edges_request(vec![(
            1,
            vec![follow("a", "b", 0, 1), follow("a", "c", 0, 2)],
        )]))
        .await;
    assert!(response.succeeded());
    assert_eq!(cluster.store.len(SPACE, 1), 4);

    let response = DeleteEdgesProcessor::new(cluster.env.clone())
        .process(DeleteEdgesRequest {
            space_id: SPACE,
            parts: BTreeMap::from([(
                1,
                vec![
                    EdgeKey::new("a", FOLLOW, 0, "b"),
                    EdgeKey::new("a", FOLLOW, 5, "missing"),
                ],
            )]),
        })
        .await;

    assert!(response.succeeded(), "{response:?}");
    assert_eq!(cluster.store.len(SPACE, 1), 2);
    assert_eq!(cluster.store.remove_calls(), 1);
}

#[tokio::test]
async fn deletes_in_unknown_space_report_vid_length_errors() {
    let cluster = cluster(1);
    let mut req = delete_vertices(vec![(1, vec!["a"])]);
    req.space_id = 5;
    let response = DeleteVerticesProcessor::new(cluster.env.clone()).process(req).await;
    assert_eq!(response.code_for(1), Some(ErrorCode::InvalidSpaceVidLen));

    let response = DeleteEdgesProcessor::new(cluster.env.clone())
        .process(DeleteEdgesRequest {
            space_id: 5,
            parts: BTreeMap::from([(1, vec![EdgeKey::new("a", FOLLOW, 0, "b")])]),
        })
        .await;
    assert_eq!(response.code_for(1), Some(ErrorCode::InvalidSpaceVidLen));
}
