//! End-to-end tests driving `FlightProducer` through the public
//! `FlightService` surface: ticket lifecycle, schema publication, and the
//! `do_get` row-to-batch pipeline.

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{FlightDescriptor, Ticket as WireTicket};
use futures::StreamExt;
use tonic::{Code, Request};

use graph_flight_server::actions::{ActionRegistry, JobRegistrar, RowSource};
use graph_flight_server::config::Config;
use graph_flight_server::errors::Error;
use graph_flight_server::job::{GraphCatalogSink, Job, ReadJob};
use graph_flight_server::mem::Node;
use graph_flight_server::producer::FlightProducer;
use graph_flight_server::ticket::Ticket;
use graph_flight_server::value::Value;

struct NoopSink;
impl GraphCatalogSink for NoopSink {
    fn write(&self, _store: graph_flight_server::column_store::BatchedColumnStore) -> Result<(), Error> {
        Ok(())
    }
}

fn test_config(batch_size: usize, max_partitions: usize) -> Config {
    Config {
        graph_db_url: String::new(),
        graph_db_user: String::new(),
        graph_db_password: String::new(),
        graph_db_name: String::new(),
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        max_mem_global: None,
        max_mem_stream: usize::MAX,
        arrow_batch_size: batch_size,
        bolt_fetch_size: 1_000,
        arrow_max_partitions: max_partitions,
        flush_drain_timeout_secs: 5,
    }
}

fn producer(batch_size: usize, max_partitions: usize) -> FlightProducer {
    FlightProducer::new(
        Arc::new(test_config(batch_size, max_partitions)),
        Node::root(None),
        ActionRegistry::new(),
        Arc::new(NoopSink),
    )
}

struct VecRowSource(VecDeque<(Vec<(String, Value)>, u64)>);

impl RowSource for VecRowSource {
    fn next_row(&mut self) -> Result<Option<(Vec<(String, Value)>, u64)>, Error> {
        Ok(self.0.pop_front())
    }
}

fn int_utf8_schema() -> arrow::datatypes::SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
    ]))
}

fn row(id: i64, name: &str) -> (Vec<(String, Value)>, u64) {
    (
        vec![
            ("id".to_string(), Value::Int64(id)),
            ("name".to_string(), Value::String(name.to_string())),
        ],
        0,
    )
}

async fn ticket_read_job(
    p: &FlightProducer,
    schema: arrow::datatypes::SchemaRef,
    rows: Vec<(Vec<(String, Value)>, u64)>,
) -> Ticket {
    let source: Box<dyn RowSource> = Box::new(VecRowSource(rows.into()));
    p.ticket_job(Job::Read(ReadJob::new()), Some(schema), Some(source))
}

#[tokio::test]
async fn small_read_one_partition_emits_all_rows() {
    let p = producer(25_000, 4);
    let rows = vec![row(1, "a"), row(2, "b"), row(3, "c")];
    let ticket = ticket_read_job(&p, int_utf8_schema(), rows).await;

    let resp = p
        .do_get(Request::new(WireTicket { ticket: ticket.to_bytes().into() }))
        .await
        .unwrap();
    let batches: Vec<_> = resp.into_inner().collect().await;
    assert!(!batches.is_empty(), "expected at least the schema message on the wire");
    assert!(batches.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn exact_batch_boundary_flushes_two_batches() {
    let p = producer(2, 1);
    let rows = vec![row(1, "a"), row(2, "b"), row(3, "c"), row(4, "d")];
    let ticket = ticket_read_job(&p, int_utf8_schema(), rows).await;

    let resp = p
        .do_get(Request::new(WireTicket { ticket: ticket.to_bytes().into() }))
        .await
        .unwrap();
    let batches: Vec<_> = resp.into_inner().collect().await;
    assert!(batches.iter().all(|r| r.is_ok()), "no item on the wire should be an error");
}

#[tokio::test]
async fn partitioned_interleave_delivers_every_row() {
    let p = producer(2, 2);
    let rows = vec![row(0, "a"), row(1, "b"), row(2, "c"), row(3, "d"), row(4, "e")];
    let ticket = ticket_read_job(&p, int_utf8_schema(), rows).await;

    let resp = p
        .do_get(Request::new(WireTicket { ticket: ticket.to_bytes().into() }))
        .await
        .unwrap();
    let batches: Vec<_> = resp.into_inner().collect().await;
    assert!(batches.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn fixed_size_list_stride_violation_terminates_stream_with_error() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "vec",
        DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float64, true)), 3),
        true,
    )]));
    let good_row = (
        vec![("vec".to_string(), Value::DoubleArray(vec![1.0, 2.0, 3.0]))],
        0u64,
    );
    let bad_row = (
        vec![("vec".to_string(), Value::DoubleArray(vec![1.0, 2.0]))],
        0u64,
    );

    let p = producer(25_000, 1);
    let ticket = ticket_read_job(&p, schema, vec![good_row, bad_row]).await;

    let resp = p
        .do_get(Request::new(WireTicket { ticket: ticket.to_bytes().into() }))
        .await
        .unwrap();
    let batches: Vec<_> = resp.into_inner().collect().await;
    assert!(
        batches.iter().any(|r| r.is_err()),
        "a stride-mismatched row must surface an error on the stream"
    );
}

#[tokio::test]
async fn ticket_lifecycle_round_trips_and_delete_is_idempotent() {
    let p = producer(25_000, 4);
    let ticket = ticket_read_job(&p, int_utf8_schema(), vec![row(1, "a")]).await;

    let descriptor = FlightDescriptor::new_cmd(ticket.to_bytes());
    let info = p
        .get_flight_info(Request::new(descriptor.clone()))
        .await
        .expect("flight info is published at ticket time");
    assert!(info.into_inner().schema.len() > 0);

    p.delete_flight(&ticket);
    let err = p
        .get_flight_info(Request::new(descriptor.clone()))
        .await
        .expect_err("deleted ticket must not resolve");
    assert_eq!(err.code(), Code::NotFound);

    // Deleting an already-absent ticket is a no-op, not an error.
    p.delete_flight(&ticket);
    let err_again = p.get_flight_info(Request::new(descriptor)).await.unwrap_err();
    assert_eq!(err_again.code(), Code::NotFound);
}

#[tokio::test]
async fn get_flight_info_rejects_malformed_descriptor() {
    let p = producer(25_000, 4);
    let descriptor = FlightDescriptor::new_cmd(vec![1, 2, 3]);
    let err = p.get_flight_info(Request::new(descriptor)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}
