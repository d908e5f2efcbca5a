//! Process entrypoint: reads configuration, builds the allocator root,
//! registers the action handlers, and serves the Flight RPC listener.

use std::sync::Arc;

use graph_flight_server::actions::cypher_read::CypherReadHandler;
use graph_flight_server::actions::gds_node_properties::GdsNodePropertiesHandler;
use graph_flight_server::actions::gds_rel_properties::GdsRelPropertiesHandler;
use graph_flight_server::actions::gds_write_nodes::GdsWriteNodesHandler;
use graph_flight_server::actions::status::StatusHandler;
use graph_flight_server::actions::ActionRegistry;
use graph_flight_server::config::Config;
use graph_flight_server::errors::Error;
use graph_flight_server::job::GraphCatalogSink;
use graph_flight_server::mem::Node;
use graph_flight_server::producer::FlightProducer;

use arrow_flight::flight_service_server::FlightServiceServer;
use tonic::transport::Server;

/// The concrete graph-catalog collaborator is out of scope for this crate;
/// this no-op sink lets the write path exercise the store accumulation and
/// hand-off without a real catalog on the other end.
struct NullCatalogSink;

impl GraphCatalogSink for NullCatalogSink {
    fn write(&self, store: graph_flight_server::column_store::BatchedColumnStore) -> Result<(), Error> {
        tracing::info!(rows = store.row_count(), "write job completed with no catalog sink configured");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::from_env());
    let root = Node::root(config.max_mem_global);

    let mut actions = ActionRegistry::new();
    actions.register_handler(Arc::new(StatusHandler));
    actions.register_handler(Arc::new(CypherReadHandler::new(Arc::new(unimplemented_row_source_factory))));
    actions.register_handler(Arc::new(GdsNodePropertiesHandler::new(Arc::new(
        unimplemented_row_source_factory,
    ))));
    actions.register_handler(Arc::new(GdsRelPropertiesHandler::new(Arc::new(
        unimplemented_row_source_factory,
    ))));
    actions.register_handler(Arc::new(GdsWriteNodesHandler::new(Arc::new(
        unimplemented_schema_factory,
    ))));

    let producer = FlightProducer::new(config.clone(), root, actions, Arc::new(NullCatalogSink));

    let addr = format!("{}:{}", config.listen_host, config.listen_port).parse()?;
    tracing::info!(%addr, "graph-flight-server listening");

    Server::builder()
        .add_service(FlightServiceServer::new(producer))
        .serve(addr)
        .await?;

    Ok(())
}

/// Parsing Cypher/GDS request messages and driving rows off the graph
/// driver are out of scope for this crate; a real deployment supplies its
/// own factory wired to the graph driver collaborator.
fn unimplemented_row_source_factory(
    _body: &[u8],
) -> Result<Box<dyn graph_flight_server::actions::RowSource>, Error> {
    Err(Error::Internal(
        "no graph driver collaborator configured for this deployment".to_string(),
    ))
}

fn unimplemented_schema_factory(
    _body: &[u8],
) -> Result<Vec<(String, arrow::datatypes::DataType)>, Error> {
    Err(Error::Internal(
        "no graph catalog collaborator configured for this deployment".to_string(),
    ))
}
