//! Flight producer: the gRPC-facing `FlightService` implementation wiring
//! together tickets, jobs, the partitioned builder pool and the flush
//! pipeline, with the worker/consumer wiring generalized into a
//! tokio-task-plus-dedicated-thread pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::Array;
use arrow::datatypes::SchemaRef;
use arrow::ipc::writer::IpcWriteOptions;
use arrow::ipc::CompressionType;
use arrow::record_batch::RecordBatch;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor,
    FlightInfo as WireFlightInfo, HandshakeRequest, HandshakeResponse, PollInfo, PutResult,
    SchemaResult, Ticket as WireTicket,
};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tonic::{Request, Response, Status, Streaming};

use crate::actions::{ActionRegistry, JobRegistrar, Outcome, RowSource};
use crate::column_store::BatchedColumnStore;
use crate::config::Config;
use crate::errors::Error;
use crate::flush::FlushPipeline;
use crate::job::{GraphCatalogSink, Job, JobState, WriteJob};
use crate::mem::Node;
use crate::pool::PartitionedBuilderPool;
use crate::ticket::{FlightInfo, Ticket};
use crate::value::{OwnedRow, Value};
use crate::vectors::ColumnChunk;

struct TicketEntry {
    job: Arc<Job>,
    flight: Mutex<Option<FlightInfo>>,
    row_source: Mutex<Option<Box<dyn RowSource>>>,
}

/// The service. One instance per process; every stream and write job hangs
/// a child off its allocator root.
pub struct FlightProducer {
    config: Arc<Config>,
    root: Node,
    actions: ActionRegistry,
    catalog_sink: Arc<dyn GraphCatalogSink>,
    tickets: Mutex<HashMap<Ticket, Arc<TicketEntry>>>,
}

impl FlightProducer {
    pub fn new(
        config: Arc<Config>,
        root: Node,
        actions: ActionRegistry,
        catalog_sink: Arc<dyn GraphCatalogSink>,
    ) -> Self {
        FlightProducer {
            config,
            root,
            actions,
            catalog_sink,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, ticket: &Ticket) -> Option<Arc<TicketEntry>> {
        self.tickets.lock().unwrap().get(ticket).cloned()
    }

    /// Requires the job be `INITIALIZING` or `PENDING`; publishes the info,
    /// then transitions the job to `PRODUCING`. Publication and transition
    /// are one atomic step from the caller's point of view, since both
    /// happen under the tickets lock's protection of this entry.
    fn set_flight_info(&self, ticket: Ticket, info: FlightInfo) -> Result<(), Error> {
        let entry = self
            .lookup(&ticket)
            .ok_or_else(|| Error::NotFound(format!("ticket {:?}", ticket.0)))?;
        let status = entry.job.status();
        let state = status.get();
        if !matches!(state, JobState::Initializing | JobState::Pending) {
            return Err(Error::InvalidArgument(
                "flight info already published for this ticket".to_string(),
            ));
        }
        *entry.flight.lock().unwrap() = Some(info);
        status.transition(JobState::Producing);
        Ok(())
    }

    /// Removes the ticket from both directories at once (they share a
    /// single map here); idempotent.
    pub fn delete_flight(&self, ticket: &Ticket) {
        self.tickets.lock().unwrap().remove(ticket);
    }
}

impl JobRegistrar for FlightProducer {
    fn ticket_job(
        &self,
        job: Job,
        schema: Option<SchemaRef>,
        row_source: Option<Box<dyn RowSource>>,
    ) -> Ticket {
        let ticket = Ticket::new();
        let entry = Arc::new(TicketEntry {
            job: Arc::new(job),
            flight: Mutex::new(None),
            row_source: Mutex::new(row_source),
        });
        self.tickets.lock().unwrap().insert(ticket, entry);
        if let Some(schema) = schema {
            // A freshly minted ticket is always INITIALIZING, so this
            // cannot fail.
            let _ = self.set_flight_info(ticket, FlightInfo::new(schema, ticket));
        }
        ticket
    }

    fn new_store_allocator(&self, name: &str) -> Node {
        self.root.new_child(name, Some(self.config.max_mem_stream))
    }
}

fn ticket_label(ticket: &Ticket) -> String {
    ticket.0.iter().map(|b| format!("{b:02x}")).collect()
}

#[tonic::async_trait]
impl FlightService for FlightProducer {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<WireFlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake is not part of this service's contract"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        let infos: Vec<Result<WireFlightInfo, Status>> = {
            let tickets = self.tickets.lock().unwrap();
            tickets
                .values()
                .filter_map(|entry| entry.flight.lock().unwrap().clone())
                .map(|info| info.to_wire().map_err(Status::from))
                .collect()
        };
        Ok(Response::new(Box::pin(stream::iter(infos))))
    }

    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<WireFlightInfo>, Status> {
        let descriptor = request.into_inner();
        let ticket = Ticket::from_bytes(&descriptor.cmd).ok_or_else(|| {
            Status::from(Error::InvalidArgument(
                "flight descriptor command is not a valid ticket".to_string(),
            ))
        })?;
        let entry = self
            .lookup(&ticket)
            .ok_or_else(|| Status::from(Error::NotFound(format!("ticket {}", ticket_label(&ticket)))))?;
        let flight = entry.flight.lock().unwrap().clone().ok_or_else(|| {
            Status::from(Error::NotFound(format!(
                "ticket {} has no published flight info yet",
                ticket_label(&ticket)
            )))
        })?;
        flight.to_wire().map(Response::new).map_err(Status::from)
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info is not part of this service's contract"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema is not part of this service's contract"))
    }

    async fn do_get(
        &self,
        request: Request<WireTicket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        let wire_ticket = request.into_inner();
        let ticket = Ticket::from_bytes(&wire_ticket.ticket).ok_or_else(|| {
            Status::from(Error::InvalidArgument("malformed ticket bytes".to_string()))
        })?;
        let entry = self
            .lookup(&ticket)
            .ok_or_else(|| Status::from(Error::NotFound(format!("ticket {}", ticket_label(&ticket)))))?;

        if !matches!(entry.job.as_ref(), Job::Read(_)) {
            return Err(Status::from(Error::InvalidArgument(
                "ticket does not name a read job".to_string(),
            )));
        }

        let schema = entry
            .flight
            .lock()
            .unwrap()
            .as_ref()
            .map(|f| f.schema.clone())
            .ok_or_else(|| Status::from(Error::Internal("flight info not yet published".to_string())))?;

        let row_source = entry.row_source.lock().unwrap().take().ok_or_else(|| {
            Status::from(Error::Internal(
                "read job's row stream was already consumed".to_string(),
            ))
        })?;

        let job_status = entry.job.status();
        job_status.transition(JobState::Producing);

        let stream_root = self
            .root
            .new_child(format!("stream-{}", ticket_label(&ticket)), Some(self.config.max_mem_stream));
        let base = stream_root.new_child("base", None);
        let transmit = stream_root.new_child("transmit", None);

        let (work_tx, work_rx) = std::sync::mpsc::sync_channel(self.config.arrow_max_partitions * 2);
        let (out_tx, out_rx) = tokio::sync::mpsc::channel::<Result<RecordBatch, Error>>(
            self.config.arrow_max_partitions * 2,
        );

        let is_feeding = Arc::new(AtomicBool::new(true));
        let errored = Arc::new(AtomicBool::new(false));

        let encoder_schema = schema.clone();

        let pool = Arc::new(PartitionedBuilderPool::new(
            schema.clone(),
            self.config.arrow_batch_size,
            self.config.arrow_max_partitions,
            &base,
            transmit,
            work_tx,
        ));
        {
            let job_status = job_status.clone();
            pool.set_on_error(Arc::new(move |_err| {
                job_status.transition(JobState::Error);
            }));
        }

        let pipeline = FlushPipeline::new(
            schema,
            work_rx,
            out_tx.clone(),
            is_feeding.clone(),
            errored.clone(),
        );
        let pipeline_handle = tokio::task::spawn_blocking(move || pipeline.run());

        let partition_count = pool.partition_count();
        let row_job_status = job_status.clone();
        let row_errored = errored.clone();
        let row_is_feeding = is_feeding.clone();
        let row_out_tx = out_tx;
        let row_pool = pool;
        let row_handle = tokio::task::spawn_blocking(move || {
            let mut row_source = row_source;
            let mut disconnected = false;
            let mut result: Result<(), Error> = Ok(());

            loop {
                if !row_is_feeding.load(Ordering::SeqCst) || row_job_status.is_cancelled() {
                    disconnected = true;
                    break;
                }
                if row_errored.load(Ordering::SeqCst) {
                    break;
                }
                match row_source.next_row() {
                    Ok(Some((row, key))) => {
                        let keys: Vec<String> = row.iter().map(|(k, _)| k.clone()).collect();
                        let values: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
                        let owned = OwnedRow::new(Arc::new(keys), values);
                        if let Err(e) = row_pool.consume(&owned, key) {
                            result = Err(e);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }

            if !disconnected {
                for p in 0..partition_count {
                    if let Err(e) = row_pool.flush_partition_at(p) {
                        if result.is_ok() {
                            result = Err(e);
                        }
                        break;
                    }
                }
            }

            row_is_feeding.store(false, Ordering::SeqCst);

            if disconnected {
                row_job_status.cancel();
            } else {
                match &result {
                    Ok(()) => row_job_status.transition(JobState::Complete),
                    Err(_) => {
                        row_job_status.transition(JobState::Error);
                        row_errored.store(true, Ordering::SeqCst);
                    }
                }
            }

            if let Err(e) = result {
                let _ = row_out_tx.blocking_send(Err(e));
            }
        });

        let drain_timeout = Duration::from_secs(self.config.flush_drain_timeout_secs);
        let close_job_status = job_status;
        let close_root = stream_root;
        let close_ticket = ticket;
        tokio::spawn(async move {
            let _ = row_handle.await;
            if tokio::time::timeout(drain_timeout, pipeline_handle).await.is_err() {
                close_job_status.transition(JobState::Error);
                tracing::error!(ticket = %ticket_label(&close_ticket), "flush pipeline drain exceeded timeout");
            }
            if let Err(e) = close_root.close() {
                tracing::warn!(ticket = %ticket_label(&close_ticket), error = %e, "allocator tree left outstanding buffers at stream teardown");
            }
        });

        let ipc_options = IpcWriteOptions::default()
            .try_with_compression(Some(CompressionType::LZ4_FRAME))
            .map_err(Error::Arrow)
            .map_err(Status::from)?;

        let response_stream = tokio_stream::wrappers::ReceiverStream::new(out_rx)
            .map(|item| item.map_err(|e| arrow_flight::error::FlightError::Tonic(Status::from(e))));
        let encoder = FlightDataEncoderBuilder::new()
            .with_schema(encoder_schema)
            .with_options(ipc_options)
            .build(response_stream)
            .map(|item| item.map_err(|e| Status::internal(e.to_string())));

        Ok(Response::new(Box::pin(encoder)))
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        let mut stream = request.into_inner();
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty do_put stream"))?;
        let descriptor = first
            .flight_descriptor
            .clone()
            .ok_or_else(|| Status::invalid_argument("first do_put message is missing a flight descriptor"))?;
        let ticket = Ticket::from_bytes(&descriptor.cmd).ok_or_else(|| {
            Status::from(Error::InvalidArgument(
                "flight descriptor command is not a valid ticket".to_string(),
            ))
        })?;
        let entry = self
            .lookup(&ticket)
            .ok_or_else(|| Status::from(Error::NotFound(format!("ticket {}", ticket_label(&ticket)))))?;

        let write_job = match entry.job.as_ref() {
            Job::Write(w) => w,
            Job::Read(_) => {
                return Err(Status::from(Error::InvalidArgument(
                    "ticket does not name a write job".to_string(),
                )))
            }
        };

        let outcome: Result<(), Status> = async {
            let alloc = write_job
                .store
                .lock()
                .unwrap()
                .as_ref()
                .map(|s| s.allocator().clone())
                .ok_or_else(|| Status::from(Error::Internal("write job store already consumed".to_string())))?;

            let prefix = stream::once(async move { Ok(first) });
            let combined = prefix.chain(stream.map(|r| r.map_err(arrow_flight::error::FlightError::Tonic)));
            let mut decoder = arrow_flight::decode::FlightRecordBatchStream::new_from_flight_data(combined);

            while let Some(batch) = decoder.next().await {
                let batch = batch.map_err(|e| Status::internal(e.to_string()))?;
                append_record_batch(write_job, &batch, &alloc).map_err(Status::from)?;
            }

            write_job
                .into_store_and_finish(self.catalog_sink.as_ref())
                .map_err(Status::from)?;
            Ok(())
        }
        .await;

        // Every path through this call must leave the job in a terminal
        // state; only the happy path reaches `Complete`.
        match outcome {
            Ok(()) => {
                write_job.status.transition(JobState::Complete);
                let ack = stream::once(async { Ok(PutResult { app_metadata: Vec::new().into() }) });
                Ok(Response::new(Box::pin(ack)))
            }
            Err(status) => {
                write_job.status.transition(JobState::Error);
                Err(status)
            }
        }
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = request.into_inner();
        let handler = self.actions.get(&action.r#type).ok_or_else(|| {
            Status::from(Error::NotFound(format!("action type '{}'", action.r#type)))
        })?;
        match handler.handle(&action, self) {
            Outcome::Success(body) => {
                let result = arrow_flight::Result { body: body.into() };
                Ok(Response::new(Box::pin(stream::once(async { Ok(result) }))))
            }
            Outcome::Failure(e) => Err(Status::from(e)),
        }
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        let items: Vec<Result<ActionType, Status>> = self
            .actions
            .list_descriptions()
            .into_iter()
            .map(|(r#type, description)| Ok(ActionType { r#type, description }))
            .collect();
        Ok(Response::new(Box::pin(stream::iter(items))))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange is not part of this service's contract"))
    }
}

/// Appends one incoming record batch's columns into a write job's store,
/// each column attributed to the store's own allocator: every chunk is
/// owned by an explicit allocator child.
fn append_record_batch(
    write_job: &WriteJob,
    batch: &RecordBatch,
    alloc: &Node,
) -> Result<(), Error> {
    let mut guard = write_job.store.lock().unwrap();
    let store: &mut BatchedColumnStore = guard
        .as_mut()
        .ok_or_else(|| Error::Internal("write job store already consumed".to_string()))?;

    for field_name in store.field_names().to_vec() {
        let idx = batch
            .schema()
            .index_of(&field_name)
            .map_err(|_| Error::NotFound(format!("field '{field_name}' in incoming batch")))?;
        let array = batch.column(idx).clone();
        let reservation = alloc.allocate(array.get_array_memory_size())?;
        store.append_field_chunk(&field_name, ColumnChunk { array, reservation })?;
    }
    Ok(())
}
