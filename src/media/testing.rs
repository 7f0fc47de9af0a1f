//! Scriptable backend for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore, mpsc};

use super::backend::{
    EndpointId, FilterId, IceCandidate, MediaBackend, MediaElement, MediaError, MediaEvent,
    MediaEvents, PipelineId,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreatePipeline(PipelineId),
    CreateEndpoint(EndpointId),
    CreateFilter(FilterId),
    Connect(MediaElement, MediaElement),
    Subscribe(EndpointId),
    ProcessOffer(String),
    AddCandidate(EndpointId, IceCandidate),
    GatherCandidates(EndpointId),
    Release(PipelineId),
}

/// Holds one backend operation until the test opens it.
#[derive(Clone)]
pub(crate) struct Gate {
    entered: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl Gate {
    /// Wait until the backend reaches the gated operation
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.permits.add_permits(1);
    }
}

#[derive(Default)]
pub(crate) struct RecordingBackend {
    next_id: AtomicU64,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<&'static str, Gate>>,
    events: Mutex<HashMap<EndpointId, mpsc::UnboundedSender<MediaEvent>>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call of `operation` fail
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Block every call of `operation` until the returned gate is opened
    pub fn gate(&self, operation: &'static str) -> Gate {
        let gate = Gate {
            entered: Arc::new(Notify::new()),
            permits: Arc::new(Semaphore::new(0)),
        };
        self.gates.lock().unwrap().insert(operation, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<PipelineId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Release(pipeline) => Some(pipeline),
                _ => None,
            })
            .collect()
    }

    pub fn forwarded_candidates(&self) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddCandidate(_, candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    /// Emit an event on the stream of the most recently subscribed endpoint
    pub fn emit(&self, event: MediaEvent) -> bool {
        let events = self.events.lock().unwrap();
        match events.iter().max_by_key(|(endpoint, _)| endpoint.raw()) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    async fn enter(&self, operation: &'static str) -> Result<(), MediaError> {
        let gate = self.gates.lock().unwrap().get(operation).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }
        if self.failing.lock().unwrap().contains(operation) {
            return Err(MediaError::operation(operation, "injected failure"));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_raw(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl MediaBackend for RecordingBackend {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError> {
        self.enter("createPipeline").await?;
        let pipeline = PipelineId::new(self.next_raw());
        self.record(Call::CreatePipeline(pipeline));
        Ok(pipeline)
    }

    async fn create_endpoint(&self, _pipeline: PipelineId) -> Result<EndpointId, MediaError> {
        self.enter("createEndpoint").await?;
        let endpoint = EndpointId::new(self.next_raw());
        self.record(Call::CreateEndpoint(endpoint));
        Ok(endpoint)
    }

    async fn create_filter(&self, _pipeline: PipelineId) -> Result<FilterId, MediaError> {
        self.enter("createFilter").await?;
        let filter = FilterId::new(self.next_raw());
        self.record(Call::CreateFilter(filter));
        Ok(filter)
    }

    async fn connect(&self, source: MediaElement, sink: MediaElement) -> Result<(), MediaError> {
        self.enter("connect").await?;
        self.record(Call::Connect(source, sink));
        Ok(())
    }

    async fn subscribe(
        &self,
        endpoint: EndpointId,
        _filter: FilterId,
    ) -> Result<MediaEvents, MediaError> {
        self.enter("subscribe").await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.events.lock().unwrap().insert(endpoint, tx);
        self.record(Call::Subscribe(endpoint));
        Ok(rx)
    }

    async fn process_offer(
        &self,
        _endpoint: EndpointId,
        sdp_offer: &str,
    ) -> Result<String, MediaError> {
        self.enter("processOffer").await?;
        self.record(Call::ProcessOffer(sdp_offer.to_string()));
        Ok(format!("answer-to:{}", sdp_offer))
    }

    async fn add_candidate(
        &self,
        endpoint: EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        self.enter("addCandidate").await?;
        self.record(Call::AddCandidate(endpoint, candidate));
        Ok(())
    }

    async fn gather_candidates(&self, endpoint: EndpointId) -> Result<(), MediaError> {
        self.enter("gatherCandidates").await?;
        self.record(Call::GatherCandidates(endpoint));
        Ok(())
    }

    async fn release(&self, pipeline: PipelineId) -> Result<(), MediaError> {
        self.enter("release").await?;
        self.record(Call::Release(pipeline));
        // the recorder does not track ownership, so every stream ends
        self.events.lock().unwrap().clear();
        Ok(())
    }
}

pub(crate) fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 UDP 2122260223 10.0.0.{} 5000 typ host", n, n),
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
    }
}
