use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backend::{
    EndpointId, FilterId, IceCandidate, MediaBackend, MediaElement, MediaError, MediaEvent,
    MediaEvents, PipelineId,
};

const HOST_CANDIDATE_PRIORITY: u32 = 2_122_260_223;
const PORT_RANGE: std::ops::Range<u16> = 40_000..50_000;
const ICE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Default)]
struct PipelineState {
    endpoints: Vec<EndpointId>,
    filters: Vec<FilterId>,
}

#[derive(Debug)]
struct EndpointState {
    pipeline: PipelineId,
    /// (mid, m-line index) of every negotiated media section
    sections: Option<Vec<(String, u32)>>,
    events: Option<mpsc::UnboundedSender<MediaEvent>>,
    flow_reported: bool,
}

/// In-process media backend.
///
/// Answers offers by mirroring their media sections, advertises one host
/// candidate per section and raises a filter event once the browser's
/// candidates start arriving. No media is actually processed.
#[derive(Debug)]
pub struct LoopbackBackend {
    host: IpAddr,
    next_id: AtomicU64,
    pipelines: DashMap<PipelineId, PipelineState>,
    endpoints: DashMap<EndpointId, EndpointState>,
    filters: DashMap<FilterId, PipelineId>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl LoopbackBackend {
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            next_id: AtomicU64::new(1),
            pipelines: DashMap::new(),
            endpoints: DashMap::new(),
            filters: DashMap::new(),
        }
    }

    /// Number of pipelines currently allocated
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn next_raw(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pipeline_of(&self, element: MediaElement) -> Result<PipelineId, MediaError> {
        match element {
            MediaElement::Endpoint(id) => self
                .endpoints
                .get(&id)
                .map(|e| e.pipeline)
                .ok_or_else(|| MediaError::UnknownObject(id.to_string())),
            MediaElement::Filter(id) => self
                .filters
                .get(&id)
                .map(|p| *p)
                .ok_or_else(|| MediaError::UnknownObject(id.to_string())),
        }
    }

    fn build_answer(&self, sdp_offer: &str) -> Result<(String, Vec<(String, u32)>), MediaError> {
        let mut lines = sdp_offer.lines().map(str::trim_end);
        if lines.next() != Some("v=0") {
            return Err(MediaError::operation(
                "processOffer",
                "offer does not start with v=0",
            ));
        }

        let mut rng = rand::rng();
        let ufrag = random_token(&mut rng, 8);
        let pwd = random_token(&mut rng, 24);
        let session_id: u32 = rng.random();

        let mut answer = format!(
            "v=0\r\no=framegate {} 1 IN IP4 {}\r\ns=framegate\r\nt=0 0\r\n",
            session_id, self.host
        );
        let mut sections: Vec<(String, u32)> = Vec::new();

        for line in lines {
            if line.starts_with("m=") {
                let index = sections.len() as u32;
                sections.push((index.to_string(), index));
                answer.push_str(line);
                answer.push_str("\r\n");
                answer.push_str(&format!(
                    "a=ice-ufrag:{}\r\na=ice-pwd:{}\r\na=setup:active\r\n",
                    ufrag, pwd
                ));
                continue;
            }

            if sections.is_empty() {
                if line.starts_with("a=group:") {
                    answer.push_str(line);
                    answer.push_str("\r\n");
                }
                continue;
            }

            if let Some(mid) = line.strip_prefix("a=mid:") {
                if let Some(last) = sections.last_mut() {
                    last.0 = mid.to_string();
                }
            }

            let skipped = ["a=candidate:", "a=ice-ufrag:", "a=ice-pwd:", "a=setup:", "a=end-of-candidates"];
            if !skipped.iter().any(|prefix| line.starts_with(prefix)) && !line.is_empty() {
                answer.push_str(line);
                answer.push_str("\r\n");
            }
        }

        if sections.is_empty() {
            return Err(MediaError::operation(
                "processOffer",
                "offer has no media sections",
            ));
        }

        Ok((answer, sections))
    }
}

fn random_token(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| ICE_CHARS[rng.random_range(0..ICE_CHARS.len())] as char)
        .collect()
}

#[async_trait]
impl MediaBackend for LoopbackBackend {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError> {
        let pipeline = PipelineId::new(self.next_raw());
        self.pipelines.insert(pipeline, PipelineState::default());
        info!(%pipeline, "pipeline created");
        Ok(pipeline)
    }

    async fn create_endpoint(&self, pipeline: PipelineId) -> Result<EndpointId, MediaError> {
        let endpoint = EndpointId::new(self.next_raw());
        {
            let mut state = self
                .pipelines
                .get_mut(&pipeline)
                .ok_or_else(|| MediaError::UnknownObject(pipeline.to_string()))?;
            state.endpoints.push(endpoint);
        }
        self.endpoints.insert(
            endpoint,
            EndpointState {
                pipeline,
                sections: None,
                events: None,
                flow_reported: false,
            },
        );
        Ok(endpoint)
    }

    async fn create_filter(&self, pipeline: PipelineId) -> Result<FilterId, MediaError> {
        let filter = FilterId::new(self.next_raw());
        {
            let mut state = self
                .pipelines
                .get_mut(&pipeline)
                .ok_or_else(|| MediaError::UnknownObject(pipeline.to_string()))?;
            state.filters.push(filter);
        }
        self.filters.insert(filter, pipeline);
        Ok(filter)
    }

    async fn connect(&self, source: MediaElement, sink: MediaElement) -> Result<(), MediaError> {
        if self.pipeline_of(source)? != self.pipeline_of(sink)? {
            return Err(MediaError::operation(
                "connect",
                format!("{} and {} live in different pipelines", source, sink),
            ));
        }
        debug!(%source, %sink, "elements connected");
        Ok(())
    }

    async fn subscribe(
        &self,
        endpoint: EndpointId,
        filter: FilterId,
    ) -> Result<MediaEvents, MediaError> {
        if !self.filters.contains_key(&filter) {
            return Err(MediaError::UnknownObject(filter.to_string()));
        }
        let mut state = self
            .endpoints
            .get_mut(&endpoint)
            .ok_or_else(|| MediaError::UnknownObject(endpoint.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.events = Some(tx);
        Ok(rx)
    }

    async fn process_offer(
        &self,
        endpoint: EndpointId,
        sdp_offer: &str,
    ) -> Result<String, MediaError> {
        if !self.endpoints.contains_key(&endpoint) {
            return Err(MediaError::UnknownObject(endpoint.to_string()));
        }
        let (answer, sections) = self.build_answer(sdp_offer)?;
        if let Some(mut state) = self.endpoints.get_mut(&endpoint) {
            state.sections = Some(sections);
        }
        Ok(answer)
    }

    async fn add_candidate(
        &self,
        endpoint: EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        let mut state = self
            .endpoints
            .get_mut(&endpoint)
            .ok_or_else(|| MediaError::UnknownObject(endpoint.to_string()))?;
        debug!(%endpoint, candidate = %candidate.candidate, "remote candidate added");

        if state.sections.is_some() && !state.flow_reported {
            state.flow_reported = true;
            if let Some(events) = &state.events {
                let _ = events.send(MediaEvent::Filter(json!({
                    "type": "FrameSaverEvent",
                    "info": format!("remote candidates arriving on {}", endpoint),
                })));
            }
        }
        Ok(())
    }

    async fn gather_candidates(&self, endpoint: EndpointId) -> Result<(), MediaError> {
        let state = self
            .endpoints
            .get(&endpoint)
            .ok_or_else(|| MediaError::UnknownObject(endpoint.to_string()))?;
        let sections = state.sections.as_ref().ok_or_else(|| {
            MediaError::operation("gatherCandidates", "no offer has been processed")
        })?;

        if let Some(events) = &state.events {
            let mut rng = rand::rng();
            for (foundation, (mid, index)) in sections.iter().enumerate() {
                let port = rng.random_range(PORT_RANGE);
                let candidate = IceCandidate {
                    candidate: format!(
                        "candidate:{} 1 UDP {} {} {} typ host",
                        foundation + 1,
                        HOST_CANDIDATE_PRIORITY,
                        self.host,
                        port
                    ),
                    sdp_mid: mid.clone(),
                    sdp_m_line_index: *index,
                };
                let _ = events.send(MediaEvent::CandidateFound(candidate));
            }
        }
        Ok(())
    }

    async fn release(&self, pipeline: PipelineId) -> Result<(), MediaError> {
        let (_, state) = self
            .pipelines
            .remove(&pipeline)
            .ok_or_else(|| MediaError::UnknownObject(pipeline.to_string()))?;
        for endpoint in &state.endpoints {
            self.endpoints.remove(endpoint);
        }
        for filter in &state.filters {
            self.filters.remove(filter);
        }
        info!(%pipeline, "pipeline released");
        Ok(())
    }
}
