//! # Monitoring Session Module
//!
//! One `MonitorSession` owns an entire ingestion pipeline: the link
//! thread producing chunks, and the pipeline thread that decodes,
//! parses, validates, and fans records out to the sinks. No state is
//! ambient; everything a session needs is constructed here and torn
//! down here.
//!
//! ## Concurrency Model
//! Two timelines drive the pipeline: the async read loop in the link
//! thread, and the flush/aggregate timer ticks. All mutation of the
//! receive buffer, ring buffers, upload batch, and feature windows
//! happens on the single pipeline thread, which drains link events,
//! ticks, and control commands through one `select!` loop. The
//! presentation layer only ever touches the lock-guarded chart handle
//! and the status snapshot.
//!
//! ## Shutdown Order
//! `stop()` signals the read loop first, then stops the pipeline thread
//! (which cancels the timers with it), then joins the link thread, which
//! releases the transport on its way out. Each step completes before the
//! next so no callback fires against a torn-down structure.

use crate::charts::LiveCharts;
use crate::config::{Config, ProtocolVariant};
use crate::features::{ActivityClassifier, FeatureAggregator, Prediction};
use crate::frame::{FrameDecoder, Framing, TextEncoding};
use crate::link::{LinkEvent, LinkHandle, LinkManager, LinkState};
use crate::record::{ColumnSpec, ParseStrategy, RecordParser};
use crate::router::FanoutRouter;
use crate::transport::Transport;
use crate::uploader::{BatchUploader, RecordStore, SessionMeta, UploadStatus};
use crate::validate::{RangeTable, Validator};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

/// How many link events may queue before the radio thread starts
/// dropping chunks.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Everything a session needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub framing: Framing,
    pub encodings: Vec<TextEncoding>,
    pub strategy: ParseStrategy,
    pub retry_delay: Duration,
    pub chart_capacity: usize,
    pub flush_interval: Duration,
    pub aggregate_interval: Duration,
    pub feature_window: usize,
    pub upload_enabled: bool,
    pub meta: SessionMeta,
}

impl SessionOptions {
    /// Derive options from the persisted config, skipping unusable
    /// entries with a warning rather than failing the session.
    pub fn from_config(config: &Config) -> Self {
        let mut encodings: Vec<TextEncoding> = config
            .encodings
            .iter()
            .filter_map(|name| {
                let encoding = TextEncoding::from_name(name);
                if encoding.is_none() {
                    log::warn!("Ignoring unknown encoding {:?} in config", name);
                }
                encoding
            })
            .collect();
        if encodings.is_empty() {
            encodings = vec![TextEncoding::Utf8, TextEncoding::Latin1, TextEncoding::Ascii];
        }

        let (framing, strategy) = match config.protocol {
            ProtocolVariant::BracketJson => (Framing::Brackets, ParseStrategy::Json),
            ProtocolVariant::CsvLines => {
                let columns: Vec<ColumnSpec> = config
                    .csv_columns
                    .iter()
                    .filter_map(|key| {
                        let spec = ColumnSpec::parse(key);
                        if spec.is_none() {
                            log::warn!("Ignoring invalid csv column {:?} in config", key);
                        }
                        spec
                    })
                    .collect();
                (Framing::Lines, ParseStrategy::Csv { columns })
            }
        };

        Self {
            framing,
            encodings,
            strategy,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            chart_capacity: config.chart_capacity,
            flush_interval: Duration::from_secs(config.upload.flush_secs.max(1)),
            aggregate_interval: Duration::from_secs(config.features.cadence_secs.max(1)),
            feature_window: config.features.window.max(1),
            upload_enabled: config.upload.enabled,
            meta: SessionMeta {
                subject: config.subject.clone(),
                activity: config.activity.clone(),
            },
        }
    }
}

/// Point-in-time view of the session for the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub link: LinkState,
    pub upload: UploadStatus,
    pub prediction: Option<Prediction>,
    pub records_routed: u64,
    pub records_dropped: u64,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            link: LinkState::Disconnected,
            upload: UploadStatus::default(),
            prediction: None,
            records_routed: 0,
            records_dropped: 0,
        }
    }
}

#[derive(Debug)]
enum PipelineCommand {
    SetUploadEnabled(bool),
    SetActivity(String),
    Reset,
    Stop,
}

/// A running monitoring session.
pub struct MonitorSession {
    /// Taken during shutdown so the link thread's command channel closes
    link: Option<LinkHandle>,
    link_thread: Option<thread::JoinHandle<()>>,
    pipeline_thread: Option<thread::JoinHandle<()>>,
    command_tx: crossbeam_channel::Sender<PipelineCommand>,
    status: Arc<RwLock<SessionStatus>>,
    charts: LiveCharts,
}

impl MonitorSession {
    /// Wire up and start a session against the given collaborators.
    pub fn start(
        transport: Box<dyn Transport>,
        store: Box<dyn RecordStore>,
        classifier: Box<dyn ActivityClassifier>,
        options: SessionOptions,
    ) -> Self {
        let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let (manager, link) = LinkManager::new(transport, event_tx, options.retry_delay);
        let link_thread = thread::spawn(move || manager.run());

        let charts = LiveCharts::new(options.chart_capacity);
        let decoder = FrameDecoder::new(options.framing, options.encodings.clone());
        let parser = RecordParser::new(options.strategy.clone());
        let validator = Validator::new(RangeTable::default());
        let uploader = BatchUploader::new(store, options.meta.clone(), options.upload_enabled);
        let features = FeatureAggregator::new(classifier, options.feature_window);
        let router = FanoutRouter::new(charts.clone(), uploader, features);

        let status = Arc::new(RwLock::new(SessionStatus {
            upload: router.uploader().status(),
            ..SessionStatus::default()
        }));

        let pipeline_status = status.clone();
        let flush_interval = options.flush_interval;
        let aggregate_interval = options.aggregate_interval;
        let pipeline_thread = thread::spawn(move || {
            pipeline_loop(
                event_rx,
                command_rx,
                decoder,
                parser,
                validator,
                router,
                pipeline_status,
                flush_interval,
                aggregate_interval,
            );
        });

        link.start();

        Self {
            link: Some(link),
            link_thread: Some(link_thread),
            pipeline_thread: Some(pipeline_thread),
            command_tx,
            status,
            charts,
        }
    }

    /// Convenience constructor from the persisted config.
    pub fn start_with_config(
        config: &Config,
        transport: Box<dyn Transport>,
        store: Box<dyn RecordStore>,
        classifier: Box<dyn ActivityClassifier>,
    ) -> Self {
        Self::start(transport, store, classifier, SessionOptions::from_config(config))
    }

    #[allow(dead_code)]
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.is_connected())
    }

    /// Current status snapshot for the presentation layer.
    pub fn status(&self) -> SessionStatus {
        self.status.read().unwrap().clone()
    }

    /// Shared chart handle for the presentation layer.
    #[allow(dead_code)]
    pub fn charts(&self) -> LiveCharts {
        self.charts.clone()
    }

    #[allow(dead_code)]
    pub fn set_upload_enabled(&self, enabled: bool) {
        let _ = self
            .command_tx
            .send(PipelineCommand::SetUploadEnabled(enabled));
    }

    #[allow(dead_code)]
    pub fn set_activity(&self, activity: impl Into<String>) {
        let _ = self
            .command_tx
            .send(PipelineCommand::SetActivity(activity.into()));
    }

    /// Tear down and reopen the link, discarding all buffered state.
    #[allow(dead_code)]
    pub fn reset(&self) {
        let _ = self.command_tx.send(PipelineCommand::Reset);
        if let Some(link) = &self.link {
            link.reset();
        }
    }

    /// Stop the session, joining both threads.
    #[allow(dead_code)]
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // (1) signal the read loop; it exits at its next suspension point
        if let Some(link) = &self.link {
            link.stop();
        }
        // (2) stop the pipeline thread; its timers die with it
        let _ = self.command_tx.send(PipelineCommand::Stop);
        if let Some(thread) = self.pipeline_thread.take() {
            let _ = thread.join();
        }
        // (3) drop our control handle so the link thread's command loop
        // ends; it releases the transport on the way out
        self.link.take();
        if let Some(thread) = self.link_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[allow(clippy::too_many_arguments)]
fn pipeline_loop(
    events: crossbeam_channel::Receiver<LinkEvent>,
    commands: crossbeam_channel::Receiver<PipelineCommand>,
    mut decoder: FrameDecoder,
    parser: RecordParser,
    validator: Validator,
    mut router: FanoutRouter,
    status: Arc<RwLock<SessionStatus>>,
    flush_interval: Duration,
    aggregate_interval: Duration,
) {
    let flush_tick = crossbeam_channel::tick(flush_interval);
    let aggregate_tick = crossbeam_channel::tick(aggregate_interval);
    let mut routed: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        crossbeam_channel::select! {
            recv(events) -> event => { match event {
                Ok(LinkEvent::Status(state)) => {
                    if state == LinkState::Connected {
                        // A fresh connection never continues a torn frame
                        decoder.reset();
                    }
                    status.write().unwrap().link = state;
                }
                Ok(LinkEvent::Chunk(chunk)) => {
                    for raw in decoder.push_chunk(&chunk) {
                        match parser.parse(&raw) {
                            Ok(records) => {
                                for record in records {
                                    let validated = validator.validate(record);
                                    router.route(&validated);
                                    routed += 1;
                                }
                            }
                            Err(e) => {
                                log::warn!("Dropping record: {}", e);
                                dropped += 1;
                            }
                        }
                    }
                    let mut s = status.write().unwrap();
                    s.records_routed = routed;
                    s.records_dropped = dropped;
                }
                Err(_) => {
                    log::info!("Link event channel closed; pipeline exiting");
                    break;
                }
            } },
            recv(flush_tick) -> _tick => {
                router.uploader_mut().flush();
                status.write().unwrap().upload = router.uploader().status();
            },
            recv(aggregate_tick) -> _tick => {
                if let Some(prediction) = router.features_mut().tick() {
                    status.write().unwrap().prediction = Some(prediction);
                }
            },
            recv(commands) -> command => { match command {
                Ok(PipelineCommand::SetUploadEnabled(enabled)) => {
                    router.uploader_mut().set_enabled(enabled);
                    status.write().unwrap().upload = router.uploader().status();
                }
                Ok(PipelineCommand::SetActivity(activity)) => {
                    router.uploader_mut().set_activity(activity);
                }
                Ok(PipelineCommand::Reset) => {
                    log::info!("Session reset: clearing decoder and sinks");
                    decoder.reset();
                    router.reset();
                    routed = 0;
                    dropped = 0;
                    let mut s = status.write().unwrap();
                    s.upload = router.uploader().status();
                    s.prediction = None;
                    s.records_routed = 0;
                    s.records_dropped = 0;
                }
                Ok(PipelineCommand::Stop) | Err(_) => {
                    log::info!("Pipeline stopping");
                    break;
                }
            } },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::HeuristicClassifier;
    use crate::record::SensorChannel;
    use crate::transport::{ScriptStep, ScriptedTransport};
    use crate::uploader::testing::MemoryStore;
    use std::time::Instant;

    fn test_options() -> SessionOptions {
        SessionOptions {
            framing: Framing::Brackets,
            encodings: vec![TextEncoding::Utf8, TextEncoding::Ascii],
            strategy: ParseStrategy::Json,
            retry_delay: Duration::ZERO,
            chart_capacity: 64,
            flush_interval: Duration::from_millis(50),
            aggregate_interval: Duration::from_millis(50),
            feature_window: 8,
            upload_enabled: true,
            meta: SessionMeta {
                subject: "Tester".to_string(),
                activity: "Walking".to_string(),
            },
        }
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn start_session(steps: Vec<ScriptStep>, options: SessionOptions) -> (MonitorSession, std::sync::Arc<std::sync::Mutex<Vec<crate::uploader::StoreDocument>>>, std::sync::Arc<std::sync::Mutex<usize>>) {
        let (store, docs, calls) = MemoryStore::new();
        let session = MonitorSession::start(
            Box::new(ScriptedTransport::new(steps)),
            Box::new(store),
            Box::new(HeuristicClassifier),
            options,
        );
        (session, docs, calls)
    }

    #[test]
    fn test_scenario_a_split_frame_clamped_into_chart() {
        // Frame split across two chunks, pulse above the valid range
        let steps = vec![
            ScriptStep::Chunk(b"[{\"Pulse".to_vec()),
            ScriptStep::Chunk(b"Sensor\":{\"pulse_BPM\":500}}]".to_vec()),
        ];
        let (session, _docs, _calls) = start_session(steps, test_options());
        let charts = session.charts();

        assert!(wait_until(Duration::from_secs(5), || {
            !charts.samples(SensorChannel::Pulse, "pulse_BPM").is_empty()
        }));
        let samples = charts.samples(SensorChannel::Pulse, "pulse_BPM");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 180.0);

        session.stop();
    }

    #[test]
    fn test_scenario_b_undecodable_chunk_skipped() {
        // ASCII-only fallback: the 0xFF chunk is undecodable and must be
        // skipped without corrupting the buffered state.
        let steps = vec![
            ScriptStep::Chunk(b"[{\"RespiratoryRate\":{\"BRPM\":".to_vec()),
            ScriptStep::Chunk(vec![0xFF, 0xFE, 0x80]),
            ScriptStep::Chunk(b"21}}]".to_vec()),
        ];
        let (session, _docs, _calls) = start_session(steps, test_options());
        let charts = session.charts();

        assert!(wait_until(Duration::from_secs(5), || {
            !charts.samples(SensorChannel::Respiration, "BRPM").is_empty()
        }));
        let samples = charts.samples(SensorChannel::Respiration, "BRPM");
        assert_eq!(samples[0].value, 21.0);
        assert_eq!(session.status().records_dropped, 0);

        session.stop();
    }

    #[test]
    fn test_scenario_d_reconnect_discards_partial_buffer() {
        // The link drops mid-frame; after reconnecting, the stale partial
        // text must not pair with new bytes.
        let steps = vec![
            ScriptStep::Chunk(b"[{\"PulseSensor\":{\"pulse_BPM\":6".to_vec()),
            ScriptStep::Fail("mid-stream drop"),
            ScriptStep::Chunk(b"[{\"RespiratoryRate\":{\"BRPM\":18}}]".to_vec()),
        ];
        let (session, _docs, _calls) = start_session(steps, test_options());
        let charts = session.charts();

        assert!(wait_until(Duration::from_secs(5), || {
            !charts.samples(SensorChannel::Respiration, "BRPM").is_empty()
        }));
        assert_eq!(
            charts.samples(SensorChannel::Respiration, "BRPM")[0].value,
            18.0
        );
        // The torn pulse frame never completed into a record
        assert!(charts.samples(SensorChannel::Pulse, "pulse_BPM").is_empty());

        session.stop();
    }

    #[test]
    fn test_upload_flush_and_prediction_ticks() {
        // One record carrying every classification channel
        let frame = b"[{\"PulseSensor\":{\"pulse_BPM\":70},\"RespiratoryRate\":{\"BRPM\":15},\
\"ObjectTemp\":{\"Celsius\":36.5},\"Accelerometer\":{\"s_rate\":95},\"Gyroscope\":{\"r_rate\":40}}]";
        let steps = vec![ScriptStep::Chunk(frame.to_vec())];
        let (session, docs, calls) = start_session(steps, test_options());

        assert!(wait_until(Duration::from_secs(5), || {
            !docs.lock().unwrap().is_empty()
        }));
        assert!(*calls.lock().unwrap() >= 1);
        let docs = docs.lock().unwrap();
        assert!(docs
            .iter()
            .any(|d| d.get("sensor") == Some(&serde_json::Value::from("PulseSensor"))));
        assert!(docs
            .iter()
            .all(|d| d.get("activity_id") == Some(&serde_json::Value::from("Walking"))));
        drop(docs);

        assert!(wait_until(Duration::from_secs(5), || {
            session.status().prediction.is_some()
        }));
        let prediction = session.status().prediction.unwrap();
        assert_eq!(prediction.label, "Walking");

        session.stop();
    }

    #[test]
    fn test_upload_disabled_never_calls_store() {
        let frame = b"[{\"PulseSensor\":{\"pulse_BPM\":70}}]";
        let mut options = test_options();
        options.upload_enabled = false;
        let steps = vec![
            ScriptStep::Chunk(frame.to_vec()),
            ScriptStep::Chunk(frame.to_vec()),
            ScriptStep::Chunk(frame.to_vec()),
        ];
        let (session, docs, calls) = start_session(steps, options);

        // Give the pipeline several flush ticks
        assert!(wait_until(Duration::from_secs(5), || {
            session.status().records_routed >= 3
        }));
        thread::sleep(Duration::from_millis(200));

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(docs.lock().unwrap().is_empty());

        session.stop();
    }

    #[test]
    fn test_malformed_record_dropped_stream_continues() {
        let steps = vec![
            ScriptStep::Chunk(b"[not json at all}".to_vec()),
            ScriptStep::Chunk(b"][{\"PulseSensor\":{\"pulse_BPM\":66}}]".to_vec()),
        ];
        let (session, _docs, _calls) = start_session(steps, test_options());
        let charts = session.charts();

        assert!(wait_until(Duration::from_secs(5), || {
            !charts.samples(SensorChannel::Pulse, "pulse_BPM").is_empty()
        }));
        assert_eq!(charts.samples(SensorChannel::Pulse, "pulse_BPM")[0].value, 66.0);
        assert!(session.status().records_dropped >= 1);

        session.stop();
    }
}
