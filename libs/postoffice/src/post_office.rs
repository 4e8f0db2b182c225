//! The post office coordinator and its public handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use message_store::{DurableBackend, MessageStore};
use types::{
    InboundParcel, MessageType, OutboundMessage, OutboundParcel, PreparedMessage,
    RawInboundMessage, SendPriority, StampedParcel,
};

use crate::config::PostConfig;
use crate::dispatch::{Dispatcher, MessageHandler, MessageParser};
use crate::error::SendError;
use crate::policy::{PolicyAction, SendPriorityPolicy};
use crate::registration::RegistrationGate;
use crate::scheduler::{TaskId, TaskScheduler};
use crate::stamper::{ParcelStamper, StampProvider};

/// Queueing options attached to one outbound send.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub priority: SendPriority,
    pub persist_across_restarts: bool,
    pub requires_registration: bool,
    pub expire_after: Option<Duration>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            priority: SendPriority::Soon,
            persist_across_restarts: true,
            requires_registration: true,
            expire_after: None,
        }
    }
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: SendPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist_across_restarts = persist;
        self
    }

    pub fn requires_registration(mut self, requires: bool) -> Self {
        self.requires_registration = requires;
        self
    }

    pub fn expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = Some(expire_after);
        self
    }
}

enum Command {
    Store {
        message: PreparedMessage,
        options: SendOptions,
    },
    SoonTimerElapsed,
    RegistrationComplete,
    Inbound(InboundParcel),
    Subscribe {
        message_type: MessageType,
        handler: MessageHandler,
    },
    CollectParcels {
        reply: oneshot::Sender<Vec<StampedParcel>>,
    },
    MessagesSent {
        message_ids: Vec<String>,
    },
}

/// Clonable handle to the coordinator task.
///
/// All methods are non-blocking except `send_message*`, which awaits the
/// message's preparation step before enqueueing, and `collect_parcels`,
/// which awaits the coordinator's reply.
#[derive(Clone)]
pub struct PostOffice {
    commands: mpsc::UnboundedSender<Command>,
}

impl PostOffice {
    /// Spawn the coordinator task and return a handle to it.
    ///
    /// Messages persisted by a previous run are restored from the backend
    /// before the first command is processed; they stay gated until
    /// [`on_registration_complete`](Self::on_registration_complete) is
    /// called.
    pub fn spawn(
        config: PostConfig,
        backend: Arc<dyn DurableBackend>,
        scheduler: Arc<dyn TaskScheduler>,
        stamp_provider: Arc<dyn StampProvider>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            store: MessageStore::new(backend, config.default_max_pending_per_type),
            gate: RegistrationGate::new(),
            policy: SendPriorityPolicy::new(config.buffer_time_soon()),
            dispatcher: Dispatcher::new(),
            stamper: ParcelStamper::new(stamp_provider),
            sender_task: TaskId::new(config.sender_task_id.clone()),
            scheduler,
            self_sender: commands.downgrade(),
            config,
        };
        tokio::spawn(coordinator.run(receiver));
        Self { commands }
    }

    /// Prepare and enqueue an outbound message with default options
    /// (SOON priority, persisted, gated on registration).
    pub async fn send_message(&self, message: &dyn OutboundMessage) -> Result<(), SendError> {
        self.send_message_with(message, SendOptions::default()).await
    }

    /// Prepare and enqueue an outbound message.
    ///
    /// Preparation runs on the caller's context; a failed preparation means
    /// the message never reaches the store.
    pub async fn send_message_with(
        &self,
        message: &dyn OutboundMessage,
        options: SendOptions,
    ) -> Result<(), SendError> {
        let payload = message.prepare().await.map_err(|source| SendError::Preparation {
            message_type: message.message_type(),
            source,
        })?;
        let prepared = PreparedMessage::new(
            message.message_id().to_owned(),
            message.message_type(),
            payload,
        );
        self.command(Command::Store {
            message: prepared,
            options,
        })
    }

    /// Notify the coordinator that registration has completed. Idempotent.
    pub fn on_registration_complete(&self) -> Result<(), SendError> {
        self.command(Command::RegistrationComplete)
    }

    /// Hand a decoded inbound parcel over for dispatch to subscribers.
    pub fn on_inbound_parcel(&self, parcel: InboundParcel) -> Result<(), SendError> {
        self.command(Command::Inbound(parcel))
    }

    /// Subscribe a raw handler to one message type. Handler errors are
    /// logged and contained.
    pub fn mailbox<F>(&self, message_type: MessageType, handler: F) -> Result<(), SendError>
    where
        F: FnMut(&RawInboundMessage) -> anyhow::Result<()> + Send + 'static,
    {
        self.command(Command::Subscribe {
            message_type,
            handler: Box::new(handler),
        })
    }

    /// Subscribe a typed handler through a parser. Messages the parser
    /// rejects are logged and skipped, one at a time.
    pub fn mailbox_parsed<P, F>(&self, parser: P, mut handler: F) -> Result<(), SendError>
    where
        P: MessageParser,
        F: FnMut(P::Output) -> anyhow::Result<()> + Send + 'static,
    {
        self.mailbox(parser.message_type(), move |message| {
            let parsed = parser.parse(message)?;
            handler(parsed)
        })
    }

    /// Receive every inbound message of one type on a channel.
    pub fn receive_messages(
        &self,
        message_type: MessageType,
    ) -> mpsc::UnboundedReceiver<RawInboundMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = self.mailbox(message_type, move |message| {
            // A dropped receiver silently ends the subscription's traffic.
            let _ = sender.send(message.clone());
            Ok(())
        });
        receiver
    }

    /// Receive parsed inbound messages of one type on a channel.
    pub fn receive_parsed<P>(&self, parser: P) -> mpsc::UnboundedReceiver<P::Output>
    where
        P: MessageParser,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = self.mailbox_parsed(parser, move |parsed| {
            let _ = sender.send(parsed);
            Ok(())
        });
        receiver
    }

    /// Snapshot the eligible queue as stamped, size-bounded parcels.
    ///
    /// Called by the external sender task when the scheduler runs it.
    /// Expired messages are disposed first. Collected messages stay in the
    /// store until [`on_parcel_sent`](Self::on_parcel_sent) confirms them.
    pub async fn collect_parcels(&self) -> Vec<StampedParcel> {
        let (reply, receiver) = oneshot::channel();
        if self.commands.send(Command::CollectParcels { reply }).is_err() {
            return Vec::new();
        }
        receiver.await.unwrap_or_default()
    }

    /// Confirm that a parcel was delivered; its messages are removed from
    /// the store.
    pub fn on_parcel_sent(&self, parcel: &StampedParcel) -> Result<(), SendError> {
        self.remove_messages(parcel.message_ids())
    }

    /// Remove stored messages by id. Absent ids are ignored.
    pub fn remove_messages(&self, message_ids: Vec<String>) -> Result<(), SendError> {
        self.command(Command::MessagesSent { message_ids })
    }

    fn command(&self, command: Command) -> Result<(), SendError> {
        self.commands.send(command).map_err(|_| SendError::Closed)
    }
}

/// Owns all mutable transport state; runs as a single task.
struct Coordinator {
    config: PostConfig,
    store: MessageStore,
    gate: RegistrationGate,
    policy: SendPriorityPolicy,
    dispatcher: Dispatcher,
    stamper: ParcelStamper,
    scheduler: Arc<dyn TaskScheduler>,
    sender_task: TaskId,
    // Weak so pending timers never keep a closed post office alive.
    self_sender: mpsc::WeakUnboundedSender<Command>,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if let Some(priority) = self.store.restore() {
            debug!(
                pending = self.store.len(),
                highest_priority = ?priority,
                "restored persisted messages, awaiting registration"
            );
        }
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        debug!("post office coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Store { message, options } => self.handle_store(message, options),
            Command::SoonTimerElapsed => {
                let action = self.policy.on_soon_timer_elapsed();
                self.apply(action);
            }
            Command::RegistrationComplete => self.handle_registration_complete(),
            Command::Inbound(parcel) => {
                trace!(
                    parcel_id = %parcel.parcel_id,
                    count = parcel.messages.len(),
                    "dispatching inbound parcel"
                );
                for message in &parcel.messages {
                    self.dispatcher.dispatch(message);
                }
            }
            Command::Subscribe {
                message_type,
                handler,
            } => self.dispatcher.subscribe(message_type, handler),
            Command::CollectParcels { reply } => {
                self.store.dispose_expired(self.config.default_expiration());
                let _ = reply.send(self.collect());
            }
            Command::MessagesSent { message_ids } => {
                for message_id in &message_ids {
                    self.store.remove(message_id);
                }
            }
        }
    }

    fn handle_store(&mut self, message: PreparedMessage, options: SendOptions) {
        let mut persist = options.persist_across_restarts;
        if persist && !options.requires_registration {
            warn!(
                message_id = %message.message_id,
                "persisting an ungated message is unsupported, storing it in memory only"
            );
            persist = false;
        }

        let Some(entry) = self.store.store(
            message,
            options.priority,
            persist,
            options.requires_registration,
            options.expire_after,
        ) else {
            return;
        };

        let priority = entry.priority;
        if entry.requires_registration && !self.gate.is_registered() {
            trace!(
                message_id = %entry.message.message_id,
                "stored message is gated until registration completes"
            );
            return;
        }

        let action = self.policy.on_arrival(priority);
        self.apply(action);
    }

    fn handle_registration_complete(&mut self) {
        if !self.gate.complete() {
            return;
        }
        let pending = self.gate.pending_eligible(&self.store);
        if pending > 0 {
            debug!(pending, "registration complete, flushing gated messages");
            self.signal_sender();
        }
    }

    fn apply(&mut self, action: PolicyAction) {
        match action {
            PolicyAction::FlushNow => self.signal_sender(),
            PolicyAction::StartSoonTimer(delay) => {
                let sender = self.self_sender.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(sender) = sender.upgrade() {
                        let _ = sender.send(Command::SoonTimerElapsed);
                    }
                });
            }
            PolicyAction::CheckBufferedFlush => {
                if self.full_parcel_ready() {
                    debug!("buffered messages reached a full parcel, flushing");
                    self.signal_sender();
                }
            }
            PolicyAction::Wait => {}
        }
    }

    fn signal_sender(&self) {
        self.scheduler.schedule_now(&self.sender_task);
    }

    /// A buffered flush requires at least one BUFFER-priority entry and a
    /// combined eligible size of one full parcel.
    fn full_parcel_ready(&self) -> bool {
        let eligible = self.store.eligible_entries(self.gate.is_registered());
        if !eligible
            .iter()
            .any(|entry| entry.priority == SendPriority::Buffer)
        {
            return false;
        }
        let total: usize = eligible.iter().map(|entry| entry.message.size()).sum();
        total >= self.config.max_parcel_size
    }

    /// Greedily chunk the eligible queue into size-bounded parcels, in
    /// insertion order, and stamp each one.
    fn collect(&self) -> Vec<StampedParcel> {
        let mut parcels = Vec::new();
        let mut chunk: Vec<PreparedMessage> = Vec::new();
        let mut chunk_size = 0usize;

        for entry in self.store.eligible_entries(self.gate.is_registered()) {
            let size = entry.message.size();
            if !chunk.is_empty() && chunk_size + size > self.config.max_parcel_size {
                parcels.push(self.stamper.stamp_parcel(OutboundParcel::new(std::mem::take(
                    &mut chunk,
                ))));
                chunk_size = 0;
            }
            chunk.push(entry.message.clone());
            chunk_size += size;
        }
        if !chunk.is_empty() {
            parcels.push(self.stamper.stamp_parcel(OutboundParcel::new(chunk)));
        }
        parcels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamper::StaticStampProvider;
    use crate::test_utils::{settle, RecordingScheduler, TestMessage};
    use message_store::MemoryBackend;
    use serde::Deserialize;

    struct Harness {
        office: PostOffice,
        scheduler: Arc<RecordingScheduler>,
        backend: Arc<MemoryBackend>,
        sender_task: TaskId,
    }

    fn spawn_office(config: PostConfig) -> Harness {
        spawn_office_on(config, Arc::new(MemoryBackend::new()))
    }

    fn spawn_office_on(config: PostConfig, backend: Arc<MemoryBackend>) -> Harness {
        let scheduler = Arc::new(RecordingScheduler::new());
        let sender_task = TaskId::new(config.sender_task_id.clone());
        let office = PostOffice::spawn(
            config,
            backend.clone(),
            scheduler.clone(),
            Arc::new(StaticStampProvider::new().with_field("courier", "fcm")),
        );
        Harness {
            office,
            scheduler,
            backend,
            sender_task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_priority_signals_the_sender_right_away() {
        let h = spawn_office(PostConfig::default());
        h.office.on_registration_complete().unwrap();
        settle().await;
        // Completing registration with nothing pending signals nothing.
        assert_eq!(h.scheduler.total_signals(), 0);

        h.office
            .send_message_with(
                &TestMessage::new("m1", MessageType(5)),
                SendOptions::new().priority(SendPriority::Immediate),
            )
            .await
            .unwrap();
        settle().await;
        assert_eq!(h.scheduler.signal_count(&h.sender_task), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn soon_window_is_anchored_to_the_first_arrival() {
        let h = spawn_office(PostConfig::default());
        h.office.on_registration_complete().unwrap();

        h.office
            .send_message(&TestMessage::new("m1", MessageType(5)))
            .await
            .unwrap();
        settle().await;

        // A second arrival halfway through the window must not extend it.
        tokio::time::advance(Duration::from_millis(1_000)).await;
        h.office
            .send_message(&TestMessage::new("m2", MessageType(5)))
            .await
            .unwrap();
        settle().await;

        tokio::time::advance(Duration::from_millis(900)).await;
        settle().await;
        assert_eq!(h.scheduler.total_signals(), 0);

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(h.scheduler.signal_count(&h.sender_task), 1);

        // The second arrival did not queue a timer of its own.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.scheduler.total_signals(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gated_messages_signal_once_after_registration() {
        let h = spawn_office(PostConfig::default());
        h.office
            .send_message(&TestMessage::new("m1", MessageType(10)))
            .await
            .unwrap();
        h.office
            .send_message(&TestMessage::new("m2", MessageType(10)))
            .await
            .unwrap();
        settle().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.scheduler.total_signals(), 0);

        h.office.on_registration_complete().unwrap();
        settle().await;
        assert_eq!(h.scheduler.signal_count(&h.sender_task), 1);

        // Registration is monotonic; repeating it changes nothing.
        h.office.on_registration_complete().unwrap();
        settle().await;
        assert_eq!(h.scheduler.total_signals(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_messages_flush_when_a_full_parcel_accumulates() {
        let config = PostConfig {
            max_parcel_size: 100,
            ..PostConfig::default()
        };
        let h = spawn_office(config);
        h.office.on_registration_complete().unwrap();

        h.office
            .send_message_with(
                &TestMessage::new("m1", MessageType(5)).with_field("data", "x".repeat(20)),
                SendOptions::new().priority(SendPriority::Buffer),
            )
            .await
            .unwrap();
        settle().await;
        assert_eq!(h.scheduler.total_signals(), 0);

        h.office
            .send_message_with(
                &TestMessage::new("m2", MessageType(5)).with_field("data", "x".repeat(100)),
                SendOptions::new().priority(SendPriority::Whenever),
            )
            .await
            .unwrap();
        settle().await;
        assert_eq!(h.scheduler.signal_count(&h.sender_task), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn whenever_alone_never_triggers_a_flush() {
        let config = PostConfig {
            max_parcel_size: 10,
            ..PostConfig::default()
        };
        let h = spawn_office(config);
        h.office.on_registration_complete().unwrap();

        h.office
            .send_message_with(
                &TestMessage::new("m1", MessageType(5)).with_field("data", "x".repeat(200)),
                SendOptions::new().priority(SendPriority::Whenever),
            )
            .await
            .unwrap();
        settle().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(h.scheduler.total_signals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collected_parcels_are_stamped_chunked_and_cleared_on_ack() {
        let config = PostConfig {
            max_parcel_size: 150,
            ..PostConfig::default()
        };
        let h = spawn_office(config);
        h.office.on_registration_complete().unwrap();

        for id in ["m1", "m2", "m3"] {
            h.office
                .send_message_with(
                    &TestMessage::new(id, MessageType(5)).with_field("data", "x".repeat(40)),
                    SendOptions::new().priority(SendPriority::Whenever),
                )
                .await
                .unwrap();
        }
        settle().await;

        let parcels = h.office.collect_parcels().await;
        assert_eq!(parcels.len(), 2);
        assert_eq!(parcels[0].parcel.message_count(), 2);
        assert_eq!(parcels[1].parcel.message_count(), 1);
        assert_eq!(parcels[0].message_ids(), vec!["m1", "m2"]);

        // Stamp carries the provider fields plus the parcel identity.
        assert_eq!(parcels[0].stamp["courier"], "fcm");
        assert_eq!(parcels[0].stamp["message_id"], parcels[0].parcel_id());
        assert_eq!(
            OutboundParcel::message_count_from_id(parcels[0].parcel_id()),
            Some(2)
        );

        // Collected messages stay queued until the send is confirmed.
        h.office.on_parcel_sent(&parcels[0]).unwrap();
        settle().await;
        let remaining = h.office.collect_parcels().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_ids(), vec!["m3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_preparation_never_reaches_the_store() {
        let h = spawn_office(PostConfig::default());
        h.office.on_registration_complete().unwrap();

        let err = h
            .office
            .send_message(&TestMessage::new("m1", MessageType(5)).failing())
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Preparation { .. }));
        settle().await;

        assert_eq!(h.scheduler.total_signals(), 0);
        assert!(h.backend.is_empty());
        assert!(h.office.collect_parcels().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_messages_survive_restart_and_flush_after_registration() {
        let backend = Arc::new(MemoryBackend::new());
        let first = spawn_office_on(PostConfig::default(), backend.clone());
        first
            .office
            .send_message(&TestMessage::new("m1", MessageType(10)))
            .await
            .unwrap();
        settle().await;
        assert_eq!(backend.len(), 1);
        drop(first);

        let second = spawn_office_on(PostConfig::default(), backend);
        settle().await;
        assert_eq!(second.scheduler.total_signals(), 0);

        second.office.on_registration_complete().unwrap();
        settle().await;
        assert_eq!(second.scheduler.signal_count(&second.sender_task), 1);

        let parcels = second.office.collect_parcels().await;
        assert_eq!(parcels.len(), 1);
        assert_eq!(parcels[0].message_ids(), vec!["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn persisting_an_ungated_message_is_downgraded_to_memory() {
        let h = spawn_office(PostConfig::default());
        h.office
            .send_message_with(
                &TestMessage::new("m1", MessageType(5)),
                SendOptions::new().requires_registration(false),
            )
            .await
            .unwrap();
        settle().await;
        assert!(h.backend.is_empty());

        // Ungated messages are eligible before registration.
        let parcels = h.office.collect_parcels().await;
        assert_eq!(parcels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_messages_are_disposed_at_collection_time() {
        let h = spawn_office(PostConfig::default());
        h.office.on_registration_complete().unwrap();
        h.office
            .send_message_with(
                &TestMessage::new("m1", MessageType(5)),
                SendOptions::new().expire_after(Duration::from_millis(0)),
            )
            .await
            .unwrap();
        h.office
            .send_message(&TestMessage::new("m2", MessageType(5)))
            .await
            .unwrap();
        settle().await;

        let parcels = h.office.collect_parcels().await;
        assert_eq!(parcels.len(), 1);
        assert_eq!(parcels[0].message_ids(), vec!["m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_parcels_fan_out_by_type() {
        let h = spawn_office(PostConfig::default());
        let mut t10 = h.office.receive_messages(MessageType(10));
        let mut t12 = h.office.receive_messages(MessageType(12));
        settle().await;

        let parcel = codec::decode_parcel(
            r#"{
                "message_id": "p1",
                "t10": {"status": 0},
                "t12": [{"topic": "a"}, {"topic": "b"}]
            }"#,
        )
        .unwrap();
        h.office.on_inbound_parcel(parcel).unwrap();
        settle().await;

        let registration = t10.try_recv().unwrap();
        assert_eq!(registration.message_id, "p1");
        assert_eq!(registration.payload["status"], 0);
        assert!(t10.try_recv().is_err());

        assert_eq!(t12.try_recv().unwrap().payload["topic"], "a");
        assert_eq!(t12.try_recv().unwrap().payload["topic"], "b");
    }

    #[tokio::test(start_paused = true)]
    async fn parse_failures_skip_single_messages() {
        #[derive(Debug, Deserialize)]
        struct TopicStatus {
            topic: String,
        }

        let h = spawn_office(PostConfig::default());
        let parser = crate::dispatch::JsonMessageParser::<TopicStatus>::new(MessageType(12));
        let mut statuses = h.office.receive_parsed(parser);
        settle().await;

        let parcel = codec::decode_parcel(
            r#"{"message_id": "p1", "t12": [{"topic": 7}, {"topic": "news"}]}"#,
        )
        .unwrap();
        h.office.on_inbound_parcel(parcel).unwrap();
        settle().await;

        // The unparseable first message is skipped, the second arrives.
        assert_eq!(statuses.try_recv().unwrap().topic, "news");
        assert!(statuses.try_recv().is_err());
    }
}
