//! Session registry and packet router
//!
//! The Doorkeeper owns the authoritative (period, sequence) pair and
//! the map of in-progress guests. It runs as a single-consumer event
//! loop: packets and guest deadline events are both processed on the
//! loop, so map mutation needs no further locking and a disposed
//! guest can never be reached through the map.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use dm_core::{Clock, ServerHallway};
use dm_protocol::{sequence, DoorbellCommand, Knock};

use crate::access::AccessController;
use crate::guest::{Guest, GuestEvent, KnockStep, Outcome};
use crate::source::{Packet, PacketSource};

/// Cadence of the opportunistic background sequence refresh.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Session deadline used in debug mode regardless of the configured
/// timeout, long enough to walk a sequence by hand.
const DEBUG_TIMEOUT: Duration = Duration::from_secs(120);

/// The session registry for one hallway.
pub struct Doorkeeper {
    name: String,
    config: ServerHallway,
    key: Vec<u8>,
    clock: Arc<dyn Clock>,
    access: Arc<dyn AccessController>,
    period: i64,
    sequence: Arc<Vec<Knock>>,
    guests: HashMap<IpAddr, Guest>,
    next_generation: u64,
    events_tx: mpsc::UnboundedSender<GuestEvent>,
    events_rx: mpsc::UnboundedReceiver<GuestEvent>,
    sequence_tx: watch::Sender<(i64, Arc<Vec<Knock>>)>,
}

impl Doorkeeper {
    /// Create a registry for one hallway and compute its initial
    /// sequence.
    pub fn new(
        name: impl Into<String>,
        config: ServerHallway,
        access: Arc<dyn AccessController>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let key = config.profile.normalized_key();
        let period = sequence::period_at(clock.now_unix(), config.profile.interval);
        let current = Arc::new(sequence::generate(&key, period, config.profile.length));
        let (sequence_tx, _) = watch::channel((period, Arc::clone(&current)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tracing::debug!("Hallway {}: initial period {}", name, period);

        Self {
            name,
            config,
            key,
            clock,
            access,
            period,
            sequence: current,
            guests: HashMap::new(),
            next_generation: 0,
            events_tx,
            events_rx,
            sequence_tx,
        }
    }

    /// Subscribe to (period, sequence) changes.
    ///
    /// Used by [`crate::listen::SocketSource`] to rebind its knock
    /// listeners when the period rolls over.
    pub fn subscribe_sequence(&self) -> watch::Receiver<(i64, Arc<Vec<Knock>>)> {
        self.sequence_tx.subscribe()
    }

    /// Number of live guests. Mostly interesting for diagnostics.
    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    /// Recompute the current period; regenerate the cached sequence
    /// if it changed. Returns the current period.
    pub fn refresh_sequence(&mut self) -> i64 {
        let current = sequence::period_at(self.clock.now_unix(), self.config.profile.interval);
        if current == self.period {
            return current;
        }

        tracing::info!("Hallway {}: period rolled over to {}", self.name, current);
        self.period = current;
        self.sequence = Arc::new(sequence::generate(&self.key, current, self.config.profile.length));
        self.sequence_tx
            .send_replace((current, Arc::clone(&self.sequence)));
        current
    }

    /// Process one observed packet.
    pub async fn handle_packet(&mut self, packet: Packet) {
        // Apply any deadline events that fired before this packet so a
        // timed-out guest is gone before the packet is routed.
        self.drain_events().await;

        if packet.port == self.config.profile.doorbell {
            self.ring(packet.source, &packet.payload).await;
        } else {
            self.dispatch(packet.source, Knock::new(packet.port, packet.protocol))
                .await;
        }
    }

    /// Drive the registry until cancellation or source exhaustion.
    pub async fn run<S: PacketSource>(mut self, mut source: S, cancel: CancellationToken) {
        tracing::info!(
            "Hallway {} watching doorbell port {}",
            self.name,
            self.config.profile.doorbell
        );

        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Hallway {} shutting down", self.name);
                    break;
                }
                event = self.events_rx.recv() => {
                    // The registry holds a sender, so recv cannot
                    // return None.
                    if let Some(event) = event {
                        self.apply_event(event).await;
                    }
                }
                packet = source.next_packet() => {
                    match packet {
                        Some(packet) => self.handle_packet(packet).await,
                        None => {
                            tracing::info!("Hallway {}: packet source closed", self.name);
                            break;
                        }
                    }
                }
                _ = refresh.tick() => {
                    self.refresh_sequence();
                }
            }
        }
    }

    /// Entry point for doorbell-port packets.
    async fn ring(&mut self, source: IpAddr, payload: &[u8]) {
        let command = match DoorbellCommand::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                // Expected noise from arbitrary traffic.
                tracing::trace!("Hallway {}: ignoring doorbell payload from {}: {}", self.name, source, e);
                return;
            }
        };

        match command {
            DoorbellCommand::Announce { period } => self.admit(source, period).await,
            DoorbellCommand::Advance => {
                if !self.config.debug {
                    return;
                }
                let step = match self.guests.get_mut(&source) {
                    Some(guest) => guest.advance(),
                    None => return,
                };
                tracing::info!("Hallway {}: force-advanced {}", self.name, source);
                if step == KnockStep::Succeeded {
                    self.remove_and_report(source, Outcome::Succeeded).await;
                }
            }
            DoorbellCommand::End => {
                if !self.config.debug {
                    return;
                }
                let ended = match self.guests.get_mut(&source) {
                    Some(guest) => guest.end(),
                    None => false,
                };
                if ended {
                    self.remove_and_report(source, Outcome::Ended).await;
                }
            }
        }
    }

    /// Validate a DOORBELL announcement and register a guest.
    async fn admit(&mut self, source: IpAddr, claimed: i64) {
        let current = self.refresh_sequence();

        let accepted = claimed == current
            || (self.config.allow_period_skew && (claimed - current).abs() == 1);
        if !accepted {
            tracing::debug!(
                "Hallway {}: rejecting doorbell from {} claiming period {} (current {})",
                self.name,
                source,
                claimed,
                current
            );
            self.report(source, Outcome::Failed).await;
            return;
        }

        // A second doorbell from an address with a live guest is an
        // idempotent no-op.
        if self.guests.contains_key(&source) {
            tracing::trace!("Hallway {}: {} already has a live guest", self.name, source);
            return;
        }

        let timeout = if self.config.debug {
            DEBUG_TIMEOUT
        } else {
            Duration::from_secs(u64::from(self.config.profile.timeout))
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let guest = Guest::new(
            source,
            generation,
            self.sequence_for(claimed),
            self.config.advance_on_failure,
            timeout,
            self.events_tx.clone(),
        );
        self.guests.insert(source, guest);
        tracing::debug!(
            "Hallway {}: admitted {} for period {}",
            self.name,
            source,
            claimed
        );
    }

    /// Route an in-sequence knock to the matching guest.
    async fn dispatch(&mut self, source: IpAddr, observed: Knock) {
        let step = match self.guests.get_mut(&source) {
            Some(guest) => guest.knock(observed),
            // No doorbell rung, or the attempt already ended.
            None => return,
        };

        match step {
            KnockStep::Progressed => {}
            KnockStep::Succeeded => self.remove_and_report(source, Outcome::Succeeded).await,
            KnockStep::Failed => self.remove_and_report(source, Outcome::Failed).await,
            // The deadline task won the terminal claim; its pending
            // event performs the removal.
            KnockStep::AlreadyTerminal => {}
        }
    }

    /// Apply pending deadline events without blocking.
    async fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event).await;
        }
    }

    async fn apply_event(&mut self, event: GuestEvent) {
        // The generation check drops a stale timeout aimed at a
        // removed guest whose address has since been re-admitted.
        let live = self
            .guests
            .get(&event.source)
            .map(|guest| guest.generation() == event.generation)
            .unwrap_or(false);
        if !live {
            return;
        }

        self.guests.remove(&event.source);
        tracing::debug!(
            "Hallway {}: guest {} timed out at knock deadline",
            self.name,
            event.source
        );
        self.report(event.source, event.outcome).await;
    }

    async fn remove_and_report(&mut self, source: IpAddr, outcome: Outcome) {
        self.guests.remove(&source);
        self.report(source, outcome).await;
    }

    /// Fire the external action for a terminal outcome. Debug mode
    /// logs the outcome instead.
    async fn report(&self, source: IpAddr, outcome: Outcome) {
        if self.config.debug {
            tracing::info!(
                "Hallway {}: {:?} for {} (debug mode, action suppressed)",
                self.name,
                outcome,
                source
            );
            return;
        }

        match outcome {
            Outcome::Succeeded => self.access.open(source).await,
            Outcome::Failed | Outcome::TimedOut | Outcome::Ended => {
                self.access.banish(source).await;
            }
        }
    }

    /// Resolve the sequence for a claimed period: the cached one when
    /// it matches, otherwise generated on demand (period skew).
    fn sequence_for(&self, claimed: i64) -> Arc<Vec<Knock>> {
        if claimed == self.period {
            Arc::clone(&self.sequence)
        } else {
            Arc::new(sequence::generate(&self.key, claimed, self.config.profile.length))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelSource;
    use dm_core::KnockProfile;
    use dm_protocol::Protocol;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    const NOW: i64 = 1_000_000;
    const INTERVAL: u32 = 60;

    #[derive(Default)]
    struct RecordingAccess {
        opens: Mutex<Vec<IpAddr>>,
        banishes: Mutex<Vec<IpAddr>>,
    }

    impl RecordingAccess {
        fn opens(&self) -> usize {
            self.opens.lock().unwrap().len()
        }

        fn banishes(&self) -> usize {
            self.banishes.lock().unwrap().len()
        }

        fn total(&self) -> usize {
            self.opens() + self.banishes()
        }
    }

    #[async_trait::async_trait]
    impl AccessController for RecordingAccess {
        async fn open(&self, source: IpAddr) {
            self.opens.lock().unwrap().push(source);
        }

        async fn banish(&self, source: IpAddr) {
            self.banishes.lock().unwrap().push(source);
        }
    }

    struct ManualClock(AtomicI64);

    impl Clock for ManualClock {
        fn now_unix(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn config() -> ServerHallway {
        ServerHallway {
            profile: KnockProfile {
                key: "hunter2".to_string(),
                interval: INTERVAL,
                length: 3,
                timeout: 5,
                doorbell: 9000,
            },
            open_command: "true".to_string(),
            close_command: None,
            close_delay: None,
            banish_command: None,
            advance_on_failure: false,
            debug: false,
            allow_period_skew: false,
        }
    }

    fn setup(config: ServerHallway) -> (Doorkeeper, Arc<RecordingAccess>, Arc<ManualClock>, i64) {
        let access = Arc::new(RecordingAccess::default());
        let clock = Arc::new(ManualClock(AtomicI64::new(NOW)));
        let keeper = Doorkeeper::new(
            "test",
            config,
            Arc::clone(&access) as Arc<dyn AccessController>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let period = sequence::period_at(NOW, INTERVAL);
        (keeper, access, clock, period)
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    fn doorbell(source: IpAddr, period: i64) -> Packet {
        Packet::datagram(
            source,
            9000,
            DoorbellCommand::Announce { period }.encode(),
        )
    }

    fn expected_sequence(period: i64) -> Vec<Knock> {
        sequence::generate(&dm_protocol::normalize_key("hunter2"), period, 3)
    }

    async fn wait_for_deadline(keeper: &mut Doorkeeper) {
        let event = keeper.events_rx.recv().await.expect("deadline event");
        keeper.apply_event(event).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sequence_opens_once() {
        let (mut keeper, access, _clock, period) = setup(config());
        let source = addr(1);

        keeper.handle_packet(doorbell(source, period)).await;
        assert_eq!(keeper.guest_count(), 1);

        for knock in expected_sequence(period) {
            keeper
                .handle_packet(Packet::knock(source, knock.port, knock.protocol))
                .await;
        }

        assert_eq!(access.opens(), 1);
        assert_eq!(access.banishes(), 0);
        assert_eq!(keeper.guest_count(), 0);

        // Further knocks from the address are no-ops.
        keeper
            .handle_packet(Packet::knock(source, 4242, Protocol::Tcp))
            .await;
        assert_eq!(access.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_knock_banishes_once() {
        let (mut keeper, access, _clock, period) = setup(config());
        let source = addr(2);
        let sequence = expected_sequence(period);

        keeper.handle_packet(doorbell(source, period)).await;
        // Wrong port for the first element.
        let wrong = if sequence[0].port == 4242 { 4243 } else { 4242 };
        keeper
            .handle_packet(Packet::knock(source, wrong, sequence[0].protocol))
            .await;

        assert_eq!(access.banishes(), 1);
        assert_eq!(keeper.guest_count(), 0);

        // Knocking on after the failure does nothing until a new
        // doorbell.
        keeper
            .handle_packet(Packet::knock(source, sequence[1].port, sequence[1].protocol))
            .await;
        assert_eq!(access.total(), 1);

        // A fresh doorbell starts a fresh attempt that can succeed.
        keeper.handle_packet(doorbell(source, period)).await;
        for knock in &sequence {
            keeper
                .handle_packet(Packet::knock(source, knock.port, knock.protocol))
                .await;
        }
        assert_eq!(access.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_on_failure_keeps_session_alive() {
        let mut cfg = config();
        cfg.advance_on_failure = true;
        let (mut keeper, access, _clock, period) = setup(cfg);
        let source = addr(3);
        let sequence = expected_sequence(period);

        keeper.handle_packet(doorbell(source, period)).await;

        // One bad knock is consumed.
        let wrong = if sequence[0].port == 4242 { 4243 } else { 4242 };
        keeper
            .handle_packet(Packet::knock(source, wrong, sequence[0].protocol))
            .await;
        assert_eq!(keeper.guest_count(), 1);
        assert_eq!(access.total(), 0);

        // One correct knock: still incomplete.
        keeper
            .handle_packet(Packet::knock(source, sequence[1].port, sequence[1].protocol))
            .await;
        assert_eq!(keeper.guest_count(), 1);
        assert_eq!(access.total(), 0);

        // Completing the remaining expected element opens.
        keeper
            .handle_packet(Packet::knock(source, sequence[2].port, sequence[2].protocol))
            .await;
        assert_eq!(access.opens(), 1);
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_banishes_once() {
        let (mut keeper, access, _clock, period) = setup(config());
        let source = addr(4);

        keeper.handle_packet(doorbell(source, period)).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        wait_for_deadline(&mut keeper).await;

        assert_eq!(access.banishes(), 1);
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_knock_racing_deadline_fires_one_callback() {
        let (mut keeper, access, _clock, period) = setup(config());
        let source = addr(5);
        let sequence = expected_sequence(period);

        keeper.handle_packet(doorbell(source, period)).await;
        keeper
            .handle_packet(Packet::knock(source, sequence[0].port, sequence[0].protocol))
            .await;
        keeper
            .handle_packet(Packet::knock(source, sequence[1].port, sequence[1].protocol))
            .await;

        // Let the deadline claim the terminal transition, then deliver
        // the final (correct) knock before the event is applied.
        tokio::time::advance(Duration::from_secs(6)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // Bypass handle_packet's event drain so the racing knock is
        // routed while the timeout event is still pending.
        keeper.dispatch(source, sequence[2]).await;

        wait_for_deadline(&mut keeper).await;
        assert_eq!(access.total(), 1, "exactly one terminal callback");
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_mismatch_rejected() {
        let (mut keeper, access, _clock, period) = setup(config());

        keeper.handle_packet(doorbell(addr(6), period + 1)).await;
        keeper.handle_packet(doorbell(addr(7), period - 1)).await;

        assert_eq!(access.banishes(), 2);
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_skew_tolerance() {
        let mut cfg = config();
        cfg.allow_period_skew = true;
        let (mut keeper, access, _clock, period) = setup(cfg);
        let source = addr(8);

        // One period behind is accepted and validated against the
        // claimed period's sequence.
        keeper.handle_packet(doorbell(source, period - 1)).await;
        assert_eq!(keeper.guest_count(), 1);
        for knock in expected_sequence(period - 1) {
            keeper
                .handle_packet(Packet::knock(source, knock.port, knock.protocol))
                .await;
        }
        assert_eq!(access.opens(), 1);

        // Two periods off is still rejected.
        keeper.handle_packet(doorbell(addr(9), period - 2)).await;
        assert_eq!(access.banishes(), 1);
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_doorbell_is_noop() {
        let (mut keeper, access, _clock, period) = setup(config());
        let source = addr(10);
        let sequence = expected_sequence(period);

        keeper.handle_packet(doorbell(source, period)).await;
        keeper
            .handle_packet(Packet::knock(source, sequence[0].port, sequence[0].protocol))
            .await;

        // Ringing again neither resets progress nor creates a second
        // guest.
        keeper.handle_packet(doorbell(source, period)).await;
        assert_eq!(keeper.guest_count(), 1);

        keeper
            .handle_packet(Packet::knock(source, sequence[1].port, sequence[1].protocol))
            .await;
        keeper
            .handle_packet(Packet::knock(source, sequence[2].port, sequence[2].protocol))
            .await;
        assert_eq!(access.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_doorbell_ignored() {
        let (mut keeper, access, _clock, _period) = setup(config());
        let source = addr(11);

        for payload in [
            &b"short"[..],
            &b"DOORBELLxyz"[..],
            &b"WHATEVER123"[..],
            &[0xff, 0xfe, 0xfd, 0xfc, 0xfb, 0xfa, 0xf9, 0xf8][..],
        ] {
            keeper
                .handle_packet(Packet::datagram(source, 9000, payload.to_vec()))
                .await;
        }

        assert_eq!(access.total(), 0);
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_address_dispatch_is_noop() {
        let (mut keeper, access, _clock, _period) = setup(config());

        keeper
            .handle_packet(Packet::knock(addr(12), 4242, Protocol::Udp))
            .await;

        assert_eq!(access.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_rollover_invalidates_old_doorbell() {
        let (mut keeper, access, clock, period) = setup(config());

        clock.0.store(NOW + i64::from(INTERVAL), Ordering::SeqCst);
        assert_eq!(keeper.refresh_sequence(), period + 1);

        // The old period is now stale.
        keeper.handle_packet(doorbell(addr(13), period)).await;
        assert_eq!(access.banishes(), 1);

        keeper.handle_packet(doorbell(addr(14), period + 1)).await;
        assert_eq!(keeper.guest_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_mode_suppresses_actions() {
        let mut cfg = config();
        cfg.debug = true;
        let (mut keeper, access, _clock, period) = setup(cfg);
        let source = addr(15);

        keeper.handle_packet(doorbell(source, period)).await;
        for knock in expected_sequence(period) {
            keeper
                .handle_packet(Packet::knock(source, knock.port, knock.protocol))
                .await;
        }

        // The outcome is logged but no action fires.
        assert_eq!(access.total(), 0);
        assert_eq!(keeper.guest_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_wire_commands() {
        let mut cfg = config();
        cfg.debug = true;
        let (mut keeper, access, _clock, period) = setup(cfg);
        let source = addr(16);

        keeper.handle_packet(doorbell(source, period)).await;

        // Three forced advances complete the length-3 sequence.
        for _ in 0..3 {
            keeper
                .handle_packet(Packet::datagram(source, 9000, DoorbellCommand::Advance.encode()))
                .await;
        }
        assert_eq!(keeper.guest_count(), 0);
        assert_eq!(access.total(), 0);

        // ENDKNOCK force-disposes a fresh guest.
        keeper.handle_packet(doorbell(source, period)).await;
        keeper
            .handle_packet(Packet::datagram(source, 9000, DoorbellCommand::End.encode()))
            .await;
        assert_eq!(keeper.guest_count(), 0);
        assert_eq!(access.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_commands_ignored_outside_debug_mode() {
        let (mut keeper, _access, _clock, period) = setup(config());
        let source = addr(17);

        keeper.handle_packet(doorbell(source, period)).await;
        keeper
            .handle_packet(Packet::datagram(source, 9000, DoorbellCommand::End.encode()))
            .await;

        assert_eq!(keeper.guest_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_mode_stretches_timeout() {
        let mut cfg = config();
        cfg.debug = true;
        let (mut keeper, access, _clock, period) = setup(cfg);
        let source = addr(18);

        keeper.handle_packet(doorbell(source, period)).await;

        // Past the configured 5 s timeout but inside the debug window.
        tokio::time::advance(Duration::from_secs(30)).await;
        keeper.drain_events().await;
        assert_eq!(keeper.guest_count(), 1);

        tokio::time::advance(Duration::from_secs(100)).await;
        wait_for_deadline(&mut keeper).await;
        assert_eq!(keeper.guest_count(), 0);
        assert_eq!(access.total(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_knock_and_deadline_race_many_trials() {
        // Fire the final knock and the deadline at nearly the same
        // instant, repeatedly; whichever path wins, exactly one
        // terminal callback must fire.
        for trial in 0u64..25 {
            let mut cfg = config();
            cfg.profile.timeout = 1;
            let (keeper, access, _clock, period) = setup(cfg);
            let source = addr(20);
            let sequence = expected_sequence(period);

            let (tx, channel_source) = ChannelSource::new(16);
            let cancel = CancellationToken::new();
            let task = tokio::spawn(keeper.run(channel_source, cancel.clone()));

            tx.send(doorbell(source, period)).await.unwrap();
            tx.send(Packet::knock(source, sequence[0].port, sequence[0].protocol))
                .await
                .unwrap();
            tx.send(Packet::knock(source, sequence[1].port, sequence[1].protocol))
                .await
                .unwrap();

            // Land the final knock around the 1 s deadline, jittered
            // across trials to sweep both sides of the race.
            let jitter = Duration::from_millis(990 + (trial % 3) * 10);
            tokio::time::sleep(jitter).await;
            tx.send(Packet::knock(source, sequence[2].port, sequence[2].protocol))
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
            task.await.unwrap();

            assert_eq!(
                access.total(),
                1,
                "trial {}: expected exactly one terminal callback",
                trial
            );
        }
    }
}
