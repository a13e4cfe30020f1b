use gpumc_cmdq::{
    loopback, CommandHeader, EventKind, HostEndpoint, QueueId, QueueRegisters, Transport,
    TransportConfig, UnitHandler, UnitId, UnitTask, WakeOutcome,
};
use std::time::Duration;

fn setup(config: TransportConfig) -> (Transport, HostEndpoint) {
    let _ = env_logger::builder().is_test(true).try_init();
    loopback(config).unwrap()
}

struct Echo;

impl UnitHandler for Echo {
    fn handle(&mut self, _header: &CommandHeader, payload: &[u8]) -> Vec<u8> {
        payload.iter().rev().copied().collect()
    }
}

#[test]
fn routable_command_reaches_inbox_and_is_reclaimed_by_the_unit() {
    let (mut transport, mut host) = setup(TransportConfig::default());
    let rx = transport.register_unit(UnitId(7), "therm", None).unwrap();
    let dispatcher = transport.dispatcher();

    let seq = host.submit(UnitId(7), &[1, 2, 3, 4]).unwrap();
    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Drained(1));
    assert_eq!(transport.queue().last_handled(), host.command_regs().read_head());
    assert!(host.command_in_flight(), "nobody has acknowledged it yet");

    let envelope = rx.try_recv().expect("envelope forwarded");
    assert_eq!(envelope.event_kind, EventKind::Command);

    let mut task = UnitTask::new(
        rx,
        transport.queue().clone(),
        transport.responses().clone(),
        Echo,
    );
    task.handle_envelope(envelope).unwrap();
    assert!(!host.command_in_flight());

    let resp = host.poll_response().unwrap().unwrap();
    assert_eq!(resp.unit_id, UnitId(7));
    assert_eq!(resp.seq_num_id, seq);
    assert_eq!(resp.payload, vec![4, 3, 2, 1]);
    assert_eq!(transport.stats().snapshot().dispatched, 1);
}

#[test]
fn inbox_order_matches_ring_order() {
    let (mut transport, mut host) = setup(TransportConfig::default());
    let rx = transport.register_unit(UnitId(7), "therm", Some(16)).unwrap();
    let dispatcher = transport.dispatcher();

    let mut seqs = Vec::new();
    for i in 0..6u8 {
        seqs.push(host.stage(UnitId(7), &[i; 4]).unwrap().0);
    }
    host.publish();
    dispatcher.on_wake().unwrap();

    let window = transport.window();
    let delivered: Vec<u16> = rx
        .drain()
        .into_iter()
        .map(|env| window.read_header(env.command).unwrap().seq_num_id)
        .collect();
    assert_eq!(delivered, seqs);
}

#[test]
fn administrative_commands_are_answered_once_and_never_forwarded() {
    let (mut transport, mut host) = setup(TransportConfig::default());
    let rx = transport.register_unit(UnitId(7), "therm", None).unwrap();
    let dispatcher = transport.dispatcher();

    let null_seq = host.submit(UnitId::NULL, &[]).unwrap();
    let unload_seq = host.submit(UnitId::UNLOAD, &[0xAB; 4]).unwrap();
    let unrouted_seq = host.submit(UnitId(42), &[0xCD; 12]).unwrap();
    dispatcher.on_wake().unwrap();

    assert!(rx.try_recv().is_none());
    assert!(!host.command_in_flight(), "short-circuited commands are swept directly");

    let mut responses = Vec::new();
    while let Some(resp) = host.poll_response().unwrap() {
        responses.push(resp);
    }
    let tags: Vec<_> = responses.iter().map(|r| (r.unit_id, r.seq_num_id)).collect();
    assert_eq!(
        tags,
        vec![
            (UnitId::NULL, null_seq),
            (UnitId::UNLOAD, unload_seq),
            (UnitId(42), unrouted_seq)
        ]
    );
    assert!(responses.iter().all(|r| r.payload.is_empty()));
    assert_eq!(transport.stats().snapshot().short_circuited, 3);
}

#[test]
fn spurious_wake_only_rearms() {
    let (transport, mut host) = setup(TransportConfig::default());
    let dispatcher = transport.dispatcher();
    let regs = host.command_regs().clone();

    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Spurious);
    assert!(regs.is_armed());
    assert_eq!(regs.read_tail(), 0x1000);
    assert!(regs.tail_history().is_empty());
    assert_eq!(transport.queue().last_handled(), 0x1000);
    assert!(host.poll_response().unwrap().is_none());
    assert_eq!(transport.stats().snapshot(), Default::default());

    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Spurious);
    assert_eq!(regs.arm_count(), 2);
    assert_eq!(regs.notifier_writes(), 2, "never disarmed");
}

#[test]
fn command_published_while_disarmed_is_still_drained() {
    let (transport, mut host) = setup(TransportConfig::default());
    let dispatcher = transport.dispatcher();

    // Notifier never armed: the head write raises nothing.
    host.submit(UnitId::NULL, &[]).unwrap();
    assert!(!transport.notifier().is_raised(QueueId(0)));
    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Drained(1));
    assert!(host.command_regs().is_armed());

    // Armed now, so the next publish signals.
    host.submit(UnitId::NULL, &[]).unwrap();
    assert!(!host.command_regs().is_armed(), "signal consumed the arm");
    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Drained(1));
}

#[test]
fn full_inbox_with_send_timeout_synthesizes_a_response() {
    let config = TransportConfig {
        inbox_send_timeout_ms: Some(10),
        ..TransportConfig::default()
    };
    let (mut transport, mut host) = setup(config);
    let rx = transport.register_unit(UnitId(7), "therm", Some(1)).unwrap();
    let dispatcher = transport.dispatcher();

    host.stage(UnitId(7), &[1; 4]).unwrap();
    let (dropped_seq, _) = host.stage(UnitId(7), &[2; 4]).unwrap();
    host.publish();
    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Drained(2));

    let resp = host.poll_response().unwrap().unwrap();
    assert_eq!(resp.seq_num_id, dropped_seq);
    assert!(resp.payload.is_empty());
    assert_eq!(transport.stats().snapshot().routing_errors, 1);

    // Acked out of order: still waiting behind the first command.
    assert!(host.command_in_flight());

    let envelope = rx.try_recv().unwrap();
    let mut task = UnitTask::new(
        rx,
        transport.queue().clone(),
        transport.responses().clone(),
        Echo,
    );
    task.handle_envelope(envelope).unwrap();
    assert!(!host.command_in_flight(), "one sweep frees both");
}

#[test]
fn disconnected_inbox_is_a_routing_error_not_a_halt() {
    let (mut transport, mut host) = setup(TransportConfig::default());
    let rx = transport.register_unit(UnitId(7), "therm", None).unwrap();
    drop(rx);
    let dispatcher = transport.dispatcher();

    let seq = host.submit(UnitId(7), &[0; 4]).unwrap();
    dispatcher.on_wake().unwrap();

    assert_eq!(host.poll_response().unwrap().unwrap().seq_num_id, seq);
    assert!(!host.command_in_flight());
    assert!(!transport.queue().is_desynchronized());
    assert_eq!(transport.stats().snapshot().routing_errors, 1);
}

#[test]
fn rewind_decoded_by_the_dispatcher_is_counted_and_swept() {
    let mut config = TransportConfig::default();
    config.command_queue.size = 0x40;
    let (transport, mut host) = setup(config);
    let dispatcher = transport.dispatcher();

    for _ in 0..2 {
        host.submit(UnitId::NULL, &[0; 16]).unwrap();
        dispatcher.on_wake().unwrap();
    }
    host.submit(UnitId::NULL, &[0; 16]).unwrap();
    assert_eq!(dispatcher.on_wake().unwrap(), WakeOutcome::Drained(2));

    let stats = transport.stats().snapshot();
    assert_eq!(stats.rewinds, 1);
    assert_eq!(stats.short_circuited, 3);
    assert!(!host.command_in_flight());
    assert_eq!(host.command_regs().read_tail(), 0x1018);
}

#[test]
fn setup_timeout_is_fatal() {
    let (transport, _host) = setup(TransportConfig::default());
    let dispatcher = transport.dispatcher();
    let err = dispatcher
        .run(transport.gate(), Duration::from_millis(20))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("setup failed"));
}

#[test]
fn misplaced_rewind_halts_the_wake_handler() {
    let (transport, mut host) = setup(TransportConfig::default());
    let dispatcher = transport.dispatcher();

    host.stage_header(&CommandHeader::rewind(), &[]).unwrap();
    host.stage(UnitId::NULL, &[]).unwrap();
    host.publish();

    let err = dispatcher.on_wake().unwrap_err();
    assert!(err.is_fatal());
    assert!(transport.queue().is_desynchronized());
    assert_eq!(transport.stats().snapshot().rewinds, 0);
    assert!(host.poll_response().unwrap().is_none());
}
