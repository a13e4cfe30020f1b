use gpumc_cmdq::{loopback, QueueRegisters, TransportConfig, TransportError, UnitId};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn small_response_ring() -> TransportConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = TransportConfig::default();
    config.response_queue.size = 0x40;
    config
}

#[test]
fn responses_come_back_in_post_order() {
    let (transport, mut host) = loopback(TransportConfig::default()).unwrap();
    let responses = transport.responses();
    responses.post(UnitId(7), 10, &[1, 2, 3]).unwrap();
    responses.post(UnitId(8), 11, &[]).unwrap();

    let first = host.poll_response().unwrap().unwrap();
    assert_eq!((first.unit_id, first.seq_num_id, first.payload), (UnitId(7), 10, vec![1, 2, 3]));
    let second = host.poll_response().unwrap().unwrap();
    assert_eq!((second.unit_id, second.seq_num_id), (UnitId(8), 11));
    assert!(host.poll_response().unwrap().is_none());
}

#[test]
fn try_post_refuses_a_full_ring() {
    let (transport, mut host) = loopback(small_response_ring()).unwrap();
    let responses = transport.responses();

    responses.post(UnitId(7), 1, &[0; 16]).unwrap();
    responses.post(UnitId(7), 2, &[0; 16]).unwrap();
    assert!(matches!(
        responses.try_post(UnitId(7), 3, &[0; 16]),
        Err(TransportError::QueueFull { needed: 0x18, .. })
    ));

    let stats = transport.stats().snapshot();
    assert_eq!(stats.responses_posted, 2);
    assert_eq!(stats.responses_dropped, 1);

    assert_eq!(host.poll_response().unwrap().unwrap().seq_num_id, 1);
    assert_eq!(host.poll_response().unwrap().unwrap().seq_num_id, 2);
}

#[test]
fn post_waits_for_the_host_to_free_space() {
    let (transport, mut host) = loopback(small_response_ring()).unwrap();
    let responses = transport.responses().clone();
    responses.post(UnitId(7), 1, &[0; 16]).unwrap();
    responses.post(UnitId(7), 2, &[0; 16]).unwrap();

    let poster = thread::spawn(move || responses.post(UnitId(7), 3, &[0xEE; 16]));
    thread::sleep(Duration::from_millis(20));
    assert!(!poster.is_finished(), "post returned while the ring was full");

    let mut seqs = Vec::new();
    while seqs.len() < 3 {
        let resp = host.wait_response(WAIT).unwrap().expect("response");
        seqs.push(resp.seq_num_id);
    }
    poster.join().unwrap().unwrap();

    assert_eq!(seqs, vec![1, 2, 3]);
    let stats = transport.stats().snapshot();
    assert_eq!(stats.responses_posted, 3);
    assert_eq!(stats.responses_dropped, 0);
}

#[test]
fn post_gives_up_after_the_post_timeout() {
    let mut config = small_response_ring();
    config.response_post_timeout_ms = Some(10);
    let (transport, _host) = loopback(config).unwrap();
    let responses = transport.responses();

    responses.post(UnitId(7), 1, &[0; 16]).unwrap();
    responses.post(UnitId(7), 2, &[0; 16]).unwrap();
    assert!(matches!(
        responses.post(UnitId(7), 3, &[0; 16]),
        Err(TransportError::QueueFull { .. })
    ));
    assert_eq!(transport.stats().snapshot().responses_dropped, 1);
}

#[test]
fn closing_releases_a_blocked_poster() {
    let (transport, _host) = loopback(small_response_ring()).unwrap();
    let responses = transport.responses().clone();
    responses.post(UnitId(7), 1, &[0; 16]).unwrap();
    responses.post(UnitId(7), 2, &[0; 16]).unwrap();

    let poster = thread::spawn(move || responses.post(UnitId(7), 3, &[0; 16]));
    thread::sleep(Duration::from_millis(10));
    transport.responses().close();

    assert!(matches!(
        poster.join().unwrap(),
        Err(TransportError::QueueFull { .. })
    ));
}

#[test]
fn producer_wraps_with_a_rewind_marker() {
    let (transport, mut host) = loopback(small_response_ring()).unwrap();
    let responses = transport.responses();
    let regs = host.response_regs().clone();

    responses.post(UnitId(7), 1, &[0; 16]).unwrap();
    responses.post(UnitId(7), 2, &[0; 16]).unwrap();
    host.poll_response().unwrap().unwrap();
    host.poll_response().unwrap().unwrap();
    assert_eq!(regs.read_tail(), 0x1430);

    responses.post(UnitId(7), 3, &[0xEE; 16]).unwrap();
    assert_eq!(regs.read_head(), 0x1418, "record placed at the ring base");

    let wrapped = host.poll_response().unwrap().unwrap();
    assert_eq!(wrapped.seq_num_id, 3);
    assert_eq!(wrapped.payload, vec![0xEE; 16]);
    assert_eq!(regs.read_tail(), 0x1418);
}

#[test]
fn oversized_response_is_refused() {
    let (transport, _host) = loopback(small_response_ring()).unwrap();
    assert!(transport.responses().post(UnitId(7), 1, &[0; 0x40]).is_err());
    assert_eq!(transport.stats().snapshot().responses_dropped, 1);
}
