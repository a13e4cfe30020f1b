use gpumc_cmdq::router::{
    encode_get_status, encode_set, BoardObject, ByteReader, ClassEntry, ClassError,
    ClassResponse, ClassStatus, ClassTable, ClassUnit, ObjMask, ObjectGroup, SetEntry,
};
use gpumc_cmdq::{loopback, CommandHeader, HostEndpoint, TransportConfig, TransportError, UnitId};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn echo_unit_round_trips_through_several_wraps() {
    init_logging();
    let (mut transport, mut host) = loopback(TransportConfig::default()).unwrap();
    transport
        .spawn_unit(UnitId(7), "echo", |_: &CommandHeader, payload: &[u8]| payload.to_vec())
        .unwrap();
    let running = transport.start().unwrap();

    for i in 0..64u32 {
        let payload: Vec<u8> = (0..(i % 20) as u8).collect();
        let seq = host.submit(UnitId(7), &payload).unwrap();

        let resp = host.wait_response(WAIT).unwrap().expect("response");
        assert_eq!(resp.seq_num_id, seq);
        assert_eq!(resp.payload, payload);
        assert!(host.wait_drained(WAIT), "command {} never reclaimed", i);
    }

    let stats = running.shutdown().unwrap();
    assert_eq!(stats.dispatched, 64);
    assert_eq!(stats.responses_posted, 64);
    assert!(stats.rewinds >= 1, "64 commands must wrap a 1 KiB ring");
    assert_eq!(stats.swept, 64 + stats.rewinds);
}

#[test]
fn administrative_traffic_needs_no_units() {
    init_logging();
    let (transport, mut host) = loopback(TransportConfig::default()).unwrap();
    let running = transport.start().unwrap();

    let seq = host.submit(UnitId::NULL, &[]).unwrap();
    let resp = host.wait_response(WAIT).unwrap().expect("response");
    assert_eq!((resp.unit_id, resp.seq_num_id), (UnitId::NULL, seq));
    assert!(host.wait_drained(WAIT));

    assert_eq!(running.shutdown().unwrap().short_circuited, 1);
}

#[test]
fn every_administrative_command_is_answered_through_a_small_response_ring() {
    init_logging();
    let mut config = TransportConfig::default();
    config.response_queue.size = 0x40;
    let (transport, mut host) = loopback(config).unwrap();
    let running = transport.start().unwrap();

    // Far more answers than the response ring holds at once.
    let submitted: Vec<u16> = (0..40)
        .map(|_| host.submit(UnitId::NULL, &[]).unwrap())
        .collect();

    let mut answered = Vec::new();
    while answered.len() < submitted.len() {
        let resp = host.wait_response(WAIT).unwrap().expect("response");
        assert_eq!(resp.unit_id, UnitId::NULL);
        answered.push(resp.seq_num_id);
    }
    assert_eq!(answered, submitted);
    assert!(host.wait_drained(WAIT));
    assert!(host.poll_response().unwrap().is_none());

    let stats = running.shutdown().unwrap();
    assert_eq!(stats.short_circuited, 40);
    assert_eq!(stats.responses_posted, 40);
    assert_eq!(stats.responses_dropped, 0);
}

#[test]
fn desync_halts_the_dispatcher_only() {
    init_logging();
    let (transport, mut host) = loopback(TransportConfig::default()).unwrap();
    let running = transport.start().unwrap();

    let bogus = CommandHeader {
        size: 2,
        ..CommandHeader::new(UnitId(7), 1, 0)
    };
    host.stage_header(&bogus, &[]).unwrap();
    host.publish();

    let deadline = Instant::now() + WAIT;
    while !running.dispatcher_finished() {
        assert!(Instant::now() < deadline, "dispatcher kept running");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(running.queue().is_desynchronized());
    assert!(matches!(running.shutdown(), Err(TransportError::Desync { .. })));
}

#[derive(Debug, Clone)]
struct Sensor {
    period_ms: u16,
    reading: i16,
}

impl BoardObject for Sensor {
    fn construct(_obj_type: u8, body: &[u8]) -> Result<Self, ClassError> {
        let mut r = ByteReader::new(body);
        let sensor = Sensor {
            period_ms: r.u16()?,
            reading: r.i16()?,
        };
        r.finish()?;
        Ok(sensor)
    }

    fn update(&mut self, obj_type: u8, body: &[u8]) -> Result<(), ClassError> {
        let next = Self::construct(obj_type, body)?;
        if next.period_ms != self.period_ms {
            return Err(ClassError::Immutable {
                index: None,
                field: "period_ms",
            });
        }
        self.reading = next.reading;
        Ok(())
    }

    fn write_status(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.reading.to_le_bytes());
    }
}

struct Board {
    sensors: ObjectGroup<Sensor>,
}

fn set_sensors(board: &mut Board, payload: &[u8]) -> Result<(), ClassError> {
    board.sensors.apply_set(payload)
}

fn sensor_status(board: &Board, mask: ObjMask, out: &mut Vec<u8>) -> Result<(), ClassError> {
    board.sensors.get_status(mask, out)
}

static CLASSES: [ClassEntry<Board>; 1] = [ClassEntry {
    class_id: 1,
    set: set_sensors,
    get_status: sensor_status,
}];
static BOARD: ClassTable<Board> = ClassTable::new(&CLASSES);

fn sensor_body(period_ms: u16, reading: i16) -> Vec<u8> {
    let mut body = period_ms.to_le_bytes().to_vec();
    body.extend_from_slice(&reading.to_le_bytes());
    body
}

#[test]
fn class_unit_applies_set_and_get_status() {
    init_logging();
    let (mut transport, mut host) = loopback(TransportConfig::default()).unwrap();
    let board = Board {
        sensors: ObjectGroup::new(1),
    };
    transport
        .spawn_unit(UnitId(9), "board", ClassUnit::new(&BOARD, board))
        .unwrap();
    let running = transport.start().unwrap();

    let request = |host: &mut HostEndpoint, bytes: Vec<u8>| {
        host.submit(UnitId(9), &bytes).unwrap();
        let resp = host.wait_response(WAIT).unwrap().expect("response");
        ClassResponse::decode(&resp.payload).unwrap()
    };

    let (a, b) = (sensor_body(100, 21), sensor_body(250, -4));
    let set = encode_set(
        1,
        1,
        0,
        &[
            SetEntry { index: None, obj_type: 0, body: &a },
            SetEntry { index: None, obj_type: 0, body: &b },
        ],
    );
    assert_eq!(request(&mut host, set).status, ClassStatus::Ok);

    let status = request(&mut host, encode_get_status(1, 0b11));
    assert_eq!(status.status, ClassStatus::Ok);
    let (mask, records) = status.status_records().unwrap();
    assert_eq!(mask, 0b11);
    assert_eq!(records, &[21, 0, 0xFC, 0xFF][..]);

    let changed_period = sensor_body(120, 30);
    let rejected = encode_set(
        1,
        1,
        0,
        &[SetEntry { index: Some(0), obj_type: 0, body: &changed_period }],
    );
    assert_eq!(request(&mut host, rejected).status, ClassStatus::Immutable);

    assert_eq!(
        request(&mut host, encode_get_status(1, 0b100)).status,
        ClassStatus::InvalidMask
    );
    assert_eq!(
        request(&mut host, encode_get_status(3, 0b1)).status,
        ClassStatus::UnknownClass
    );

    assert!(host.wait_drained(WAIT));
    assert_eq!(running.shutdown().unwrap().dispatched, 5);
}
