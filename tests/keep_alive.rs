mod common;

use common::{Client, MockTransport, Recorder, at, connack};
use embassy_time::Duration;
use myrtio_mqtt_sync::packet::{self, Packet, PacketType, QoS};
use myrtio_mqtt_sync::{ConnectionState, MqttError, MqttOptions, SyncLoop};

const TICK_MS: u64 = 100;

fn options() -> MqttOptions<'static> {
    MqttOptions::new("keep-alive").with_keep_alive(Duration::from_secs(5))
}

#[test]
fn silent_broker_times_out_one_interval_after_ping() {
    let mut tx = [0u8; 256];
    let mut store = [0u8; 512];
    let mut rx = [0u8; 256];
    let client = Client::new(&mut tx, &mut store);
    let wire = MockTransport::new();
    client.connect(wire.clone(), &options()).unwrap();
    let mut sync = SyncLoop::new(&client, &mut rx, Recorder::default());

    sync.sync_at(at(0)).unwrap();
    assert_eq!(wire.take_kinds(), [PacketType::Connect]);
    wire.feed(&connack(false));

    let mut pings = Vec::new();
    let mut failure = None;
    for t in (TICK_MS..=12_000).step_by(TICK_MS as usize) {
        let result = sync.sync_at(at(t));
        for kind in wire.take_kinds() {
            assert_eq!(kind, PacketType::PingReq);
            pings.push(t);
        }
        if let Err(e) = result {
            failure = Some((t, e));
            break;
        }
    }

    assert_eq!(pings, [5_000]);
    assert_eq!(failure, Some((10_000, MqttError::KeepAliveTimeout)));
    assert_eq!(client.state(), ConnectionState::Error);
    assert_eq!(client.last_error(), Some(MqttError::KeepAliveTimeout));
    assert!(wire.is_closed());
}

#[test]
fn answered_pings_keep_the_connection_alive() {
    let mut tx = [0u8; 256];
    let mut store = [0u8; 512];
    let mut rx = [0u8; 256];
    let client = Client::new(&mut tx, &mut store);
    let wire = MockTransport::new();
    client.connect(wire.clone(), &options()).unwrap();
    let mut sync = SyncLoop::new(&client, &mut rx, Recorder::default());

    sync.sync_at(at(0)).unwrap();
    wire.take_written();
    wire.feed(&connack(false));

    let mut pings = Vec::new();
    for t in (TICK_MS..=30_000).step_by(TICK_MS as usize) {
        sync.sync_at(at(t)).unwrap();
        for kind in wire.take_kinds() {
            assert_eq!(kind, PacketType::PingReq);
            pings.push(t);
            wire.feed(&Packet::PingResp);
        }
    }

    assert_eq!(pings, [5_000, 10_000, 15_000, 20_000, 25_000, 30_000]);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn missing_connack_times_out() {
    let mut tx = [0u8; 256];
    let mut store = [0u8; 512];
    let mut rx = [0u8; 256];
    let client = Client::new(&mut tx, &mut store);
    let wire = MockTransport::new();
    client.connect(wire.clone(), &options()).unwrap();
    let mut sync = SyncLoop::new(&client, &mut rx, Recorder::default());

    sync.sync_at(at(0)).unwrap();
    sync.sync_at(at(4_900)).unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_eq!(sync.sync_at(at(5_000)), Err(MqttError::KeepAliveTimeout));
    assert_eq!(client.state(), ConnectionState::Error);
}

#[test]
fn outgoing_traffic_defers_pings() {
    let mut tx = [0u8; 256];
    let mut store = [0u8; 512];
    let mut rx = [0u8; 256];
    let client = Client::new(&mut tx, &mut store);
    let wire = MockTransport::new();
    client.connect(wire.clone(), &options()).unwrap();
    let mut sync = SyncLoop::new(&client, &mut rx, Recorder::default());

    sync.sync_at(at(0)).unwrap();
    wire.feed(&connack(false));
    sync.sync_at(at(TICK_MS)).unwrap();
    wire.take_written();

    for t in (1_000..=20_000).step_by(1_000) {
        client
            .publish("telemetry", b"1", QoS::AtMostOnce, false)
            .unwrap();
        sync.sync_at(at(t)).unwrap();
        assert_eq!(wire.take_kinds(), [PacketType::Publish], "at {t} ms");
    }

    // Silence again: the ping goes out one interval after the last publish.
    sync.sync_at(at(24_900)).unwrap();
    assert!(wire.take_written().is_empty());
    sync.sync_at(at(25_000)).unwrap();
    assert_eq!(wire.take_kinds(), [PacketType::PingReq]);
}

#[test]
fn zero_keep_alive_never_pings() {
    let mut tx = [0u8; 256];
    let mut store = [0u8; 512];
    let mut rx = [0u8; 256];
    let client = Client::new(&mut tx, &mut store);
    let wire = MockTransport::new();
    let options = MqttOptions::new("quiet").with_keep_alive(Duration::from_secs(0));
    client.connect(wire.clone(), &options).unwrap();
    let mut sync = SyncLoop::new(&client, &mut rx, Recorder::default());

    sync.sync_at(at(0)).unwrap();
    wire.take_written();
    wire.feed(&connack(false));
    for t in (1_000..=120_000).step_by(1_000) {
        sync.sync_at(at(t)).unwrap();
    }
    assert!(wire.take_written().is_empty());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn sub_second_keep_alive_rounds_up_to_one_second() {
    let options = MqttOptions::new("fast").with_keep_alive(Duration::from_millis(500));
    assert_eq!(options.keep_alive_secs(), 1);
    assert_eq!(
        MqttOptions::new("slow")
            .with_keep_alive(Duration::from_millis(1_001))
            .keep_alive_secs(),
        2
    );

    let mut tx = [0u8; 256];
    let mut store = [0u8; 512];
    let mut rx = [0u8; 256];
    let client = Client::new(&mut tx, &mut store);
    let wire = MockTransport::new();
    client.connect(wire.clone(), &options).unwrap();
    let mut sync = SyncLoop::new(&client, &mut rx, Recorder::default());

    sync.sync_at(at(0)).unwrap();
    let written = wire.take_written();
    match packet::decode(&written).unwrap() {
        Some((Packet::Connect(connect), _)) => assert_eq!(connect.keep_alive, 1),
        other => panic!("expected CONNECT, got {other:?}"),
    }

    wire.feed(&connack(false));
    sync.sync_at(at(TICK_MS)).unwrap();
    sync.sync_at(at(900)).unwrap();
    assert!(wire.take_written().is_empty());
    sync.sync_at(at(1_000)).unwrap();
    assert_eq!(wire.take_kinds(), [PacketType::PingReq]);
}
