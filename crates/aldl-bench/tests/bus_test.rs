//! Scan tool against a bench responder over the simulated bus.
//!
//! The responder runs on its own thread; dropping the scan tool's end of the
//! bus ends the listener loop and hands back the controller state.

use std::{
    io::Write,
    thread::{self, JoinHandle},
    time::Duration,
};

use aldl_bench::{
    BenchEcu, BenchError, Listener, ListenerStats, ScanTool, Unlock,
    programming::{self, WATCHDOG_KERNEL},
};
use aldl_core::{BankId, TargetProfile};
use aldl_harness::{SimBus, SimEnv};
use aldl_proto::{DeviceId, DiscreteOutputs, Frame, Mode, RESPONSE_OK, RESPONSE_REJECTED};
use hex_literal::hex;

const TIMEOUT: Duration = Duration::from_millis(200);

type Responder = JoinHandle<(ListenerStats, BenchEcu)>;

fn spawn_responder(profile: TargetProfile, bus: SimBus, seed: u64) -> Responder {
    spawn_listener(profile, bus, SimEnv::with_seed(seed), false)
}

fn spawn_listener(profile: TargetProfile, bus: SimBus, env: SimEnv, echo: bool) -> Responder {
    thread::spawn(move || {
        let ecu = BenchEcu::from_profile(&profile);
        let mut listener = Listener::new(bus, profile, ecu, env).with_echo(echo);
        let stats = listener.run().unwrap();
        let (_, ecu) = listener.into_parts();
        (stats, ecu)
    })
}

fn bench(seed: u64) -> (ScanTool<SimBus>, Responder) {
    let (tool_end, ecu_end) = SimBus::pair_with_echo(TIMEOUT);
    let profile = TargetProfile::vy_v6();
    let tool = ScanTool::for_profile(tool_end, &profile).with_reply_timeout(TIMEOUT * 5);
    (tool, spawn_responder(profile, ecu_end, seed))
}

fn finish(tool: ScanTool<SimBus>, responder: Responder) -> (ListenerStats, BenchEcu) {
    drop(tool.into_inner());
    responder.join().unwrap()
}

#[test]
fn unlock_over_the_bus() {
    let (mut tool, responder) = bench(1);

    assert!(matches!(tool.unlock().unwrap(), Unlock::Unlocked { .. }));
    // Second exchange while unlocked sees the zero seed
    assert_eq!(tool.unlock().unwrap(), Unlock::AlreadyUnlocked);

    let (stats, _) = finish(tool, responder);
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.replies, 3);
    assert_eq!(stats.framing_errors, 0);
}

#[test]
fn actuate_drives_bench_outputs() {
    let (mut tool, responder) = bench(2);

    let outputs = DiscreteOutputs::FAN_HIGH | DiscreteOutputs::AC_CLUTCH;
    assert_eq!(tool.actuate(outputs).unwrap(), RESPONSE_OK);

    let (_, ecu) = finish(tool, responder);
    assert_eq!(ecu.outputs(), outputs);
    assert_eq!(ecu.port_history(), &[0x06]);
}

#[test]
fn chunked_upload_unlocks_per_chunk() {
    let (mut tool, responder) = bench(3);
    let kernel: Vec<u8> = (0..40u8).collect();

    assert_eq!(tool.upload(0x58, 0x0300, &kernel, 16).unwrap(), 3);

    let (_, ecu) = finish(tool, responder);
    let uploads = ecu.uploads();
    assert_eq!(uploads.len(), 3);
    assert_eq!(uploads[0].bank, BankId::Bank2);
    assert_eq!(uploads[1].load_addr, 0x0310);
    assert_eq!(uploads[2].data.len(), 8);
    assert_eq!(ecu.ram(0x0327), 39);
}

#[test]
fn upload_outside_ram_window_is_refused() {
    let (mut tool, responder) = bench(4);

    let err = tool.upload(0x48, 0x1000, &[0x39], 16).unwrap_err();
    assert!(matches!(err, BenchError::Rejected { mode: 0x06, code: RESPONSE_REJECTED }));

    let (_, ecu) = finish(tool, responder);
    assert!(ecu.uploads().is_empty());
}

#[test]
fn locked_flash_entry_is_refused() {
    let (mut tool, responder) = bench(5);

    let reply = tool.request(&Frame::simple(DeviceId::PcmVyV6, Mode::FlashEntry)).unwrap();
    assert_eq!(reply.payload(), &[RESPONSE_REJECTED]);

    assert_eq!(tool.enter_flash().unwrap(), vec![RESPONSE_OK]);

    let (_, ecu) = finish(tool, responder);
    assert!(ecu.in_programming());
}

#[test]
fn datastream_streams_profile_ram() {
    let (mut tool, responder) = bench(6);
    let stream = tool.datastream().unwrap();
    assert_eq!(stream.len(), TargetProfile::vy_v6().ram.len());
    finish(tool, responder);
}

#[test]
fn line_noise_is_survived() {
    let (mut tool_end, ecu_end) = SimBus::pair(TIMEOUT);
    let responder = spawn_responder(TargetProfile::vy_v6(), ecu_end, 7);

    // Bad checksum, then a short length byte, then a valid actuator request
    tool_end.write_all(&hex!("F7 57 04 01 00")).unwrap();
    tool_end.write_all(&hex!("F7 10")).unwrap();

    let mut tool = ScanTool::new(tool_end, DeviceId::PcmVyV6).with_echo(false);
    assert_eq!(tool.actuate(DiscreteOutputs::FAN_LOW).unwrap(), RESPONSE_OK);

    let (stats, ecu) = finish(tool, responder);
    assert_eq!(stats.framing_errors, 2);
    assert_eq!(ecu.outputs(), DiscreteOutputs::FAN_LOW);
}

#[test]
fn partial_frame_is_dropped_on_timeout() {
    let (mut tool_end, ecu_end) = SimBus::pair(Duration::from_millis(20));
    let responder = spawn_responder(TargetProfile::vy_v6(), ecu_end, 8);

    tool_end.write_all(&hex!("F7 58 0D")).unwrap();
    thread::sleep(Duration::from_millis(100));
    tool_end.set_timeout(TIMEOUT);

    let mut tool = ScanTool::new(tool_end, DeviceId::PcmVyV6)
        .with_echo(false)
        .with_reply_timeout(Duration::from_secs(1));
    assert!(matches!(tool.unlock().unwrap(), Unlock::Unlocked { .. }));

    let (stats, _) = finish(tool, responder);
    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.framing_errors, 0);
}

#[test]
fn silent_controller_times_out() {
    let (tool_end, _ecu_end) = SimBus::pair(Duration::from_millis(20));
    let mut tool = ScanTool::new(tool_end, DeviceId::PcmVyV6).with_echo(false);
    assert!(matches!(tool.datastream(), Err(BenchError::Timeout { mode: 0x01 })));
}

#[test]
fn responder_ignores_its_own_echo() {
    let (tool_end, ecu_end) = SimBus::single_wire(TIMEOUT);
    let responder = spawn_listener(TargetProfile::vy_v6(), ecu_end, SimEnv::with_seed(9), true);
    let mut tool = ScanTool::new(tool_end, DeviceId::PcmVyV6).with_reply_timeout(TIMEOUT * 5);

    assert_eq!(tool.actuate(DiscreteOutputs::FAN_LOW).unwrap(), RESPONSE_OK);
    assert_eq!(tool.actuate(DiscreteOutputs::FAN_HIGH).unwrap(), RESPONSE_OK);

    let (stats, ecu) = finish(tool, responder);
    assert_eq!(ecu.port_history(), &[0x01, 0x02]);
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.replies, 2);
    // Two five-byte actuator replies heard back
    assert_eq!(stats.echoed, 10);
}

#[test]
fn missing_echo_does_not_swallow_the_next_request() {
    let (tool_end, ecu_end) = SimBus::pair(TIMEOUT);
    let responder = spawn_listener(TargetProfile::vy_v6(), ecu_end, SimEnv::with_seed(10), true);
    let mut tool = ScanTool::new(tool_end, DeviceId::PcmVyV6)
        .with_echo(false)
        .with_reply_timeout(TIMEOUT * 5);

    // The second request shares its first three bytes with the first reply
    assert_eq!(tool.actuate(DiscreteOutputs::FAN_LOW).unwrap(), RESPONSE_OK);
    assert_eq!(tool.actuate(DiscreteOutputs::FAN_HIGH).unwrap(), RESPONSE_OK);

    let (stats, ecu) = finish(tool, responder);
    assert_eq!(ecu.port_history(), &[0x01, 0x02]);
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.echoed, 0);
}

#[test]
fn bus_chatter_does_not_extend_an_unlock() {
    let env = SimEnv::with_seed(11);
    let (tool_end, ecu_end) = SimBus::pair(TIMEOUT);
    let responder = spawn_listener(TargetProfile::vy_v6(), ecu_end, env.clone(), false);
    let mut tool = ScanTool::new(tool_end, DeviceId::PcmVyV6)
        .with_echo(false)
        .with_reply_timeout(TIMEOUT * 5);
    assert!(matches!(tool.unlock().unwrap(), Unlock::Unlocked { .. }));

    // A minute of body module traffic, fast enough that reads never time out
    let mut bus = tool.into_inner();
    let chatter = Frame::simple(DeviceId::Bcm, Mode::Datastream).to_bytes();
    for _ in 0..60 {
        env.advance(Duration::from_secs(1));
        bus.write_all(&chatter).unwrap();
    }

    let mut tool = ScanTool::new(bus, DeviceId::PcmVyV6)
        .with_echo(false)
        .with_reply_timeout(TIMEOUT * 5);
    let reply = tool.request(&Frame::simple(DeviceId::PcmVyV6, Mode::FlashEntry)).unwrap();
    assert_eq!(reply.payload(), &[RESPONSE_REJECTED]);

    let (stats, ecu) = finish(tool, responder);
    assert!(!ecu.in_programming());
    assert_eq!(stats.frames, 63);
    assert_eq!(stats.replies, 3);
}

#[test]
fn prepare_silences_then_restores_chatter() {
    // Nothing answers for the body module, so each of its requests waits
    // out one read timeout.
    let (mut tool, responder) = bench(12);

    programming::prepare(&mut tool).unwrap();

    let (stats, ecu) = finish(tool, responder);
    assert!(ecu.in_programming());
    assert_eq!(ecu.chatter_history(), &[false, true]);
    assert!(ecu.chatter());
    // BCM off, PCM off, seed, key, mode 5, BCM on, PCM on
    assert_eq!(stats.frames, 7);
    assert_eq!(stats.replies, 5);
}

#[test]
fn chatter_is_restored_when_the_body_fails() {
    let (mut tool, responder) = bench(13);

    let err = tool
        .with_chatter_disabled(|_| -> Result<(), BenchError> { Err(BenchError::InvalidArgument("stop".into())) })
        .unwrap_err();
    assert!(matches!(err, BenchError::InvalidArgument(_)));

    let (_, ecu) = finish(tool, responder);
    assert_eq!(ecu.chatter_history(), &[false, true]);
    assert!(!ecu.in_programming());
}

#[test]
fn watchdog_kernel_is_loaded_into_ram() {
    let (mut tool, responder) = bench(14);
    let profile = TargetProfile::vy_v6();

    let report = programming::load_kernel(&mut tool, &profile, WATCHDOG_KERNEL).unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(report.len, WATCHDOG_KERNEL.len());

    let (_, ecu) = finish(tool, responder);
    assert!(ecu.in_programming());
    assert_eq!(ecu.uploads().len(), 1);
    assert_eq!(ecu.uploads()[0].bank, BankId::Bank1);
    assert_eq!(ecu.ram(programming::KERNEL_LOAD_ADDR), WATCHDOG_KERNEL[0]);
    assert_eq!(ecu.ram(0x0300 + 41), 0xD6);
    assert_eq!(ecu.chatter_history(), &[false, true]);
}

#[test]
fn wrong_size_calibration_image_sends_nothing() {
    let (mut tool, responder) = bench(15);
    let profile = TargetProfile::vy_v6();

    let err = programming::stage_calibration(&mut tool, &profile, &[0xFF; 1024], WATCHDOG_KERNEL).unwrap_err();
    assert!(matches!(err, BenchError::InvalidArgument(_)));

    let (stats, ecu) = finish(tool, responder);
    assert_eq!(stats.frames, 0);
    assert!(ecu.uploads().is_empty());
}

#[test]
fn calibration_is_staged_behind_the_kernel() {
    let (mut tool, responder) = bench(16);
    let profile = TargetProfile::vy_v6();
    let image = vec![0x01; profile.flash.image_size];

    let stage = programming::stage_calibration(&mut tool, &profile, &image, WATCHDOG_KERNEL).unwrap();
    assert_eq!(stage.range, 0x4000..0x8000);
    // 0x4000 bytes of 0x01 wrap to zero
    assert_eq!(stage.checksum, 0x00);
    assert_eq!(stage.kernel.chunks, 1);

    let (_, ecu) = finish(tool, responder);
    assert_eq!(ecu.uploads().len(), 1);
}
