//! Scenario runner tests.

use std::time::Duration;

use aldl_core::{SecurityState, TargetProfile};
use aldl_harness::Scenario;
use aldl_proto::{
    DeviceId, DiscreteOutputs, Frame, Mode, RESPONSE_OK, RESPONSE_REJECTED, requests,
};
use hex_literal::hex;
use proptest::prelude::*;

#[test]
fn unlock_then_upload() {
    let upload = requests::upload_chunk(DeviceId::PcmVyV6, 0x58, 0x0310, &[0x39]).unwrap();

    Scenario::new("unlock then upload")
        .unlock()
        .send(upload)
        .oracle(Box::new(|world| {
            let upload = world.ecu().uploads.first().ok_or("upload never reached the ECU")?;
            if upload.load_addr != 0x0310 {
                return Err(format!("wrong load address {:#06X}", upload.load_addr));
            }
            if world.session().state() != SecurityState::Locked {
                return Err("grant was not consumed".into());
            }
            Ok(())
        }))
        .run()
        .unwrap();
}

#[test]
fn cooldown_blocks_seed_requests() {
    let wrong_key = requests::key_submission(DeviceId::PcmVyV6, 0x0000);
    let seed = requests::seed_request(DeviceId::PcmVyV6);

    let mut scenario = Scenario::new("cooldown");
    for _ in 0..3 {
        scenario = scenario.send(seed.clone()).send(wrong_key.clone());
    }

    scenario
        .send(seed.clone())
        .advance(Duration::from_secs(11))
        .send(seed)
        .oracle(Box::new(|world| {
            let seeds = world.replies_for(Mode::Security.to_u8());
            // 3 seeds, 3 keys, the refused seed, the seed after the cooldown
            let refused = seeds[6].ok_or("no reply during cooldown")?;
            if refused.payload() != [0x01, RESPONSE_REJECTED] {
                return Err(format!("expected refusal, got {refused:?}"));
            }
            let fresh = seeds[7].ok_or("no reply after cooldown")?;
            if fresh.payload().len() != 3 {
                return Err(format!("expected a new seed, got {fresh:?}"));
            }
            Ok(())
        }))
        .run()
        .unwrap();
}

#[test]
fn idle_timeout_relocks_session() {
    let entry = Frame::simple(DeviceId::PcmVyV6, Mode::FlashEntry);

    Scenario::new("idle timeout")
        .unlock()
        .advance(Duration::from_secs(31))
        .send(entry)
        .oracle(Box::new(|world| {
            if world.idle_resets() != 1 {
                return Err(format!("expected one idle reset, got {}", world.idle_resets()));
            }
            match world.last_reply() {
                Some(reply) if reply.payload() == [RESPONSE_REJECTED] => Ok(()),
                other => Err(format!("expected rejection, got {other:?}")),
            }
        }))
        .run()
        .unwrap();
}

#[test]
fn actuator_drives_outputs() {
    let control = (DiscreteOutputs::FAN_LOW | DiscreteOutputs::FUEL_PUMP).control_byte();
    let request = requests::actuator(DeviceId::PcmVyV6, &[control]).unwrap();

    Scenario::new("actuator")
        .send(request)
        .oracle(Box::new(|world| {
            if world.ecu().outputs != DiscreteOutputs::FAN_LOW | DiscreteOutputs::FUEL_PUMP {
                return Err(format!("outputs {:?}", world.ecu().outputs));
            }
            match world.last_reply() {
                Some(reply) if reply.to_bytes() == hex!("F7 57 04 AA 04") => Ok(()),
                other => Err(format!("unexpected reply {other:?}")),
            }
        }))
        .run()
        .unwrap();
}

#[test]
fn datastream_reply_is_mode_one() {
    Scenario::new("datastream")
        .datastream(vec![0x10, 0x20, 0x30])
        .send(Frame::simple(DeviceId::PcmVyV6, Mode::Datastream))
        .oracle(Box::new(|world| match world.last_reply() {
            Some(reply) if reply.to_bytes() == hex!("F7 59 01 10 20 30 4F") => Ok(()),
            other => Err(format!("unexpected reply {other:?}")),
        }))
        .run()
        .unwrap();
}

#[test]
fn other_profile_ignores_vy_frames() {
    Scenario::new("holden f4 ignores 0xF7")
        .profile(TargetProfile::holden_f4())
        .send(requests::seed_request(DeviceId::PcmVyV6))
        .oracle(Box::new(|world| {
            if world.last_reply().is_some() {
                return Err("answered a frame for another module".into());
            }
            Ok(())
        }))
        .run()
        .unwrap();
}

#[test]
fn failing_oracle_reports_scenario_name() {
    let err = Scenario::new("always fails")
        .oracle(Box::new(|_| Err("nope".into())))
        .run()
        .unwrap_err();
    assert!(err.contains("always fails"));
    assert!(err.contains("nope"));
}

proptest! {
    #[test]
    fn any_seed_unlocks_and_uploads(seed in any::<u64>()) {
        let upload = requests::upload_chunk(DeviceId::PcmVyV6, 0x48, 0x0300, &[0x39]).unwrap();
        let result = Scenario::new(format!("seed {seed}"))
            .seed(seed)
            .unlock()
            .send(upload)
            .oracle(Box::new(|world| match world.last_reply() {
                Some(reply) if reply.payload() == [RESPONSE_OK] && world.ecu().uploads.len() == 1 => Ok(()),
                other => Err(format!("upload refused: {other:?}")),
            }))
            .run();
        prop_assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn unlock_lapses_only_after_the_idle_timeout(
        idle in prop_oneof![0u64..29, 31u64..300],
    ) {
        let alive = idle < 30;
        let result = Scenario::new(format!("idle {idle}s"))
            .unlock()
            .advance(Duration::from_secs(idle))
            .send(Frame::simple(DeviceId::PcmVyV6, Mode::FlashEntry))
            .oracle(Box::new(move |world| {
                let expected = if alive { RESPONSE_OK } else { RESPONSE_REJECTED };
                match world.last_reply() {
                    Some(reply) if reply.payload() == [expected] => Ok(()),
                    other => Err(format!("expected {expected:#04X}, got {other:?}")),
                }
            }))
            .run();
        prop_assert!(result.is_ok(), "{:?}", result);
    }
}
