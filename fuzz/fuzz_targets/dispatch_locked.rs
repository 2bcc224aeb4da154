//! Arbitrary request streams against a fresh controller.
//!
//! Each accepted key grants exactly one privileged request, so the handlers
//! for modes 5 and 6 can never run more often than keys were accepted, and
//! never at all without one.

#![no_main]

use aldl_core::TargetProfile;
use aldl_harness::{RecordingEcu, SimEnv, World};
use aldl_proto::{FrameDecoder, Mode, RESPONSE_OK, mode::SUBMODE_KEY_SUBMIT};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut world = World::new(TargetProfile::vy_v6(), SimEnv::with_seed(0), RecordingEcu::default());
    let mut decoder = FrameDecoder::new();
    let mut accepted = 0usize;

    for frame in decoder.feed(data).into_iter().flatten() {
        if let Some(reply) = world.send(frame)
            && reply.mode() == Some(Mode::Security)
            && reply.payload() == [SUBMODE_KEY_SUBMIT, RESPONSE_OK]
        {
            accepted += 1;
        }
    }

    let privileged = world.ecu().flash_entries + world.ecu().uploads.len();
    assert!(privileged <= accepted, "{privileged} privileged requests ran on {accepted} accepted keys");
});
