#![no_main]

use libfuzzer_sys::fuzz_target;
use slic_core::dispatch::classify;
use slic_core::{
    decode_buffer, Device, DeviceConfig, DeviceFamily, Instruction, LineConfig, LineState,
    Profile, ProfileKind, RawIndication, SimDevice,
};

const KINDS: [ProfileKind; 5] = [
    ProfileKind::Tone,
    ProfileKind::ToneCadence,
    ProfileKind::RingCadence,
    ProfileKind::CallerId,
    ProfileKind::Metering,
];

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let words: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    let _ = Instruction::decode(words[0]);
    let _ = decode_buffer(&words);
    for kind in KINDS {
        let _ = Profile::parse(kind, data);
    }

    let mut device = Device::with_bus(SimDevice::new(DeviceFamily::Vp880, 2));
    if device
        .init_device(DeviceConfig {
            channel_count: 2,
            ..DeviceConfig::default()
        })
        .is_err()
        || device.make_line(0, LineConfig::default()).is_err()
        || device.init_line(0).is_err()
    {
        return;
    }
    let _ = device.set_line_state(0, LineState::Ringing);

    for pair in words.chunks_exact(2) {
        let raw = RawIndication {
            id: pair[0],
            param: pair[1],
        };
        let _ = classify(raw);
        device.bus_mut().inject(raw.id, raw.param);
        device.bus_mut().tick();
        while let Some(event) = device.poll_event() {
            if event.request.is_some() {
                let _ = device.get_results(&event);
            }
        }
    }
});
