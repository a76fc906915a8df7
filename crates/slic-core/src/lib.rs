//! Signal sequencer and event dispatch core for SLIC/SLAC voice-port line
//! devices.
//!
//! A [`Device`] owns a register bus, a profile store and one [`Line`] per
//! channel. Host calls translate into register writes and short sequencer
//! programs; [`Device::poll_event`] turns the device's raw indications back
//! into [`Event`]s.

/// Status codes and error taxonomy.
pub mod error;
pub use error::{ErrorClass, ProfileError, TransportError, VpError};

/// Millisecond to sequencer-tick conversion.
pub mod timing;
pub use timing::{ms_to_ticks, ms_to_ticks_with, Ticks, MAX_DELAY_TICKS, TICK_MS};

/// Sequencer instruction word layout, control values and markers.
pub mod encoding;
pub use encoding::{
    decode_header, encode_header, GeneratorMask, Marker, Opcode, SequenceControl,
    MAX_BRANCH_COUNT, MAX_PROGRAM_LEN,
};

/// Drive states and API line states.
pub mod state;
pub use state::{DriveState, LineState, PcmCut};

/// Instruction decoding and encoding.
pub mod decoder;
pub use decoder::{decode_buffer, decode_words, encode_buffer, Instruction};

/// Validated sequencer programs and the builder used by handlers.
pub mod program;
pub use program::{Program, ProgramBuilder, ProgramKind, MAX_REPEAT_CYCLES};

/// Line signals and dial digits.
pub mod signal;
pub use signal::{Digit, Signal, SignalKind};

/// Device, line and option configuration.
pub mod config;
pub use config::{
    DeviceConfig, LineConfig, LineOption, LineOptions, OptionId, PulseMode, Termination,
};

/// Decoded events and event masks.
pub mod event;
pub use event::{Event, EventCategory, EventKind, EventMask, ResponseHandle};

/// Per-family register maps.
pub mod registers;
pub use registers::{DeviceFamily, MailboxCommand, RegisterMap};

/// Register-bus capability.
pub mod transport;
pub use transport::{CriticalSection, LineBus, RegisterBus, RegisterTarget};

/// Per-line sequencer ownership and the device-side executor model.
pub mod sequencer;
pub use sequencer::{Completion, Executor, Sequencer};

/// Profile parsing and lookup.
pub mod profile;
pub use profile::{
    load_ring_cadence, CidMode, CidParams, CidProfile, Profile, ProfileKind, ProfileLookup,
    ProfileRef, ProfileTable, ToneSetup, NO_ACK_TONE, PROFILE_VERSION,
};

/// Caller-ID message queue and FSK buffer packing.
pub mod cid;
pub use cid::{CidBuffer, CID_BUFFER_BYTES};

/// Raw indication classification and response correlation.
pub mod dispatch;
pub use dispatch::{LoopParam, RawIndication, RequestKind, ResultData};

/// Per-line state.
pub mod line;
pub use line::{Activity, Line};

mod handlers;
pub use handlers::send_cid::CidPhase;

/// The device context and host API.
pub mod device;
pub use device::{Device, MAX_LOW_LEVEL_WORDS};

/// Simulated device for tests and host bring-up.
pub mod sim;
pub use sim::SimDevice;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
