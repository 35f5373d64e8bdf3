//! Core trait definitions

mod probe;
mod radio;
mod tunnel;

pub use probe::{NetworkProbe, PortalVerdict};
pub use radio::{
    ApProfile, DeviceState, Network, ProfileInspection, RadioDriver, RadioEvent, RadioStatus,
    RADIO_EVENT_CHANNEL_CAPACITY,
};
pub use tunnel::{PrimaryProvider, SecondaryProvider};
