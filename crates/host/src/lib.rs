//! Local network operations against the target PC: reachability probing and
//! Wake-on-LAN.

pub mod probe;
pub mod wol;

pub use probe::{HostProber, PingProber};
pub use wol::{
    MAGIC_PACKET_SIZE, MacAddress, UdpWakeSender, WAKE_PORT, WakeSender, WolError, WolResult,
    magic_packet,
};
