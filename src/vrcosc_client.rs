use std::net::{SocketAddr, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::error::OscError;
use crate::heartrate_measurement::HeartRateMeasurement;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

fn get_timetag() -> Result<OscTime, OscError> {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| OscError::TimeOutOfRange)?;

    let seconds = u32::try_from(since_unix.as_secs() + NTP_UNIX_OFFSET_SECS)
        .map_err(|_| OscError::TimeOutOfRange)?;
    let fractional = ((u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000) as u32;

    Ok(OscTime { seconds, fractional })
}

fn message(path: &str, value: OscType) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: path.to_string(),
        args: vec![value],
    })
}

/// Forwards measurements to VRChat avatar parameters over OSC.
pub struct VRCOSCClient {
    socket: UdpSocket,
    hr_flip_flop: bool,
}

impl VRCOSCClient {
    pub fn new(addr: &SocketAddr) -> Result<Self, OscError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;

        Ok(VRCOSCClient {
            socket,
            hr_flip_flop: false,
        })
    }

    pub fn send_heartrate(&mut self, measurement: &HeartRateMeasurement) -> Result<(), OscError> {
        self.hr_flip_flop = !self.hr_flip_flop;
        let packet = heartrate_bundle(measurement, self.hr_flip_flop, get_timetag()?);
        self.send(&packet)
    }

    /// Clears the connected flag once the stream of measurements ends.
    pub fn send_disconnected(&mut self) -> Result<(), OscError> {
        let packet = OscPacket::Bundle(OscBundle {
            timetag: get_timetag()?,
            content: vec![message("/avatar/parameters/isHRConnected", OscType::Bool(false))],
        });
        self.send(&packet)
    }

    fn send(&self, packet: &OscPacket) -> Result<(), OscError> {
        let bytes = encoder::encode(packet)?;
        self.socket.send(&bytes)?;
        Ok(())
    }
}

fn heartrate_bundle(measurement: &HeartRateMeasurement, beat_toggle: bool, timetag: OscTime) -> OscPacket {
    let hr = i32::from(measurement.heart_rate);
    let rr = i32::try_from(measurement.average_rr_interval_ms()).unwrap_or(i32::MAX);

    OscPacket::Bundle(OscBundle {
        timetag,
        content: vec![
            message("/avatar/parameters/HR", OscType::Int(hr)),
            message("/avatar/parameters/onesHR", OscType::Int(hr % 10)),
            message("/avatar/parameters/tensHR", OscType::Int(hr % 100 / 10)),
            message("/avatar/parameters/hundredsHR", OscType::Int(hr / 100)),
            message("/avatar/parameters/floatHR", OscType::Float(hr as f32 / 255.0 * 2.0 - 1.0)),
            message("/avatar/parameters/isHRBeat", OscType::Bool(true)),
            message("/avatar/parameters/HeartBeatToggle", OscType::Bool(beat_toggle)),
            message("/avatar/parameters/isHRConnected", OscType::Bool(true)),
            message("/avatar/parameters/RRInterval", OscType::Int(rr)),
        ],
    })
}
