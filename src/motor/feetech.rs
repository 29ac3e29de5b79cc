// Feetech STS3215 serial protocol
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status reply:  [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]
//
// A swerve module uses two servos on the shared bus: one in velocity mode
// for the wheel and one in position mode for the azimuth.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default serial configuration for Feetech servos
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 5;

/// Encoder resolution: one output revolution
pub const STEPS_PER_REVOLUTION: u16 = 4096;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Register addresses used by the drive
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    ModelNumber = 3,      // 2 bytes, read-only
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity
    TorqueEnable = 40,    // 1 byte
    GoalPosition = 42,    // 2 bytes
    GoalVelocity = 46,    // 2 bytes, sign-magnitude
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, read-only
    PresentVelocity = 58, // 2 bytes, read-only, sign-magnitude
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Servo bus - one serial port shared by every servo on the chassis
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet and return its parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id: expected_id }
            } else {
                FeetechError::Io(e)
            }
        })?;

        let length = head[3] as usize;
        let mut packet = Vec::with_capacity(4 + length);
        packet.extend_from_slice(&head);
        packet.resize(4 + length, 0);
        self.port.read_exact(&mut packet[4..])?;

        parse_status(expected_id, &packet)
    }

    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = build_packet(id, instruction, params);
        self.send_packet(&packet)?;
        self.read_response(id)
    }

    /// Ping a servo; `Ok(false)` means nothing answered
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to servo {}: reg={:?}, value={}", id, register, value);
        self.transact(id, Instruction::Write, &[register as u8, value])?;
        Ok(())
    }

    /// Write two bytes (little-endian)
    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, lo, hi])?;
        Ok(())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 1])?;
        response
            .first()
            .copied()
            .ok_or_else(|| FeetechError::InvalidResponse {
                id,
                reason: "Empty read response".to_string(),
            })
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 2])?;
        match response.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", response.len()),
            }),
        }
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Set operating mode (torque must be disabled first)
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Goal velocity in steps/s (velocity mode)
    pub fn set_velocity(&mut self, id: u8, velocity: i16) -> Result<()> {
        self.write_u16(id, Register::GoalVelocity, encode_sign_magnitude(velocity))
    }

    pub fn get_velocity(&mut self, id: u8) -> Result<i16> {
        let raw = self.read_u16(id, Register::PresentVelocity)?;
        Ok(decode_sign_magnitude(raw))
    }

    /// Goal position in steps, 0..4095 (position mode)
    pub fn set_position(&mut self, id: u8, steps: u16) -> Result<()> {
        self.write_u16(id, Register::GoalPosition, steps % STEPS_PER_REVOLUTION)
    }

    /// Present single-turn position in steps, 0..4095
    pub fn get_position(&mut self, id: u8) -> Result<u16> {
        let raw = self.read_u16(id, Register::PresentPosition)?;
        Ok(raw % STEPS_PER_REVOLUTION)
    }

    pub fn model_number(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::ModelNumber)
    }
}

/// Checksum over everything after the header
fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    !(sum as u8)
}

fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let length = (params.len() + 2) as u8; // instruction + params + checksum
    let mut packet = Vec::with_capacity(6 + params.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    packet.push(checksum(&packet[2..]));

    packet
}

/// Validate a complete status packet and return its parameters
fn parse_status(expected_id: u8, packet: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: String| FeetechError::InvalidResponse {
        id: expected_id,
        reason,
    };

    if packet.len() < 6 {
        return Err(invalid(format!("Packet too short: {} bytes", packet.len())));
    }
    if packet[..2] != HEADER {
        return Err(invalid(format!("Invalid header: {:02X?}", &packet[..2])));
    }

    let id = packet[2];
    if id != expected_id {
        return Err(invalid(format!(
            "ID mismatch: expected {}, got {}",
            expected_id, id
        )));
    }

    let length = packet[3] as usize;
    if packet.len() != 4 + length {
        return Err(invalid(format!(
            "Length field {} does not match {} bytes",
            length,
            packet.len()
        )));
    }

    let (body, received_checksum) = packet.split_at(packet.len() - 1);
    if checksum(&body[2..]) != received_checksum[0] {
        return Err(FeetechError::ChecksumMismatch { id });
    }

    let status = packet[4];
    if status != 0 {
        return Err(FeetechError::ServoError { id, status });
    }

    Ok(body[5..].to_vec())
}

/// Bit 15 = sign (1 = negative), Bits 0-14 = magnitude
fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_packet(id: u8, status: u8, params: &[u8]) -> Vec<u8> {
        let mut packet = vec![0xFF, 0xFF, id, (params.len() + 2) as u8, status];
        packet.extend_from_slice(params);
        let sum = checksum(&packet[2..]);
        packet.push(sum);
        packet
    }

    #[test]
    fn test_checksum() {
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(checksum(&[1u8, 4, 0x03, 30, 0, 2]), 215);
    }

    #[test]
    fn test_build_read_position_packet() {
        let packet = build_packet(6, Instruction::Read, &[Register::PresentPosition as u8, 2]);
        assert_eq!(packet[..6], [0xFF, 0xFF, 6, 4, 0x02, 56]);
        assert_eq!(packet[6], 2);
        assert_eq!(packet[7], checksum(&[6, 4, 0x02, 56, 2]));
    }

    #[test]
    fn test_parse_position_reply() {
        let packet = status_packet(6, 0, &[0x00, 0x08]);
        assert_eq!(parse_status(6, &packet).unwrap(), vec![0x00, 0x08]);
    }

    #[test]
    fn test_parse_rejects_wrong_id() {
        let packet = status_packet(5, 0, &[]);
        assert!(matches!(
            parse_status(6, &packet),
            Err(FeetechError::InvalidResponse { id: 6, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut packet = status_packet(2, 0, &[0x10, 0x00]);
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;
        assert!(matches!(
            parse_status(2, &packet),
            Err(FeetechError::ChecksumMismatch { id: 2 })
        ));
    }

    #[test]
    fn test_parse_reports_servo_error() {
        let packet = status_packet(3, 0x20, &[]);
        assert!(matches!(
            parse_status(3, &packet),
            Err(FeetechError::ServoError { id: 3, status: 0x20 })
        ));
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(encode_sign_magnitude(0), 0);
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(i16::MIN), 0xFFFF);

        assert_eq!(decode_sign_magnitude(0x8064), -100);
        assert_eq!(decode_sign_magnitude(0x8001), -1);
    }
}
