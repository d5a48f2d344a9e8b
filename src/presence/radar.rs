//! DFRobot SEN0395 mmWave radar driver.
//!
//! The sensor speaks a plain-text command protocol over UART and emits a
//! 15-byte `$JYBSS` status frame roughly once per second while running.
//! Configuration changes must be bracketed by stop / save / start and the
//! sensor needs about a second between commands.

use super::{PresenceError, PresenceSource};
use async_trait::async_trait;
use log::{debug, info, trace};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CMD_STOP: &str = "sensorStop";
const CMD_START: &str = "sensorStart";
const CMD_SAVE_CFG: &str = "saveCfg 0x45670123 0xCDEF89AB 0x956128C6 0xDF54AC89";
const CMD_FACTORY_RESET: &str = "factoryReset 0x45670123 0xCDEF89AB 0x956128C6 0xDF54AC89";

const FRAME_HEADER: &[u8; 6] = b"$JYBSS";
const FRAME_LEN: usize = 15;
const STATE_INDEX: usize = 7;

/// Distance resolution of the range configuration, in meters.
const RANGE_STEP_M: f64 = 0.15;
const MAX_RANGE_M: f32 = 9.0;
/// Latency resolution, in seconds.
const LATENCY_STEP_S: f64 = 0.025;
const MAX_LATENCY_S: f32 = 1638.375;

#[derive(Debug, Clone, Copy)]
pub struct RadarSettings {
    /// Pause after each command; the sensor drops commands sent faster.
    pub command_delay: Duration,
    /// Upper bound on waiting for a status frame.
    pub read_timeout: Duration,
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_millis(1000),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Build the `detRangeCfg` command for a single detection segment.
pub fn range_command(start_m: f32, end_m: f32) -> Result<String, PresenceError> {
    if !(0.0..=MAX_RANGE_M).contains(&start_m) || !(0.0..=MAX_RANGE_M).contains(&end_m) || end_m <= start_m
    {
        return Err(PresenceError::InvalidRange { start_m, end_m });
    }
    let start = (f64::from(start_m) / RANGE_STEP_M) as i16;
    let end = (f64::from(end_m) / RANGE_STEP_M) as i16;
    Ok(format!("detRangeCfg -1 {start} {end}"))
}

/// Build the `outputLatency` command.
pub fn latency_command(presence_s: f32, absence_s: f32) -> Result<String, PresenceError> {
    let valid = |s: f32| (0.0..=MAX_LATENCY_S).contains(&s);
    if !valid(presence_s) || !valid(absence_s) {
        return Err(PresenceError::InvalidLatency {
            presence_s,
            absence_s,
        });
    }
    let presence = (f64::from(presence_s) / LATENCY_STEP_S) as i32;
    let absence = (f64::from(absence_s) / LATENCY_STEP_S) as i32;
    Ok(format!("outputLatency -1 {presence} {absence}"))
}

/// Extract the presence flag from a complete status frame.
pub fn parse_frame(frame: &[u8; FRAME_LEN]) -> Result<bool, PresenceError> {
    match frame[STATE_INDEX] {
        b'1' => Ok(true),
        b'0' => Ok(false),
        other => Err(PresenceError::InvalidFrame(other)),
    }
}

/// mmWave radar on any byte stream (serial port, pipe, test duplex).
pub struct MmWaveRadar<S> {
    stream: S,
    settings: RadarSettings,
}

impl<S> MmWaveRadar<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, settings: RadarSettings) -> Self {
        Self { stream, settings }
    }

    async fn send(&mut self, command: &str) -> Result<(), PresenceError> {
        trace!("[Radar] > {}", command);
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.flush().await?;
        if !self.settings.command_delay.is_zero() {
            tokio::time::sleep(self.settings.command_delay).await;
        }
        Ok(())
    }

    /// Stop, apply and persist `command`, then restart the sensor.
    async fn reconfigure(&mut self, command: &str) -> Result<(), PresenceError> {
        self.send(CMD_STOP).await?;
        self.send(command).await?;
        self.send(CMD_SAVE_CFG).await?;
        self.send(CMD_START).await
    }

    async fn read_frame(&mut self) -> Result<[u8; FRAME_LEN], PresenceError> {
        let timeout = self.settings.read_timeout;
        match tokio::time::timeout(timeout, hunt_frame(&mut self.stream)).await {
            Ok(frame) => frame,
            Err(_) => Err(PresenceError::Timeout(timeout)),
        }
    }
}

async fn hunt_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<[u8; FRAME_LEN], PresenceError> {
    let mut frame = [0u8; FRAME_LEN];
    let mut matched = 0;

    while matched < FRAME_HEADER.len() {
        let byte = stream.read_u8().await?;
        if byte == FRAME_HEADER[matched] {
            frame[matched] = byte;
            matched += 1;
        } else if byte == FRAME_HEADER[0] {
            frame[0] = byte;
            matched = 1;
        } else {
            matched = 0;
        }
    }

    stream.read_exact(&mut frame[FRAME_HEADER.len()..]).await?;
    Ok(frame)
}

#[async_trait]
impl<S> PresenceSource for MmWaveRadar<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn factory_reset(&mut self) -> Result<(), PresenceError> {
        info!("[Radar] Restoring factory settings");
        self.reconfigure(CMD_FACTORY_RESET).await
    }

    async fn configure_range(&mut self, start_m: f32, end_m: f32) -> Result<(), PresenceError> {
        let command = range_command(start_m, end_m)?;
        info!("[Radar] Detection range {}m - {}m", start_m, end_m);
        self.reconfigure(&command).await
    }

    async fn configure_latency(
        &mut self,
        presence_s: f32,
        absence_s: f32,
    ) -> Result<(), PresenceError> {
        let command = latency_command(presence_s, absence_s)?;
        info!(
            "[Radar] Output latency {}s presence / {}s absence",
            presence_s, absence_s
        );
        self.reconfigure(&command).await
    }

    async fn start(&mut self) -> Result<(), PresenceError> {
        debug!("[Radar] Starting sensor");
        self.send(CMD_START).await
    }

    async fn stop(&mut self) -> Result<(), PresenceError> {
        debug!("[Radar] Stopping sensor");
        self.send(CMD_STOP).await
    }

    async fn read_presence(&mut self) -> Result<bool, PresenceError> {
        let frame = self.read_frame().await?;
        parse_frame(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    fn radar() -> (MmWaveRadar<DuplexStream>, DuplexStream) {
        let (client, device) = duplex(1024);
        let settings = RadarSettings {
            command_delay: Duration::ZERO,
            read_timeout: Duration::from_millis(100),
        };
        (MmWaveRadar::new(client, settings), device)
    }

    async fn received(device: &mut DuplexStream) -> String {
        let mut buf = vec![0u8; 1024];
        let n = device.read(&mut buf).await.unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[test]
    fn test_range_command() {
        assert_eq!(range_command(0.0, 6.0).unwrap(), "detRangeCfg -1 0 40");
        assert_eq!(range_command(1.5, 9.0).unwrap(), "detRangeCfg -1 10 60");
        assert!(range_command(6.0, 6.0).is_err());
        assert!(range_command(0.0, 9.5).is_err());
        assert!(range_command(-1.0, 3.0).is_err());
    }

    #[test]
    fn test_latency_command() {
        assert_eq!(latency_command(0.0, 15.0).unwrap(), "outputLatency -1 0 600");
        assert_eq!(latency_command(2.5, 0.5).unwrap(), "outputLatency -1 100 20");
        assert!(latency_command(-0.1, 1.0).is_err());
        assert!(latency_command(0.0, 2000.0).is_err());
    }

    #[test]
    fn test_parse_frame() {
        assert_eq!(parse_frame(b"$JYBSS,1, , , *"), Ok(true));
        assert_eq!(parse_frame(b"$JYBSS,0, , , *"), Ok(false));
        assert_eq!(
            parse_frame(b"$JYBSS,x, , , *"),
            Err(PresenceError::InvalidFrame(b'x'))
        );
    }

    #[tokio::test]
    async fn test_configure_range_sequence() {
        let (mut radar, mut device) = radar();
        radar.configure_range(0.0, 6.0).await.unwrap();

        let sent = received(&mut device).await;
        assert_eq!(
            sent,
            format!("{CMD_STOP}detRangeCfg -1 0 40{CMD_SAVE_CFG}{CMD_START}")
        );
    }

    #[tokio::test]
    async fn test_invalid_range_sends_nothing() {
        let (mut radar, mut device) = radar();
        assert!(radar.configure_range(5.0, 1.0).await.is_err());

        radar.stop().await.unwrap();
        assert_eq!(received(&mut device).await, CMD_STOP);
    }

    #[tokio::test]
    async fn test_factory_reset_sequence() {
        let (mut radar, mut device) = radar();
        radar.factory_reset().await.unwrap();

        let sent = received(&mut device).await;
        assert!(sent.starts_with(CMD_STOP));
        assert!(sent.contains(CMD_FACTORY_RESET));
        assert!(sent.ends_with(CMD_START));
    }

    #[tokio::test]
    async fn test_read_presence_skips_noise() {
        let (mut radar, mut device) = radar();
        device
            .write_all(b"leapMMW:/>$J$JYBSS,1, , , *")
            .await
            .unwrap();
        assert_eq!(radar.read_presence().await, Ok(true));

        device.write_all(b"\r\n$JYBSS,0, , , *").await.unwrap();
        assert_eq!(radar.read_presence().await, Ok(false));
    }

    #[tokio::test]
    async fn test_read_presence_times_out() {
        let (mut radar, _device) = radar();
        let result = radar.read_presence().await;
        assert_eq!(result, Err(PresenceError::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test]
    async fn test_read_presence_partial_frame_times_out() {
        let (mut radar, mut device) = radar();
        device.write_all(b"$JYBSS,1").await.unwrap();
        assert!(matches!(
            radar.read_presence().await,
            Err(PresenceError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_gate_commands_and_read_against_mock() {
        let serial = tokio_test::io::Builder::new()
            .write(CMD_STOP.as_bytes())
            .write(CMD_START.as_bytes())
            .read(b"$JYBSS,1, , , *")
            .build();
        let settings = RadarSettings {
            command_delay: Duration::ZERO,
            read_timeout: Duration::from_millis(100),
        };
        let mut radar = MmWaveRadar::new(serial, settings);

        radar.stop().await.unwrap();
        radar.start().await.unwrap();
        assert_eq!(radar.read_presence().await, Ok(true));
    }
}
