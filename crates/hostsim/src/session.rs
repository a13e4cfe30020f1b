//! Scripted host session against a loopback transport

use crate::thermal::{
    thermal_unit, Channel, Sensor, CHANNEL_CLASS, CHANNEL_VERSION, OBJ_TYPE_DEFAULT, SENSOR_CLASS,
    SENSOR_VERSION, THERMAL_UNIT,
};
use anyhow::{anyhow, bail, Context, Result};
use gpumc_cmdq::router::{encode_get_status, encode_set, ClassResponse, SetEntry};
use gpumc_cmdq::{loopback, HostEndpoint, StatsSnapshot, TransportConfig, UnitId};
use serde::Serialize;
use std::time::Duration;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Unit id nobody registers; exercises the unrouted fallback
const UNROUTED_UNIT: UnitId = UnitId(0x33);

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub unit: UnitId,
    pub seq: u16,
    /// Class status for thermal requests, absent for administrative replies
    pub status: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub steps: Vec<StepReport>,
    pub stats: StatsSnapshot,
}

impl SessionReport {
    pub fn print_text(&self) {
        println!("=== Host Session ===");
        for step in &self.steps {
            println!(
                "{:<28} {:<8} seq={:<4} status={:<16} data={}",
                step.step,
                step.unit.to_string(),
                step.seq,
                step.status.as_deref().unwrap_or("-"),
                hex(&step.data)
            );
        }
        println!("\n=== Transport Stats ===");
        println!("Dispatched: {}", self.stats.dispatched);
        println!("Short-circuited: {}", self.stats.short_circuited);
        println!("Routing errors: {}", self.stats.routing_errors);
        println!("Rewinds: {}", self.stats.rewinds);
        println!("Records swept: {}", self.stats.swept);
        println!(
            "Responses: {} posted, {} dropped",
            self.stats.responses_posted, self.stats.responses_dropped
        );
    }
}

fn hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "-".to_string();
    }
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("")
}

struct Session {
    host: HostEndpoint,
    steps: Vec<StepReport>,
}

impl Session {
    fn exchange(&mut self, step: &str, unit: UnitId, payload: &[u8]) -> Result<()> {
        let seq = self
            .host
            .submit(unit, payload)
            .with_context(|| format!("submitting '{}'", step))?;
        let resp = self
            .host
            .wait_response(RESPONSE_TIMEOUT)?
            .ok_or_else(|| anyhow!("no response to '{}' within {:?}", step, RESPONSE_TIMEOUT))?;
        if resp.seq_num_id != seq {
            bail!("'{}': expected seq {}, got {}", step, seq, resp.seq_num_id);
        }
        if !self.host.wait_drained(RESPONSE_TIMEOUT) {
            bail!("'{}': command never reclaimed", step);
        }

        let (status, data) = if unit == THERMAL_UNIT {
            let decoded = ClassResponse::decode(&resp.payload)
                .map_err(|e| anyhow!("'{}': bad class response: {}", step, e))?;
            (Some(format!("{:?}", decoded.status)), decoded.data)
        } else {
            (None, resp.payload)
        };
        log::debug!("{} -> {:?}", step, status);

        self.steps.push(StepReport {
            step: step.to_string(),
            unit: resp.unit_id,
            seq,
            status,
            data,
        });
        Ok(())
    }
}

fn entry(index: Option<u8>, body: &[u8]) -> SetEntry<'_> {
    SetEntry {
        index,
        obj_type: OBJ_TYPE_DEFAULT,
        body,
    }
}

/// Start a transport with the thermal unit, run the script, shut down.
pub fn run(config: TransportConfig, rounds: u32) -> Result<SessionReport> {
    let (mut transport, host) = loopback(config).context("building loopback transport")?;
    transport.spawn_unit(THERMAL_UNIT, "thermal", thermal_unit())?;
    let running = transport.start()?;

    let mut session = Session {
        host,
        steps: Vec::new(),
    };
    let script = run_script(&mut session, rounds);
    let stats = running.shutdown().context("transport shutdown")?;
    script?;

    Ok(SessionReport {
        steps: session.steps,
        stats,
    })
}

fn run_script(session: &mut Session, rounds: u32) -> Result<()> {
    session.exchange("ping", UnitId::NULL, &[])?;

    let (hot, cool) = (Sensor::body(100, 60), Sensor::body(250, -30));
    session.exchange(
        "set sensors",
        THERMAL_UNIT,
        &encode_set(
            SENSOR_CLASS,
            SENSOR_VERSION,
            0,
            &[entry(None, &hot), entry(None, &cool)],
        ),
    )?;

    let (watch_hot, watch_cool) = (Channel::body(0, 480), Channel::body(1, 480));
    session.exchange(
        "set channels",
        THERMAL_UNIT,
        &encode_set(
            CHANNEL_CLASS,
            CHANNEL_VERSION,
            0,
            &[entry(None, &watch_hot), entry(None, &watch_cool)],
        ),
    )?;

    for round in 0..rounds {
        session.exchange(
            &format!("sensor status #{}", round),
            THERMAL_UNIT,
            &encode_get_status(SENSOR_CLASS, 0b11),
        )?;
        session.exchange(
            &format!("channel status #{}", round),
            THERMAL_UNIT,
            &encode_get_status(CHANNEL_CLASS, 0b11),
        )?;
    }

    let faster = Sensor::body(50, 60);
    session.exchange(
        "change sample period",
        THERMAL_UNIT,
        &encode_set(SENSOR_CLASS, SENSOR_VERSION, 0, &[entry(Some(0), &faster)]),
    )?;

    let dangling = Channel::body(7, 400);
    session.exchange(
        "channel on missing sensor",
        THERMAL_UNIT,
        &encode_set(CHANNEL_CLASS, CHANNEL_VERSION, 0, &[entry(None, &dangling)]),
    )?;

    session.exchange(
        "status of dead objects",
        THERMAL_UNIT,
        &encode_get_status(SENSOR_CLASS, 0b100),
    )?;
    session.exchange("unknown class", THERMAL_UNIT, &encode_get_status(0x7F, 0b1))?;
    session.exchange("unrouted unit", UNROUTED_UNIT, &[1, 2, 3, 4])?;
    session.exchange("unload", UnitId::UNLOAD, &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn statuses(report: &SessionReport) -> Vec<Option<&str>> {
        report.steps.iter().map(|s| s.status.as_deref()).collect()
    }

    #[test]
    fn scripted_session_exercises_every_outcome() {
        let report = run(TransportConfig::default(), 1).unwrap();
        assert_eq!(
            statuses(&report),
            vec![
                None,
                Some("Ok"),
                Some("Ok"),
                Some("Ok"),
                Some("Ok"),
                Some("Immutable"),
                Some("InvalidEntry"),
                Some("InvalidMask"),
                Some("UnknownClass"),
                None,
                None,
            ]
        );

        // Sensor readings: 45.0 + 6.0 and 45.0 - 3.0 C, little endian tenths.
        let sensors = &report.steps[3].data;
        assert_eq!(sensors, &vec![0b11, 0, 0, 0, 0xFE, 0x01, 0xA4, 0x01]);
        // Only the hot sensor's channel throttles.
        assert_eq!(report.steps[4].data, vec![0b11, 0, 0, 0, 1, 0]);

        assert_eq!(report.stats.dispatched, 8);
        assert_eq!(report.stats.short_circuited, 3);
        assert_eq!(report.stats.routing_errors, 0);
    }

    #[test]
    fn session_runs_from_a_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "inbox_capacity = 1").unwrap();
        writeln!(file, "[command_queue]").unwrap();
        writeln!(file, "queue_id = 0").unwrap();
        writeln!(file, "offset = 0x1000").unwrap();
        writeln!(file, "size = 0x80").unwrap();

        let config = TransportConfig::load(file.path()).unwrap();
        let report = run(config, 4).unwrap();
        assert!(report.stats.rewinds > 0, "a 128-byte ring must wrap");
        assert_eq!(report.steps.len(), 17);
        assert_eq!(report.stats.responses_dropped, 0);
    }
}
