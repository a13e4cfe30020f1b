//! Sample thermal subsystem
//!
//! Two object classes behind one unit: sensors and the throttle channels
//! that watch them. A channel's sensor index and a sensor's sampling period
//! are fixed once the object exists.

use gpumc_cmdq::router::{
    BoardObject, ByteReader, ClassEntry, ClassError, ClassTable, ClassUnit, ObjMask, ObjectGroup,
    MAX_OBJECTS,
};
use gpumc_cmdq::UnitId;

pub const THERMAL_UNIT: UnitId = UnitId(0x10);

pub const SENSOR_CLASS: u8 = 0x01;
pub const CHANNEL_CLASS: u8 = 0x02;

pub const SENSOR_VERSION: u8 = 1;
pub const CHANNEL_VERSION: u8 = 1;

/// Entry type accepted by both classes
pub const OBJ_TYPE_DEFAULT: u8 = 0;

/// Simulated die temperature every sensor reads before calibration
const AMBIENT_DECI_C: i16 = 450;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sensor {
    pub sample_period_ms: u16,
    /// Calibration offset, tenths of a degree
    pub offset: i16,
    pub reading: i16,
}

impl Sensor {
    pub fn body(sample_period_ms: u16, offset: i16) -> Vec<u8> {
        let mut body = sample_period_ms.to_le_bytes().to_vec();
        body.extend_from_slice(&offset.to_le_bytes());
        body
    }

    fn parse(obj_type: u8, body: &[u8]) -> Result<(u16, i16), ClassError> {
        if obj_type != OBJ_TYPE_DEFAULT {
            return Err(ClassError::InvalidEntry {
                index: None,
                reason: "unknown sensor type",
            });
        }
        let mut r = ByteReader::new(body);
        let period = r.u16()?;
        let offset = r.i16()?;
        r.finish()?;
        if period == 0 {
            return Err(ClassError::InvalidEntry {
                index: None,
                reason: "zero sample period",
            });
        }
        Ok((period, offset))
    }
}

impl BoardObject for Sensor {
    fn construct(obj_type: u8, body: &[u8]) -> Result<Self, ClassError> {
        let (sample_period_ms, offset) = Self::parse(obj_type, body)?;
        Ok(Self {
            sample_period_ms,
            offset,
            reading: AMBIENT_DECI_C.saturating_add(offset),
        })
    }

    fn update(&mut self, obj_type: u8, body: &[u8]) -> Result<(), ClassError> {
        let (period, offset) = Self::parse(obj_type, body)?;
        if period != self.sample_period_ms {
            return Err(ClassError::Immutable {
                index: None,
                field: "sample_period_ms",
            });
        }
        self.offset = offset;
        self.reading = AMBIENT_DECI_C.saturating_add(offset);
        Ok(())
    }

    fn write_status(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.reading.to_le_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub sensor_index: u8,
    /// Throttle above this reading, tenths of a degree
    pub limit: i16,
    pub throttled: bool,
}

impl Channel {
    pub fn body(sensor_index: u8, limit: i16) -> Vec<u8> {
        let mut body = vec![sensor_index, 0];
        body.extend_from_slice(&limit.to_le_bytes());
        body
    }

    fn parse(obj_type: u8, body: &[u8]) -> Result<(u8, i16), ClassError> {
        if obj_type != OBJ_TYPE_DEFAULT {
            return Err(ClassError::InvalidEntry {
                index: None,
                reason: "unknown channel type",
            });
        }
        let mut r = ByteReader::new(body);
        let sensor_index = r.u8()?;
        let _reserved = r.u8()?;
        let limit = r.i16()?;
        r.finish()?;
        Ok((sensor_index, limit))
    }
}

impl BoardObject for Channel {
    fn construct(obj_type: u8, body: &[u8]) -> Result<Self, ClassError> {
        let (sensor_index, limit) = Self::parse(obj_type, body)?;
        Ok(Self {
            sensor_index,
            limit,
            throttled: false,
        })
    }

    fn update(&mut self, obj_type: u8, body: &[u8]) -> Result<(), ClassError> {
        let (sensor_index, limit) = Self::parse(obj_type, body)?;
        if sensor_index != self.sensor_index {
            return Err(ClassError::Immutable {
                index: None,
                field: "sensor_index",
            });
        }
        self.limit = limit;
        Ok(())
    }

    fn write_status(&self, out: &mut Vec<u8>) {
        out.push(self.throttled as u8);
    }
}

/// State owned by the thermal unit task
#[derive(Debug, Clone)]
pub struct ThermalBoard {
    pub sensors: ObjectGroup<Sensor>,
    pub channels: ObjectGroup<Channel>,
}

impl Default for ThermalBoard {
    fn default() -> Self {
        Self {
            sensors: ObjectGroup::new(SENSOR_VERSION),
            channels: ObjectGroup::new(CHANNEL_VERSION),
        }
    }
}

impl ThermalBoard {
    /// Re-evaluate every channel against its sensor.
    fn refresh(&mut self) {
        for index in 0..MAX_OBJECTS as u8 {
            let Some(channel) = self.channels.get(index) else {
                continue;
            };
            let throttled = self
                .sensors
                .get(channel.sensor_index)
                .is_some_and(|s| s.reading > channel.limit);
            if let Some(channel) = self.channels.get_mut(index) {
                channel.throttled = throttled;
            }
        }
    }
}

fn set_sensors(board: &mut ThermalBoard, payload: &[u8]) -> Result<(), ClassError> {
    board.sensors.apply_set(payload)?;
    board.refresh();
    Ok(())
}

fn sensor_status(board: &ThermalBoard, mask: ObjMask, out: &mut Vec<u8>) -> Result<(), ClassError> {
    board.sensors.get_status(mask, out)
}

fn set_channels(board: &mut ThermalBoard, payload: &[u8]) -> Result<(), ClassError> {
    let mut staged = board.channels.clone();
    staged.apply_set(payload)?;

    let live_sensors = board.sensors.live_mask();
    if let Some((index, _)) = staged
        .iter()
        .find(|(_, c)| {
            c.sensor_index as usize >= MAX_OBJECTS || live_sensors & (1 << c.sensor_index) == 0
        })
    {
        return Err(ClassError::InvalidEntry {
            index: Some(index),
            reason: "channel references a sensor that does not exist",
        });
    }

    board.channels = staged;
    board.refresh();
    Ok(())
}

fn channel_status(board: &ThermalBoard, mask: ObjMask, out: &mut Vec<u8>) -> Result<(), ClassError> {
    board.channels.get_status(mask, out)
}

static THERMAL_CLASSES: [ClassEntry<ThermalBoard>; 2] = [
    ClassEntry {
        class_id: SENSOR_CLASS,
        set: set_sensors,
        get_status: sensor_status,
    },
    ClassEntry {
        class_id: CHANNEL_CLASS,
        set: set_channels,
        get_status: channel_status,
    },
];

pub static THERMAL_TABLE: ClassTable<ThermalBoard> = ClassTable::new(&THERMAL_CLASSES);

pub fn thermal_unit() -> ClassUnit<ThermalBoard> {
    ClassUnit::new(&THERMAL_TABLE, ThermalBoard::default())
}
