use crate::tuya::models::{DeviceDetails, DpValue};

/// One poll's worth of readings: ordered `field → value` pairs.
///
/// Built fresh from each successful device response and consumed once by the
/// CSV log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRecord {
    fields: Vec<(String, DpValue)>,
}

impl SensorRecord {
    /// Flatten the device's DP list into `code → value`, then add `online`
    /// and the server timestamp `t`. Field order is the DP order followed by
    /// `online` and `t`.
    pub fn from_device(t: i64, details: DeviceDetails) -> Self {
        let mut record = Self::default();
        for dp in details.status {
            record.insert(dp.code, dp.value);
        }
        record.insert("online", DpValue::Bool(details.online));
        record.insert("t", DpValue::Integer(t));
        record
    }

    /// Set `name` to `value`. An existing field keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: DpValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DpValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }
}
